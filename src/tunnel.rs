//! Opaque packet source/sink and the device run loop
//!
//! The core never touches a TUN device directly; it consumes IP packets
//! from a `PacketIo` implementation and hands decrypted packets back to
//! it. `ChannelTun` is the in-memory implementation used by tests and by
//! anything that wants to drive the data plane programmatically; `NullTun`
//! serves a responder-only daemon.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::device::Device;
use crate::error::Result;

/// Largest UDP datagram the loop will accept
const MAX_DATAGRAM: usize = 65535;

/// Byte-oriented IP packet source/sink
pub trait PacketIo: Send + Sync + 'static {
    /// Next outbound IP packet; `None` ends the run loop
    fn recv(&self) -> impl Future<Output = Option<Vec<u8>>> + Send;

    /// Deliver a decrypted inbound IP packet; `false` ends the run loop
    fn send(&self, packet: Vec<u8>) -> impl Future<Output = bool> + Send;
}

/// In-memory packet channel pair
pub struct ChannelTun {
    outbound: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    inbound: mpsc::Sender<Vec<u8>>,
}

/// The far side of a `ChannelTun`: inject packets to send through the
/// tunnel, and read packets the tunnel delivered.
pub struct ChannelTunHandle {
    pub outbound: mpsc::Sender<Vec<u8>>,
    pub inbound: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

/// Build a connected `ChannelTun`/handle pair
pub fn channel_tun() -> (ChannelTun, ChannelTunHandle) {
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    (
        ChannelTun {
            outbound: tokio::sync::Mutex::new(outbound_rx),
            inbound: inbound_tx,
        },
        ChannelTunHandle {
            outbound: outbound_tx,
            inbound: tokio::sync::Mutex::new(inbound_rx),
        },
    )
}

impl PacketIo for ChannelTun {
    fn recv(&self) -> impl Future<Output = Option<Vec<u8>>> + Send {
        async move { self.outbound.lock().await.recv().await }
    }

    fn send(&self, packet: Vec<u8>) -> impl Future<Output = bool> + Send {
        async move { self.inbound.send(packet).await.is_ok() }
    }
}

/// A sink that never produces packets and drops everything delivered.
/// Lets the daemon run as a pure responder without a tunnel interface.
pub struct NullTun;

impl PacketIo for NullTun {
    fn recv(&self) -> impl Future<Output = Option<Vec<u8>>> + Send {
        std::future::pending()
    }

    fn send(&self, packet: Vec<u8>) -> impl Future<Output = bool> + Send {
        async move {
            tracing::debug!(len = packet.len(), "discarding delivered packet");
            true
        }
    }
}

/// Glue between a device, its UDP socket and a packet source/sink
pub struct Tunnel<T: PacketIo> {
    device: Arc<Device>,
    socket: Arc<UdpSocket>,
    io: T,
}

impl<T: PacketIo> Tunnel<T> {
    /// Bind the device's UDP port (an unset port picks an ephemeral one
    /// and writes it back to the device).
    pub async fn bind(device: Arc<Device>, io: T) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", device.listen_port())).await?;
        device.set_listen_port(socket.local_addr()?.port());
        Ok(Tunnel {
            device,
            socket: Arc::new(socket),
            io,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Event loop: UDP datagrams in, tunnel packets out, one maintenance
    /// tick per second. Ends when the packet source closes or the device
    /// goes down.
    pub async fn run(self) -> Result<()> {
        self.device.up();
        let mut udp_buf = vec![0u8; MAX_DATAGRAM];
        let mut tick = interval(Duration::from_secs(1));

        loop {
            if !self.device.is_up() {
                break;
            }
            tokio::select! {
                result = self.socket.recv_from(&mut udp_buf) => {
                    let (len, src) = result?;
                    let outcome = self.device.handle_inbound(&udp_buf[..len], src);
                    for reply in outcome.replies {
                        if let Err(err) = self.socket.send_to(&reply, src).await {
                            tracing::warn!(%err, %src, "udp send failed");
                        }
                    }
                    if let Some(packet) = outcome.deliver {
                        if !self.io.send(packet).await {
                            break;
                        }
                    }
                }
                packet = self.io.recv() => {
                    let Some(packet) = packet else { break };
                    match self.device.handle_outbound(&packet) {
                        Ok(sends) => {
                            for (datagram, endpoint) in sends {
                                if let Err(err) = self.socket.send_to(&datagram, endpoint).await {
                                    tracing::warn!(%err, %endpoint, "udp send failed");
                                }
                            }
                        }
                        Err(err) => tracing::debug!(%err, "outbound packet dropped"),
                    }
                }
                _ = tick.tick() => {
                    for (datagram, endpoint) in self.device.maintenance() {
                        if let Err(err) = self.socket.send_to(&datagram, endpoint).await {
                            tracing::warn!(%err, %endpoint, "udp send failed");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// RFC 1071 internet checksum
fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in data.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += word as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build an 84-byte IPv4 ICMP echo request, the classic `ping` shape
pub fn ping_packet(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    const TOTAL_LEN: usize = 84;
    let mut packet = vec![0u8; TOTAL_LEN];

    // IPv4 header
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&(TOTAL_LEN as u16).to_be_bytes());
    packet[8] = 64; // ttl
    packet[9] = 1; // icmp
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    let ip_csum = checksum(&packet[..20]);
    packet[10..12].copy_from_slice(&ip_csum.to_be_bytes());

    // ICMP echo request
    packet[20] = 8;
    packet[24..26].copy_from_slice(&0x1d37u16.to_be_bytes()); // id
    packet[26..28].copy_from_slice(&1u16.to_be_bytes()); // seq
    for (i, byte) in packet[28..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    let icmp_csum = checksum(&packet[20..]);
    packet[22..24].copy_from_slice(&icmp_csum.to_be_bytes());

    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_packet_shape() {
        let packet = ping_packet("1.0.0.1".parse().unwrap(), "1.0.0.2".parse().unwrap());
        assert_eq!(packet.len(), 84);
        assert_eq!(packet[0] >> 4, 4);
        assert_eq!(packet[9], 1);
        assert_eq!(
            crate::device::source_ip(&packet),
            Some("1.0.0.1".parse().unwrap())
        );
        assert_eq!(
            crate::device::destination_ip(&packet),
            Some("1.0.0.2".parse().unwrap())
        );
        // header checksum verifies to zero
        assert_eq!(checksum(&packet[..20]), 0);
        assert_eq!(checksum(&packet[20..]), 0);
    }

    #[tokio::test]
    async fn test_channel_tun_roundtrip() {
        let (tun, handle) = channel_tun();

        handle.outbound.send(vec![1, 2, 3]).await.unwrap();
        assert_eq!(tun.recv().await, Some(vec![1, 2, 3]));

        assert!(tun.send(vec![4, 5]).await);
        assert_eq!(handle.inbound.lock().await.recv().await, Some(vec![4, 5]));
    }
}
