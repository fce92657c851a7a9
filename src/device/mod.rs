//! Device core: identity, peer table, and datagram dispatch
//!
//! A `Device` owns the static identity, the peer table keyed by static
//! public key, the session index table, the cryptokey routing table and the
//! cookie checker. Peers, keypairs and indices are device-owned arenas;
//! nothing holds a back-pointer, lookups go through the tables.
//!
//! Locking is fine-grained: a readers-writer lock on the static identity,
//! one on the peer map, one per peer handshake, a mutex per peer's keypair
//! slots, and the process-wide index table lock.

pub mod index;
pub mod noise;
pub mod peer;
pub mod routing;
pub mod uapi;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{DeviceError, Result};
use crate::protocol::cookie::{CookieChecker, CookieGenerator};
use crate::protocol::keys::{NoisePrivateKey, NoisePublicKey};
use crate::protocol::messages::{
    MessageCookieReply, MessageInitiation, MessageResponse, MessageType, TransportHeader,
};
use crate::protocol::noise::{Handshake, HandshakeState};
use index::{IndexEntry, IndexTable};
use peer::{Peer, REKEY_TIMEOUT};
use routing::AllowedIps;

pub(crate) struct StaticIdentity {
    private_key: NoisePrivateKey,
    public_key: NoisePublicKey,
}

/// Everything `handle_inbound` can ask the caller to do: datagrams to send
/// back to the source address, and at most one decrypted packet for the
/// tunnel.
#[derive(Default)]
pub struct InboundResult {
    pub replies: Vec<Vec<u8>>,
    pub deliver: Option<Vec<u8>>,
}

pub struct Device {
    static_identity: RwLock<StaticIdentity>,
    peers: RwLock<HashMap<NoisePublicKey, Arc<Peer>>>,
    pub index_table: IndexTable,
    cookie_checker: CookieChecker,
    routing: RwLock<AllowedIps>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    up: AtomicBool,
    under_load: AtomicBool,
    listen_port: AtomicU32,
    fwmark: AtomicI32,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Self {
        Self::with_rng(Box::new(OsRng))
    }

    /// Construct with a caller-supplied entropy source (tests inject
    /// deterministic ephemerals through this).
    pub fn with_rng(rng: Box<dyn RngCore + Send>) -> Self {
        Device {
            static_identity: RwLock::new(StaticIdentity {
                private_key: NoisePrivateKey::default(),
                public_key: NoisePublicKey::default(),
            }),
            peers: RwLock::new(HashMap::new()),
            index_table: IndexTable::new(),
            cookie_checker: CookieChecker::new(&NoisePublicKey::default()),
            routing: RwLock::new(AllowedIps::new()),
            rng: Mutex::new(rng),
            up: AtomicBool::new(false),
            under_load: AtomicBool::new(false),
            listen_port: AtomicU32::new(0),
            fwmark: AtomicI32::new(0),
        }
    }

    pub fn up(&self) {
        self.up.store(true, Ordering::Release);
    }

    pub fn down(&self) {
        self.up.store(false, Ordering::Release);
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Toggle the DoS-protection mac2 requirement
    pub fn set_under_load(&self, under_load: bool) {
        self.under_load.store(under_load, Ordering::Release);
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port.load(Ordering::Relaxed) as u16
    }

    pub fn set_listen_port(&self, port: u16) {
        self.listen_port.store(port as u32, Ordering::Relaxed);
    }

    pub fn fwmark(&self) -> i32 {
        self.fwmark.load(Ordering::Relaxed)
    }

    pub fn set_fwmark(&self, mark: i32) {
        self.fwmark.store(mark, Ordering::Relaxed);
    }

    /// Install the local static key. Every peer's precomputed static-static
    /// product is re-derived and in-flight handshakes are expired.
    pub fn set_private_key(&self, private_key: NoisePrivateKey) -> Result<()> {
        let public_key = if private_key.is_zero() {
            NoisePublicKey::default()
        } else {
            private_key.public_key()?
        };

        let mut identity = self.static_identity.write().expect("identity lock");
        identity.private_key = private_key;
        identity.public_key = public_key;
        self.cookie_checker.init(&public_key);

        let peers = self.peers.read().expect("peer table lock");
        for (pk, peer) in peers.iter() {
            let precomputed = identity
                .private_key
                .shared_secret(pk)
                .unwrap_or([0u8; 32]);
            let mut handshake = peer.handshake.write().expect("handshake lock");
            handshake.precomputed_static_static = precomputed;
            let stale = handshake.local_index;
            handshake.clear();
            drop(handshake);
            self.index_table.delete(stale);
        }
        Ok(())
    }

    pub fn public_key(&self) -> NoisePublicKey {
        self.static_identity
            .read()
            .expect("identity lock")
            .public_key
    }

    pub(crate) fn private_key_hex(&self) -> String {
        self.static_identity
            .read()
            .expect("identity lock")
            .private_key
            .to_hex()
    }

    /// Create a peer for `pk`. Fails if it already exists.
    pub fn create_peer(&self, pk: NoisePublicKey) -> Result<Arc<Peer>> {
        let identity = self.static_identity.read().expect("identity lock");
        let precomputed = identity.private_key.shared_secret(&pk).unwrap_or([0u8; 32]);
        drop(identity);

        let mut peers = self.peers.write().expect("peer table lock");
        if peers.contains_key(&pk) {
            return Err(DeviceError::UnknownPeer.into());
        }
        let peer = Arc::new(Peer::new(
            Handshake::new(pk, precomputed),
            CookieGenerator::new(&pk),
        ));
        peers.insert(pk, peer.clone());
        tracing::info!(peer = ?pk, "peer added");
        Ok(peer)
    }

    pub fn lookup_peer(&self, pk: &NoisePublicKey) -> Option<Arc<Peer>> {
        self.peers.read().expect("peer table lock").get(pk).cloned()
    }

    pub fn remove_peer(&self, pk: &NoisePublicKey) {
        let removed = self.peers.write().expect("peer table lock").remove(pk);
        if let Some(peer) = removed {
            let stale = {
                let mut handshake = peer.handshake.write().expect("handshake lock");
                let stale = handshake.local_index;
                handshake.clear();
                stale
            };
            self.index_table.delete(stale);
            for keypair in peer.keypairs.clear() {
                self.index_table.delete(keypair.local_index);
            }
            self.routing.write().expect("routing lock").remove_peer(pk);
            tracing::info!(peer = ?pk, "peer removed");
        }
    }

    pub fn peer_public_keys(&self) -> Vec<NoisePublicKey> {
        self.peers
            .read()
            .expect("peer table lock")
            .keys()
            .copied()
            .collect()
    }

    pub fn clear_peers(&self) {
        for pk in self.peer_public_keys() {
            self.remove_peer(&pk);
        }
    }

    pub fn with_routing<R>(&self, f: impl FnOnce(&mut AllowedIps) -> R) -> R {
        f(&mut self.routing.write().expect("routing lock"))
    }

    /// Inbound datagram dispatch by the first byte
    pub fn handle_inbound(&self, data: &[u8], src: SocketAddr) -> InboundResult {
        let mut result = InboundResult::default();
        if !self.is_up() {
            return result;
        }

        let msg_type = match crate::protocol::messages::get_message_type(data) {
            Ok(t) => t,
            Err(_) => {
                self.index_table
                    .telemetry
                    .unknown_message_type
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!(len = data.len(), "dropping datagram with unknown type");
                return result;
            }
        };

        match msg_type {
            MessageType::HandshakeInitiation => self.receive_initiation(data, src, &mut result),
            MessageType::HandshakeResponse => self.receive_response(data, src, &mut result),
            MessageType::CookieReply => self.receive_cookie_reply(data),
            MessageType::TransportData => self.receive_transport(data, src, &mut result),
        }
        result
    }

    fn bad_size(&self, what: &str, got: usize) {
        self.index_table
            .telemetry
            .invalid_message_size
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!(what, got, "dropping datagram with invalid size");
    }

    fn receive_initiation(&self, data: &[u8], src: SocketAddr, result: &mut InboundResult) {
        if data.len() != MessageInitiation::SIZE {
            return self.bad_size("initiation", data.len());
        }
        if !self.cookie_checker.check_mac1(data) {
            tracing::debug!(%src, "initiation failed mac1");
            return;
        }
        let Ok(msg) = MessageInitiation::from_bytes(data) else {
            return;
        };
        if self.under_load.load(Ordering::Acquire) {
            let src_bytes = socket_addr_bytes(&src);
            if !self.cookie_checker.check_mac2(data, &src_bytes) {
                if let Ok(reply) = self.cookie_checker.create_reply(data, msg.sender, &src_bytes)
                {
                    result.replies.push(reply.to_bytes().to_vec());
                }
                return;
            }
        }

        let Some(peer) = self.consume_initiation(&msg) else {
            tracing::debug!(%src, "initiation dropped");
            return;
        };
        peer.set_endpoint(src);

        let response = match self.create_response(&peer) {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(%src, %err, "failed to create handshake response");
                return;
            }
        };
        // derive the responder keypair into the next slot before replying
        if let Err(err) = self.begin_symmetric_session(&peer) {
            tracing::debug!(%src, %err, "failed to derive responder session");
            return;
        }
        let mut bytes = response.to_bytes().to_vec();
        peer.cookie_generator.add_macs(&mut bytes);
        result.replies.push(bytes);
    }

    fn receive_response(&self, data: &[u8], src: SocketAddr, result: &mut InboundResult) {
        if data.len() != MessageResponse::SIZE {
            return self.bad_size("response", data.len());
        }
        if !self.cookie_checker.check_mac1(data) {
            tracing::debug!(%src, "response failed mac1");
            return;
        }
        let Ok(msg) = MessageResponse::from_bytes(data) else {
            return;
        };
        if self.under_load.load(Ordering::Acquire) {
            let src_bytes = socket_addr_bytes(&src);
            if !self.cookie_checker.check_mac2(data, &src_bytes) {
                if let Ok(reply) = self.cookie_checker.create_reply(data, msg.sender, &src_bytes)
                {
                    result.replies.push(reply.to_bytes().to_vec());
                }
                return;
            }
        }

        let Some(peer) = self.consume_response(&msg) else {
            tracing::debug!(%src, "response dropped");
            return;
        };
        peer.set_endpoint(src);
        if let Err(err) = self.begin_symmetric_session(&peer) {
            tracing::debug!(%src, %err, "failed to derive initiator session");
            return;
        }
        tracing::info!(%src, "handshake completed as initiator");

        // flush anything staged behind the handshake, then confirm the
        // session so the responder can promote its next slot
        if let Some(keypair) = peer.keypairs.current() {
            for packet in peer.take_staged() {
                if let Ok(datagram) = keypair.seal_transport(&packet) {
                    peer.tx_bytes.fetch_add(datagram.len() as u64, Ordering::Relaxed);
                    result.replies.push(datagram);
                }
            }
            if let Ok(keepalive) = keypair.seal_transport(&[]) {
                result.replies.push(keepalive);
            }
            peer.mark_data_sent();
        }
    }

    fn receive_cookie_reply(&self, data: &[u8]) {
        if data.len() != MessageCookieReply::SIZE {
            return self.bad_size("cookie reply", data.len());
        }
        let Ok(msg) = MessageCookieReply::from_bytes(data) else {
            return;
        };
        let Some(entry) = self.index_table.lookup(msg.receiver) else {
            self.index_table
                .telemetry
                .unknown_index
                .fetch_add(1, Ordering::Relaxed);
            return;
        };
        let pk = match entry {
            IndexEntry::Handshake { peer } => peer,
            IndexEntry::Keypair { peer, .. } => peer,
        };
        if let Some(peer) = self.lookup_peer(&pk) {
            if peer.cookie_generator.consume_reply(&msg) {
                tracing::debug!(peer = ?pk, "cookie stored");
            }
        }
    }

    fn receive_transport(&self, data: &[u8], src: SocketAddr, result: &mut InboundResult) {
        let header = match TransportHeader::from_bytes(data) {
            Ok(header) => header,
            Err(_) => {
                return self.bad_size("transport", data.len());
            }
        };
        let Some(entry) = self.index_table.lookup(header.receiver) else {
            self.index_table
                .telemetry
                .unknown_index
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(index = header.receiver, "transport for unknown index");
            return;
        };
        let IndexEntry::Keypair { peer: pk, keypair } = entry else {
            tracing::debug!(index = header.receiver, "transport for handshake index");
            return;
        };
        let Some(peer) = self.lookup_peer(&pk) else {
            return;
        };

        let plaintext = match keypair.open_transport(header.counter, TransportHeader::payload(data))
        {
            Ok(plaintext) => plaintext,
            Err(err) => {
                tracing::debug!(peer = ?pk, %err, "transport dropped");
                return;
            }
        };

        peer.set_endpoint(src);
        peer.mark_data_received();
        peer.rx_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);

        let (promoted, displaced) = peer.keypairs.promote_on_receive(&keypair);
        if promoted {
            tracing::debug!(peer = ?pk, "next keypair promoted to current");
        }
        if let Some(old) = displaced {
            self.index_table.delete(old.local_index);
        }

        if plaintext.is_empty() {
            // keepalive
            return;
        }

        let Some(src_ip) = source_ip(&plaintext) else {
            tracing::debug!(peer = ?pk, "dropping malformed inner packet");
            return;
        };
        let allowed = self
            .routing
            .read()
            .expect("routing lock")
            .peer_allows(&pk, src_ip);
        if !allowed {
            self.index_table
                .telemetry
                .allowed_ip_violations
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(peer = ?pk, %src_ip, "inner source not in allowed ips");
            return;
        }
        result.deliver = Some(plaintext);
    }

    /// Outbound IP packet: pick the peer by destination, seal under the
    /// current keypair, and surface any handshake datagram that needs to
    /// go out alongside.
    pub fn handle_outbound(&self, packet: &[u8]) -> Result<Vec<(Vec<u8>, SocketAddr)>> {
        if !self.is_up() {
            return Err(DeviceError::Down.into());
        }
        let mut out = Vec::new();

        let Some(dst) = destination_ip(packet) else {
            tracing::debug!("dropping malformed outbound packet");
            return Ok(out);
        };
        let pk = self
            .routing
            .read()
            .expect("routing lock")
            .lookup(dst)
            .ok_or(DeviceError::NoRoute { destination: dst })?;
        let peer = self.lookup_peer(&pk).ok_or(DeviceError::UnknownPeer)?;
        let endpoint = peer.endpoint().ok_or(DeviceError::NoEndpoint)?;

        match peer.keypairs.current() {
            Some(keypair) if !keypair.is_expired() => {
                let datagram = keypair.seal_transport(packet)?;
                peer.tx_bytes.fetch_add(datagram.len() as u64, Ordering::Relaxed);
                peer.mark_data_sent();
                out.push((datagram, endpoint));

                if keypair.needs_rekey() {
                    if let Some(initiation) = self.handshake_initiation_datagram(&peer)? {
                        out.push((initiation, endpoint));
                    }
                }
            }
            _ => {
                peer.stage_packet(packet.to_vec());
                if let Some(initiation) = self.handshake_initiation_datagram(&peer)? {
                    out.push((initiation, endpoint));
                }
            }
        }
        Ok(out)
    }

    /// Build a mac'd initiation datagram unless one went out within the
    /// rekey timeout.
    pub fn handshake_initiation_datagram(&self, peer: &Arc<Peer>) -> Result<Option<Vec<u8>>> {
        {
            let handshake = peer.handshake.read().expect("handshake lock");
            if let Some(sent) = handshake.last_sent_handshake {
                if sent.elapsed() < REKEY_TIMEOUT {
                    return Ok(None);
                }
            }
        }
        let msg = self.create_initiation(peer)?;
        let mut bytes = msg.to_bytes().to_vec();
        peer.cookie_generator.add_macs(&mut bytes);
        peer.handshake
            .write()
            .expect("handshake lock")
            .last_sent_handshake = Some(std::time::Instant::now());
        Ok(Some(bytes))
    }

    /// Periodic upkeep: handshake retries, initiator rekeys and persistent
    /// keepalives. Returns datagrams to send.
    pub fn maintenance(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut out = Vec::new();
        if !self.is_up() {
            return out;
        }
        let peers: Vec<Arc<Peer>> = self
            .peers
            .read()
            .expect("peer table lock")
            .values()
            .cloned()
            .collect();

        for peer in peers {
            let Some(endpoint) = peer.endpoint() else {
                continue;
            };

            let retry_due = {
                let handshake = peer.handshake.read().expect("handshake lock");
                handshake.state == HandshakeState::InitiationCreated
                    && handshake
                        .last_sent_handshake
                        .map(|sent| sent.elapsed() >= REKEY_TIMEOUT)
                        .unwrap_or(true)
            };
            let rekey_due = peer
                .keypairs
                .current()
                .map(|kp| kp.needs_rekey())
                .unwrap_or(false);
            let staged_waiting = !peer.staged.lock().expect("staged queue lock").is_empty();

            if retry_due || rekey_due || staged_waiting {
                match self.handshake_initiation_datagram(&peer) {
                    Ok(Some(datagram)) => out.push((datagram, endpoint)),
                    Ok(None) => {}
                    Err(err) => tracing::debug!(%err, "maintenance initiation failed"),
                }
            }

            if peer.keepalive_due() {
                if let Some(keypair) = peer.keypairs.current() {
                    if let Ok(keepalive) = keypair.seal_transport(&[]) {
                        peer.mark_data_sent();
                        out.push((keepalive, endpoint));
                    }
                }
            }
        }
        out
    }

    /// Shut the device down: mark it down, evict every keypair and index
    /// entry, zero handshake state.
    pub fn close(&self) {
        self.down();
        self.clear_peers();
        self.index_table.clear();
        self.routing.write().expect("routing lock").clear();
        tracing::info!("device closed");
    }

    pub(crate) fn rng(&self) -> std::sync::MutexGuard<'_, Box<dyn RngCore + Send>> {
        self.rng.lock().expect("rng lock")
    }

    pub(crate) fn identity(&self) -> std::sync::RwLockReadGuard<'_, StaticIdentity> {
        self.static_identity.read().expect("identity lock")
    }
}

impl StaticIdentity {
    pub(crate) fn private_key(&self) -> &NoisePrivateKey {
        &self.private_key
    }

    pub(crate) fn public_key(&self) -> &NoisePublicKey {
        &self.public_key
    }
}

/// Source-address bytes bound into cookies
pub(crate) fn socket_addr_bytes(addr: &SocketAddr) -> Vec<u8> {
    let mut out = match addr.ip() {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    out.extend_from_slice(&addr.port().to_be_bytes());
    out
}

/// Destination address of an IP packet (v4 or v6)
pub fn destination_ip(packet: &[u8]) -> Option<IpAddr> {
    match packet.first()? >> 4 {
        4 if packet.len() >= 20 => {
            let octets: [u8; 4] = packet[16..20].try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        6 if packet.len() >= 40 => {
            let octets: [u8; 16] = packet[24..40].try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

/// Source address of an IP packet (v4 or v6)
pub fn source_ip(packet: &[u8]) -> Option<IpAddr> {
    match packet.first()? >> 4 {
        4 if packet.len() >= 20 => {
            let octets: [u8; 4] = packet[12..16].try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        6 if packet.len() >= 40 => {
            let octets: [u8; 16] = packet[8..24].try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_header_parsing() {
        let mut v4 = [0u8; 28];
        v4[0] = 0x45;
        v4[12..16].copy_from_slice(&[10, 0, 0, 1]);
        v4[16..20].copy_from_slice(&[10, 0, 0, 2]);
        assert_eq!(source_ip(&v4), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(destination_ip(&v4), Some("10.0.0.2".parse().unwrap()));

        let mut v6 = [0u8; 48];
        v6[0] = 0x60;
        v6[8] = 0xfd;
        v6[24] = 0xfe;
        assert!(matches!(source_ip(&v6), Some(IpAddr::V6(_))));
        assert!(matches!(destination_ip(&v6), Some(IpAddr::V6(_))));

        assert_eq!(destination_ip(&[0x45u8; 4]), None);
        assert_eq!(destination_ip(&[]), None);
    }

    #[test]
    fn test_socket_addr_bytes_include_port() {
        let a: SocketAddr = "192.168.13.37:51820".parse().unwrap();
        let b: SocketAddr = "192.168.13.37:51821".parse().unwrap();
        assert_ne!(socket_addr_bytes(&a), socket_addr_bytes(&b));
        assert_eq!(socket_addr_bytes(&a).len(), 6);
    }

    #[test]
    fn test_down_device_drops_everything() {
        let device = Device::new();
        let src: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let result = device.handle_inbound(&[1u8; 182], src);
        assert!(result.replies.is_empty());
        assert!(result.deliver.is_none());
        assert!(device.handle_outbound(&[0x45u8; 20]).is_err());
    }

    #[test]
    fn test_unknown_type_counted() {
        let device = Device::new();
        device.up();
        let src: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        device.handle_inbound(&[99u8; 64], src);
        let (unknown_type, ..) = device.index_table.telemetry.snapshot();
        assert_eq!(unknown_type, 1);
    }
}
