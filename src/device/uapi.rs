//! `wg`-style IPC line protocol
//!
//! A transaction is a sequence of `key=value` lines terminated by a blank
//! line. `set=1` applies configuration; `get=1` dumps device state. The
//! reply always ends with `errno=N` and a blank line; non-zero means the
//! transaction was not applied in full.
//!
//! Private keys travel as 64 hex digits in little-endian order, public
//! keys as 66 hex digits of the compressed point.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use ipnet::IpNet;

use crate::device::peer::Peer;
use crate::device::Device;
use crate::protocol::keys::{NoisePrivateKey, NoisePublicKey, SymmetricKey};

const EINVAL: i32 = 22;
const EPROTO: i32 = 71;

struct PeerContext {
    peer: Arc<Peer>,
    pk: NoisePublicKey,
    created: bool,
    /// update_only hit a missing peer: ignore the rest of the block
    dead: bool,
}

impl Device {
    /// Handle one complete IPC request, returning the reply text
    pub fn ipc_handle(&self, request: &str) -> String {
        let mut lines = request.lines();
        match lines.next() {
            Some("get=1") => {
                let mut reply = self.ipc_get_operation();
                reply.push_str("errno=0\n\n");
                reply
            }
            Some("set=1") => {
                let rest: String = lines.map(|l| format!("{l}\n")).collect();
                match self.ipc_set_operation(&rest) {
                    Ok(()) => "errno=0\n\n".to_string(),
                    Err(errno) => format!("errno={errno}\n\n"),
                }
            }
            _ => format!("errno={EPROTO}\n\n"),
        }
    }

    /// Apply a `set` transaction. Returns the errno on failure.
    pub fn ipc_set_operation(&self, input: &str) -> std::result::Result<(), i32> {
        let mut context: Option<PeerContext> = None;

        for line in input.lines() {
            if line.is_empty() {
                break;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::debug!(line, "malformed ipc line");
                return Err(EINVAL);
            };

            match key {
                "private_key" => {
                    if context.is_some() {
                        return Err(EINVAL);
                    }
                    let sk =
                        NoisePrivateKey::from_maybe_zero_hex(value).map_err(|_| EINVAL)?;
                    self.set_private_key(sk).map_err(|_| EINVAL)?;
                }
                "listen_port" => {
                    if context.is_some() {
                        return Err(EINVAL);
                    }
                    let port: u16 = value.parse().map_err(|_| EINVAL)?;
                    self.set_listen_port(port);
                }
                "fwmark" => {
                    if context.is_some() {
                        return Err(EINVAL);
                    }
                    let mark: i32 = value.parse().map_err(|_| EINVAL)?;
                    self.set_fwmark(mark);
                }
                "replace_peers" => {
                    if value != "true" || context.is_some() {
                        return Err(EINVAL);
                    }
                    self.clear_peers();
                }
                "public_key" => {
                    let pk = NoisePublicKey::from_hex(value).map_err(|_| EINVAL)?;
                    let (peer, created) = match self.lookup_peer(&pk) {
                        Some(peer) => (peer, false),
                        None => (self.create_peer(pk).map_err(|_| EINVAL)?, true),
                    };
                    context = Some(PeerContext {
                        peer,
                        pk,
                        created,
                        dead: false,
                    });
                }
                "remove" => {
                    let ctx = context.as_mut().ok_or(EINVAL)?;
                    if value != "true" {
                        return Err(EINVAL);
                    }
                    if !ctx.dead {
                        self.remove_peer(&ctx.pk);
                        ctx.dead = true;
                    }
                }
                "update_only" => {
                    let ctx = context.as_mut().ok_or(EINVAL)?;
                    if value != "true" {
                        return Err(EINVAL);
                    }
                    if ctx.created && !ctx.dead {
                        // the peer did not exist: undo the implicit add
                        self.remove_peer(&ctx.pk);
                        ctx.dead = true;
                    }
                }
                "preshared_key" => {
                    let ctx = context.as_ref().ok_or(EINVAL)?;
                    if ctx.dead {
                        continue;
                    }
                    let psk = SymmetricKey::from_hex(value).map_err(|_| EINVAL)?;
                    ctx.peer
                        .handshake
                        .write()
                        .expect("handshake lock")
                        .preshared_key = psk;
                }
                "endpoint" => {
                    let ctx = context.as_ref().ok_or(EINVAL)?;
                    if ctx.dead {
                        continue;
                    }
                    let endpoint = parse_endpoint(value).ok_or(EINVAL)?;
                    ctx.peer.set_endpoint(endpoint);
                }
                "replace_allowed_ips" => {
                    let ctx = context.as_ref().ok_or(EINVAL)?;
                    if value != "true" {
                        return Err(EINVAL);
                    }
                    if ctx.dead {
                        continue;
                    }
                    self.with_routing(|routing| routing.remove_peer(&ctx.pk));
                }
                "allowed_ip" => {
                    let ctx = context.as_ref().ok_or(EINVAL)?;
                    if ctx.dead {
                        continue;
                    }
                    let net: IpNet = value.parse().map_err(|_| EINVAL)?;
                    self.with_routing(|routing| routing.insert(net, ctx.pk));
                }
                "persistent_keepalive_interval" => {
                    let ctx = context.as_ref().ok_or(EINVAL)?;
                    if ctx.dead {
                        continue;
                    }
                    let interval: u16 = value.parse().map_err(|_| EINVAL)?;
                    ctx.peer
                        .persistent_keepalive
                        .store(interval as u32, Ordering::Relaxed);
                }
                "protocol_version" => {
                    let ctx = context.as_ref().ok_or(EINVAL)?;
                    if ctx.dead {
                        continue;
                    }
                    if value != "1" {
                        return Err(EPROTO);
                    }
                }
                _ => {
                    tracing::debug!(key, "unrecognized ipc key");
                    return Err(EINVAL);
                }
            }
        }
        Ok(())
    }

    /// Dump the device and peer state as `get` lines
    pub fn ipc_get_operation(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("private_key={}\n", self.private_key_hex()));
        out.push_str(&format!("listen_port={}\n", self.listen_port()));
        if self.fwmark() != 0 {
            out.push_str(&format!("fwmark={}\n", self.fwmark()));
        }

        for pk in self.peer_public_keys() {
            let Some(peer) = self.lookup_peer(&pk) else {
                continue;
            };
            out.push_str(&format!("public_key={}\n", pk.to_hex()));

            {
                let handshake = peer.handshake.read().expect("handshake lock");
                if !handshake.preshared_key.is_zero() {
                    out.push_str(&format!(
                        "preshared_key={}\n",
                        handshake.preshared_key.to_hex()
                    ));
                }
            }
            if let Some(endpoint) = peer.endpoint() {
                out.push_str(&format!("endpoint={endpoint}\n"));
            }
            let (sec, nsec) = peer
                .last_handshake
                .lock()
                .expect("timer lock")
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| (d.as_secs(), d.subsec_nanos()))
                .unwrap_or((0, 0));
            out.push_str(&format!("last_handshake_time_sec={sec}\n"));
            out.push_str(&format!("last_handshake_time_nsec={nsec}\n"));
            out.push_str(&format!(
                "tx_bytes={}\n",
                peer.tx_bytes.load(Ordering::Relaxed)
            ));
            out.push_str(&format!(
                "rx_bytes={}\n",
                peer.rx_bytes.load(Ordering::Relaxed)
            ));
            out.push_str(&format!(
                "persistent_keepalive_interval={}\n",
                peer.persistent_keepalive.load(Ordering::Relaxed)
            ));
            for net in self.with_routing(|routing| routing.networks_for(&pk)) {
                out.push_str(&format!("allowed_ip={net}\n"));
            }
            out.push_str("protocol_version=1\n");
        }
        out
    }
}

fn parse_endpoint(value: &str) -> Option<SocketAddr> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr);
    }
    value.to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn hex_keys() -> (String, String) {
        let sk = NoisePrivateKey::generate(&mut OsRng).unwrap();
        let pk = sk.public_key().unwrap();
        (sk.to_hex(), pk.to_hex())
    }

    #[test]
    fn test_set_device_and_peer() {
        let device = Device::new();
        let (sk_hex, _) = hex_keys();
        let (_, peer_hex) = hex_keys();

        let config = format!(
            "private_key={sk_hex}\n\
             listen_port=51820\n\
             fwmark=51\n\
             replace_peers=true\n\
             public_key={peer_hex}\n\
             protocol_version=1\n\
             replace_allowed_ips=true\n\
             allowed_ip=10.0.0.0/24\n\
             allowed_ip=10.0.1.0/24\n\
             endpoint=127.0.0.1:2000\n\
             persistent_keepalive_interval=25\n"
        );
        device.ipc_set_operation(&config).unwrap();

        assert_eq!(device.listen_port(), 51820);
        assert_eq!(device.fwmark(), 51);

        let pk = NoisePublicKey::from_hex(&peer_hex).unwrap();
        let peer = device.lookup_peer(&pk).expect("peer configured");
        assert_eq!(peer.persistent_keepalive.load(Ordering::Relaxed), 25);
        assert_eq!(
            peer.endpoint().unwrap(),
            "127.0.0.1:2000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(device.with_routing(|r| r.networks_for(&pk)).len(), 2);
    }

    #[test]
    fn test_replace_peers_clears_old_set() {
        let device = Device::new();
        let (sk_hex, _) = hex_keys();
        let (_, old_peer) = hex_keys();
        let (_, new_peer) = hex_keys();

        device
            .ipc_set_operation(&format!("private_key={sk_hex}\npublic_key={old_peer}\n"))
            .unwrap();
        device
            .ipc_set_operation(&format!("replace_peers=true\npublic_key={new_peer}\n"))
            .unwrap();

        assert!(device
            .lookup_peer(&NoisePublicKey::from_hex(&old_peer).unwrap())
            .is_none());
        assert!(device
            .lookup_peer(&NoisePublicKey::from_hex(&new_peer).unwrap())
            .is_some());
    }

    #[test]
    fn test_remove_peer() {
        let device = Device::new();
        let (sk_hex, _) = hex_keys();
        let (_, peer_hex) = hex_keys();

        device
            .ipc_set_operation(&format!("private_key={sk_hex}\npublic_key={peer_hex}\n"))
            .unwrap();
        device
            .ipc_set_operation(&format!("public_key={peer_hex}\nremove=true\n"))
            .unwrap();
        assert!(device
            .lookup_peer(&NoisePublicKey::from_hex(&peer_hex).unwrap())
            .is_none());
    }

    #[test]
    fn test_update_only_skips_missing_peer() {
        let device = Device::new();
        let (sk_hex, _) = hex_keys();
        let (_, peer_hex) = hex_keys();

        device
            .ipc_set_operation(&format!(
                "private_key={sk_hex}\n\
                 public_key={peer_hex}\n\
                 update_only=true\n\
                 persistent_keepalive_interval=10\n"
            ))
            .unwrap();
        assert!(device
            .lookup_peer(&NoisePublicKey::from_hex(&peer_hex).unwrap())
            .is_none());
    }

    #[test]
    fn test_bad_protocol_version_rejected() {
        let device = Device::new();
        let (sk_hex, _) = hex_keys();
        let (_, peer_hex) = hex_keys();

        let err = device
            .ipc_set_operation(&format!(
                "private_key={sk_hex}\npublic_key={peer_hex}\nprotocol_version=2\n"
            ))
            .unwrap_err();
        assert_eq!(err, EPROTO);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let device = Device::new();
        assert_eq!(device.ipc_set_operation("bogus_key=1\n"), Err(EINVAL));
    }

    #[test]
    fn test_ipc_handle_roundtrip() {
        let device = Device::new();
        let (sk_hex, _) = hex_keys();
        let (_, peer_hex) = hex_keys();

        let reply = device.ipc_handle(&format!(
            "set=1\nprivate_key={sk_hex}\npublic_key={peer_hex}\nallowed_ip=10.1.0.0/16\n\n"
        ));
        assert_eq!(reply, "errno=0\n\n");

        let dump = device.ipc_handle("get=1\n\n");
        assert!(dump.contains(&format!("private_key={sk_hex}")));
        assert!(dump.contains(&format!("public_key={peer_hex}")));
        assert!(dump.contains("allowed_ip=10.1.0.0/16"));
        assert!(dump.contains("protocol_version=1"));
        assert!(dump.ends_with("errno=0\n\n"));
    }
}
