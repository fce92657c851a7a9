//! Cryptokey routing table
//!
//! Maps allowed-IP networks to peers. Outbound packets pick their peer by
//! longest-prefix match on the destination address; inbound plaintext is
//! accepted only when its source address routes back to the peer that sent
//! it.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::protocol::keys::NoisePublicKey;

#[derive(Default)]
pub struct AllowedIps {
    entries: Vec<(IpNet, NoisePublicKey)>,
}

impl AllowedIps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network for a peer. A network already owned by another peer
    /// moves to the new one.
    pub fn insert(&mut self, net: IpNet, peer: NoisePublicKey) {
        self.entries.retain(|(n, _)| *n != net);
        self.entries.push((net, peer));
    }

    /// Drop every network belonging to `peer`
    pub fn remove_peer(&mut self, peer: &NoisePublicKey) {
        self.entries.retain(|(_, p)| p != peer);
    }

    /// Longest-prefix match
    pub fn lookup(&self, addr: IpAddr) -> Option<NoisePublicKey> {
        self.entries
            .iter()
            .filter(|(net, _)| net.contains(&addr))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, peer)| *peer)
    }

    /// Cryptokey routing check: does `addr` route to `peer`?
    pub fn peer_allows(&self, peer: &NoisePublicKey, addr: IpAddr) -> bool {
        self.lookup(addr).as_ref() == Some(peer)
    }

    /// Networks currently assigned to `peer`
    pub fn networks_for(&self, peer: &NoisePublicKey) -> Vec<IpNet> {
        self.entries
            .iter()
            .filter(|(_, p)| p == peer)
            .map(|(n, _)| *n)
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
