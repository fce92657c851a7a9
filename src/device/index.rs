//! Process-wide session index table
//!
//! Maps random 32-bit indices to either a pending handshake or an active
//! keypair. An index stays unique for the lifetime of its referent; at
//! session start the handshake's index is remapped onto the new keypair.
//! The table also carries the telemetry counters for protocol failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rand::RngCore;

use crate::device::peer::Keypair;
use crate::error::DeviceError;
use crate::protocol::keys::NoisePublicKey;

/// Collision retry budget for index allocation
const MAX_INDEX_ATTEMPTS: u32 = 16;

/// What a session index currently refers to
#[derive(Clone)]
pub enum IndexEntry {
    /// A handshake in progress, owned by the named peer
    Handshake { peer: NoisePublicKey },
    /// An established keypair
    Keypair {
        peer: NoisePublicKey,
        keypair: Arc<Keypair>,
    },
}

/// Counters for dropped-with-log protocol failures
#[derive(Default)]
pub struct Telemetry {
    pub unknown_message_type: AtomicU64,
    pub invalid_message_size: AtomicU64,
    pub unknown_index: AtomicU64,
    pub allowed_ip_violations: AtomicU64,
}

impl Telemetry {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.unknown_message_type.load(Ordering::Relaxed),
            self.invalid_message_size.load(Ordering::Relaxed),
            self.unknown_index.load(Ordering::Relaxed),
            self.allowed_ip_violations.load(Ordering::Relaxed),
        )
    }
}

#[derive(Default)]
pub struct IndexTable {
    entries: RwLock<HashMap<u32, IndexEntry>>,
    pub telemetry: Telemetry,
}

impl IndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh index for a pending handshake. Zero is never
    /// handed out (it doubles as "unset"), and collisions are retried
    /// within a small bound.
    pub fn new_index_for_handshake(
        &self,
        rng: &mut dyn RngCore,
        peer: NoisePublicKey,
    ) -> Result<u32, DeviceError> {
        let mut entries = self.entries.write().expect("index table lock");
        for _ in 0..MAX_INDEX_ATTEMPTS {
            let index = rng.next_u32();
            if index == 0 || entries.contains_key(&index) {
                continue;
            }
            entries.insert(index, IndexEntry::Handshake { peer });
            return Ok(index);
        }
        Err(DeviceError::IndexCollision {
            attempts: MAX_INDEX_ATTEMPTS,
        })
    }

    /// Remap an index from its consumed handshake onto the derived keypair
    pub fn swap_index_for_keypair(&self, index: u32, peer: NoisePublicKey, keypair: Arc<Keypair>) {
        let mut entries = self.entries.write().expect("index table lock");
        entries.insert(index, IndexEntry::Keypair { peer, keypair });
    }

    pub fn lookup(&self, index: u32) -> Option<IndexEntry> {
        self.entries
            .read()
            .expect("index table lock")
            .get(&index)
            .cloned()
    }

    pub fn delete(&self, index: u32) {
        if index == 0 {
            return;
        }
        self.entries.write().expect("index table lock").remove(&index);
    }

    pub fn clear(&self) {
        self.entries.write().expect("index table lock").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("index table lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_unique() {
        let table = IndexTable::new();
        let mut rng = rand::thread_rng();
        let peer = NoisePublicKey::default();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let index = table.new_index_for_handshake(&mut rng, peer).unwrap();
            assert_ne!(index, 0);
            assert!(seen.insert(index));
        }
        assert_eq!(table.len(), 1000);
    }

    #[test]
    fn test_delete_and_lookup() {
        let table = IndexTable::new();
        let mut rng = rand::thread_rng();
        let peer = NoisePublicKey([3u8; 33]);

        let index = table.new_index_for_handshake(&mut rng, peer).unwrap();
        match table.lookup(index) {
            Some(IndexEntry::Handshake { peer: p }) => assert_eq!(p, peer),
            _ => panic!("expected a handshake entry"),
        }

        table.delete(index);
        assert!(table.lookup(index).is_none());
    }

    #[test]
    fn test_delete_zero_is_noop() {
        let table = IndexTable::new();
        table.delete(0);
        assert!(table.is_empty());
    }
}
