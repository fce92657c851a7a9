//! Handshake message construction and consumption
//!
//! These are `Device` methods because every operation needs the static
//! identity (read lock), the per-peer handshake (write lock) and the index
//! table. Consumption paths return `None` on any policy failure (bad tag,
//! replay, flood, wrong state, degenerate ECDH) and the datagram is
//! silently dropped.

use std::sync::Arc;
use std::time::Instant;

use crate::crypto::kdf::{kdf2, kdf3};
use crate::crypto::kuznyechik::Kuznyechik;
use crate::crypto::mgm::Mgm;
use crate::crypto::streebog::is_zero;
use crate::device::peer::{Keypair, Peer, HANDSHAKE_INITIATION_RATE};
use crate::device::Device;
use crate::error::{CryptoError, ProtocolError, Result};
use crate::protocol::keys::{NoisePrivateKey, NoisePublicKey};
use crate::protocol::messages::{MessageInitiation, MessageResponse};
use crate::protocol::noise::{
    mix_hash, mix_key, HandshakeState, INITIAL_CHAIN_KEY, INITIAL_HASH, ZERO_NONCE,
};
use crate::protocol::replay::ReplayFilter;
use crate::tai64n::Timestamp;

fn handshake_aead(key: &[u8; 32]) -> Result<Mgm> {
    Ok(Mgm::new(Kuznyechik::new(key)?))
}

impl Device {
    /// Build a handshake initiation for `peer` (initiator side)
    pub fn create_initiation(&self, peer: &Arc<Peer>) -> Result<MessageInitiation> {
        let identity = self.identity();
        let mut handshake = peer.handshake.write().expect("handshake lock");

        handshake.hash = *INITIAL_HASH;
        handshake.chain_key = *INITIAL_CHAIN_KEY;
        handshake.local_ephemeral = NoisePrivateKey::generate(&mut **self.rng())?;

        let remote_static = handshake.remote_static;
        handshake.mix_hash(remote_static.as_bytes());

        let ephemeral = handshake.local_ephemeral.public_key()?;
        handshake.mix_key(ephemeral.as_bytes());
        handshake.mix_hash(ephemeral.as_bytes());

        // encrypt the static key under the ephemeral-static secret
        let ss = handshake
            .local_ephemeral
            .shared_secret(&remote_static)
            .filter(|ss| !is_zero(ss))
            .ok_or(CryptoError::ZeroEcdh)?;
        let (chain_key, key) = kdf2(&handshake.chain_key, &ss);
        handshake.chain_key = chain_key;

        let aead = handshake_aead(&key)?;
        let sealed_static = aead.seal(
            &ZERO_NONCE,
            identity.public_key().as_bytes(),
            &handshake.hash,
        );
        let mut static_encrypted = [0u8; 49];
        static_encrypted.copy_from_slice(&sealed_static);
        handshake.mix_hash(&static_encrypted);

        // encrypt the timestamp under the static-static secret
        if is_zero(&handshake.precomputed_static_static) {
            return Err(CryptoError::ZeroEcdh.into());
        }
        let (chain_key, key) = kdf2(&handshake.chain_key, &handshake.precomputed_static_static);
        handshake.chain_key = chain_key;

        let timestamp = Timestamp::now();
        let aead = handshake_aead(&key)?;
        let sealed_timestamp = aead.seal(&ZERO_NONCE, timestamp.as_bytes(), &handshake.hash);
        let mut timestamp_encrypted = [0u8; 28];
        timestamp_encrypted.copy_from_slice(&sealed_timestamp);

        // assign a fresh session index
        self.index_table.delete(handshake.local_index);
        let sender = self
            .index_table
            .new_index_for_handshake(&mut **self.rng(), remote_static)?;
        handshake.local_index = sender;

        handshake.mix_hash(&timestamp_encrypted);
        handshake.state = HandshakeState::InitiationCreated;

        Ok(MessageInitiation {
            sender,
            ephemeral: *ephemeral.as_bytes(),
            static_encrypted,
            timestamp_encrypted,
            mac1: [0u8; 32],
            mac2: [0u8; 32],
        })
    }

    /// Consume an initiation (responder side), returning the matched peer
    pub fn consume_initiation(&self, msg: &MessageInitiation) -> Option<Arc<Peer>> {
        let identity = self.identity();
        if identity.private_key().is_zero() {
            return None;
        }

        let mut hash = mix_hash(&INITIAL_HASH, identity.public_key().as_bytes());
        hash = mix_hash(&hash, &msg.ephemeral);
        let mut chain_key = mix_key(&INITIAL_CHAIN_KEY, &msg.ephemeral);

        // decrypt the static key
        let ephemeral = NoisePublicKey(msg.ephemeral);
        let ss = identity
            .private_key()
            .shared_secret(&ephemeral)
            .filter(|ss| !is_zero(ss))?;
        let (ck, key) = kdf2(&chain_key, &ss);
        chain_key = ck;
        let aead = handshake_aead(&key).ok()?;
        let peer_pk_bytes = aead.open(&ZERO_NONCE, &msg.static_encrypted, &hash).ok()?;
        hash = mix_hash(&hash, &msg.static_encrypted);
        let peer_pk = NoisePublicKey::from_bytes(&peer_pk_bytes).ok()?;

        // look up the claimed peer
        let peer = self.lookup_peer(&peer_pk)?;

        // verify identity through the timestamp
        let (timestamp, replay, flood) = {
            let handshake = peer.handshake.read().expect("handshake lock");
            if is_zero(&handshake.precomputed_static_static) {
                return None;
            }
            let (ck, key) = kdf2(&chain_key, &handshake.precomputed_static_static);
            chain_key = ck;
            let aead = handshake_aead(&key).ok()?;
            let timestamp_bytes = aead
                .open(&ZERO_NONCE, &msg.timestamp_encrypted, &hash)
                .ok()?;
            hash = mix_hash(&hash, &msg.timestamp_encrypted);
            let timestamp = Timestamp::from_bytes(timestamp_bytes.try_into().ok()?);

            let replay = !timestamp.after(&handshake.last_timestamp);
            let flood = handshake
                .last_initiation_consumption
                .map(|last| last.elapsed() <= HANDSHAKE_INITIATION_RATE)
                .unwrap_or(false);
            (timestamp, replay, flood)
        };
        if replay {
            tracing::debug!(peer = ?peer_pk, "initiation replays an old timestamp");
            return None;
        }
        if flood {
            tracing::debug!(peer = ?peer_pk, "initiation flood");
            return None;
        }

        let mut handshake = peer.handshake.write().expect("handshake lock");
        handshake.hash = hash;
        handshake.chain_key = chain_key;
        handshake.remote_index = msg.sender;
        handshake.remote_ephemeral = ephemeral;
        if timestamp.after(&handshake.last_timestamp) {
            handshake.last_timestamp = timestamp;
        }
        handshake.last_initiation_consumption = Some(Instant::now());
        handshake.state = HandshakeState::InitiationConsumed;
        drop(handshake);

        Some(peer)
    }

    /// Build a handshake response (responder side)
    pub fn create_response(&self, peer: &Arc<Peer>) -> Result<MessageResponse> {
        let mut handshake = peer.handshake.write().expect("handshake lock");
        if handshake.state != HandshakeState::InitiationConsumed {
            return Err(ProtocolError::WrongHandshakeState {
                state: handshake.state.as_str(),
                expected: HandshakeState::InitiationConsumed.as_str(),
            }
            .into());
        }

        self.index_table.delete(handshake.local_index);
        let sender = self
            .index_table
            .new_index_for_handshake(&mut **self.rng(), handshake.remote_static)?;
        handshake.local_index = sender;

        handshake.local_ephemeral = NoisePrivateKey::generate(&mut **self.rng())?;
        let ephemeral = handshake.local_ephemeral.public_key()?;
        handshake.mix_hash(ephemeral.as_bytes());
        handshake.mix_key(ephemeral.as_bytes());

        let ss = handshake
            .local_ephemeral
            .shared_secret(&handshake.remote_ephemeral)
            .ok_or(CryptoError::ZeroEcdh)?;
        handshake.mix_key(&ss);
        let ss = handshake
            .local_ephemeral
            .shared_secret(&handshake.remote_static)
            .ok_or(CryptoError::ZeroEcdh)?;
        handshake.mix_key(&ss);

        // mix the preshared key
        let (chain_key, tau, key) =
            kdf3(&handshake.chain_key, handshake.preshared_key.as_bytes());
        handshake.chain_key = chain_key;
        handshake.mix_hash(&tau);

        let aead = handshake_aead(&key)?;
        let sealed = aead.seal(&ZERO_NONCE, &[], &handshake.hash);
        let mut empty = [0u8; 16];
        empty.copy_from_slice(&sealed);
        handshake.mix_hash(&empty);

        handshake.state = HandshakeState::ResponseCreated;

        Ok(MessageResponse {
            sender,
            receiver: handshake.remote_index,
            ephemeral: *ephemeral.as_bytes(),
            empty,
            mac1: [0u8; 32],
            mac2: [0u8; 32],
        })
    }

    /// Consume a handshake response (initiator side)
    pub fn consume_response(&self, msg: &MessageResponse) -> Option<Arc<Peer>> {
        let entry = self.index_table.lookup(msg.receiver)?;
        let crate::device::index::IndexEntry::Handshake { peer: pk } = entry else {
            return None;
        };
        let peer = self.lookup_peer(&pk)?;

        let (hash, chain_key) = {
            let handshake = peer.handshake.read().expect("handshake lock");
            if handshake.state != HandshakeState::InitiationCreated {
                return None;
            }
            let identity = self.identity();

            let mut hash = mix_hash(&handshake.hash, &msg.ephemeral);
            let mut chain_key = mix_key(&handshake.chain_key, &msg.ephemeral);

            let ephemeral = NoisePublicKey(msg.ephemeral);
            let ss = handshake.local_ephemeral.shared_secret(&ephemeral)?;
            chain_key = mix_key(&chain_key, &ss);
            let ss = identity.private_key().shared_secret(&ephemeral)?;
            chain_key = mix_key(&chain_key, &ss);

            let (ck, tau, key) = kdf3(&chain_key, handshake.preshared_key.as_bytes());
            chain_key = ck;
            hash = mix_hash(&hash, &tau);

            // authenticate the transcript
            let aead = handshake_aead(&key).ok()?;
            aead.open(&ZERO_NONCE, &msg.empty, &hash).ok()?;
            hash = mix_hash(&hash, &msg.empty);

            (hash, chain_key)
        };

        let mut handshake = peer.handshake.write().expect("handshake lock");
        handshake.hash = hash;
        handshake.chain_key = chain_key;
        handshake.remote_index = msg.sender;
        handshake.state = HandshakeState::ResponseConsumed;
        drop(handshake);

        Some(peer)
    }

    /// Derive the session keypair from a completed handshake, zero the
    /// handshake, remap the index and rotate the peer's slots.
    pub fn begin_symmetric_session(&self, peer: &Arc<Peer>) -> Result<()> {
        let mut handshake = peer.handshake.write().expect("handshake lock");

        let (mut send_key, mut recv_key, is_initiator) = match handshake.state {
            HandshakeState::ResponseConsumed => {
                let (send, recv) = kdf2(&handshake.chain_key, &[]);
                (send, recv, true)
            }
            HandshakeState::ResponseCreated => {
                let (recv, send) = kdf2(&handshake.chain_key, &[]);
                (send, recv, false)
            }
            state => {
                return Err(ProtocolError::WrongHandshakeState {
                    state: state.as_str(),
                    expected: "response-created or response-consumed",
                }
                .into());
            }
        };

        let local_index = handshake.local_index;
        let remote_index = handshake.remote_index;
        let remote_static = handshake.remote_static;

        // zero the handshake
        handshake.chain_key = [0u8; 32];
        handshake.hash = [0u8; 32];
        handshake.local_ephemeral = NoisePrivateKey::default();
        handshake.state = HandshakeState::Zeroed;

        let keypair = Arc::new(Keypair {
            send: handshake_aead(&send_key)?,
            receive: handshake_aead(&recv_key)?,
            created: Instant::now(),
            send_nonce: std::sync::atomic::AtomicU64::new(0),
            replay_filter: std::sync::Mutex::new(ReplayFilter::new()),
            is_initiator,
            local_index,
            remote_index,
        });
        {
            use zeroize::Zeroize;
            send_key.zeroize();
            recv_key.zeroize();
        }

        self.index_table
            .swap_index_for_keypair(local_index, remote_static, keypair.clone());
        handshake.local_index = 0;
        drop(handshake);

        *peer.last_handshake.lock().expect("timer lock") = Some(std::time::SystemTime::now());

        let dropped = if is_initiator {
            peer.keypairs.install_initiator(keypair)
        } else {
            peer.keypairs.install_responder(keypair)
        };
        for stale in dropped {
            self.index_table.delete(stale.local_index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::MessageType;

    fn rand_device() -> Device {
        let device = Device::new();
        let sk = NoisePrivateKey::generate(&mut **device.rng()).unwrap();
        device.set_private_key(sk).unwrap();
        device.up();
        device
    }

    #[test]
    fn test_full_handshake_and_transport() {
        let dev1 = rand_device();
        let dev2 = rand_device();

        let peer1 = dev2.create_peer(dev1.public_key()).unwrap();
        let peer2 = dev1.create_peer(dev2.public_key()).unwrap();

        {
            let h1 = peer1.handshake.read().unwrap();
            let h2 = peer2.handshake.read().unwrap();
            assert_eq!(h1.precomputed_static_static, h2.precomputed_static_static);
            assert!(!is_zero(&h1.precomputed_static_static));
        }

        // initiation
        let msg1 = dev1.create_initiation(&peer2).unwrap();
        let peer = dev2.consume_initiation(&msg1).expect("initiation accepted");
        assert!(Arc::ptr_eq(&peer, &peer1));

        {
            let h1 = peer1.handshake.read().unwrap();
            let h2 = peer2.handshake.read().unwrap();
            assert_eq!(h1.chain_key, h2.chain_key);
            assert_eq!(h1.hash, h2.hash);
        }

        // response
        let msg2 = dev2.create_response(&peer1).unwrap();
        let peer = dev1.consume_response(&msg2).expect("response accepted");
        assert!(Arc::ptr_eq(&peer, &peer2));

        {
            let h1 = peer1.handshake.read().unwrap();
            let h2 = peer2.handshake.read().unwrap();
            assert_eq!(h1.chain_key, h2.chain_key);
            assert_eq!(h1.hash, h2.hash);
        }

        // key derivation
        dev1.begin_symmetric_session(&peer2).unwrap();
        dev2.begin_symmetric_session(&peer1).unwrap();

        let key1 = peer2.keypairs.current().expect("initiator current");
        let key2 = peer1.keypairs.next().expect("responder next");

        // transport both ways
        let sealed = key1.send.seal(&ZERO_NONCE, b"wireguard test message 1", &[1]);
        let opened = key2.receive.open(&ZERO_NONCE, &sealed, &[1]).unwrap();
        assert_eq!(opened, b"wireguard test message 1");

        let sealed = key2.send.seal(&ZERO_NONCE, b"wireguard test message 2", &[2]);
        let opened = key1.receive.open(&ZERO_NONCE, &sealed, &[2]).unwrap();
        assert_eq!(opened, b"wireguard test message 2");
    }

    #[test]
    fn test_initiation_replay_rejected() {
        let dev1 = rand_device();
        let dev2 = rand_device();

        dev2.create_peer(dev1.public_key()).unwrap();
        let peer2 = dev1.create_peer(dev2.public_key()).unwrap();

        let msg = dev1.create_initiation(&peer2).unwrap();
        assert!(dev2.consume_initiation(&msg).is_some());
        // same message again: timestamp is no longer strictly greater
        assert!(dev2.consume_initiation(&msg).is_none());
    }

    #[test]
    fn test_initiation_flood_rejected() {
        let dev1 = rand_device();
        let dev2 = rand_device();

        let peer1 = dev2.create_peer(dev1.public_key()).unwrap();
        let peer2 = dev1.create_peer(dev2.public_key()).unwrap();

        let first = dev1.create_initiation(&peer2).unwrap();
        assert!(dev2.consume_initiation(&first).is_some());

        // a fresh initiation within the rate window is dropped
        let second = dev1.create_initiation(&peer2).unwrap();
        peer1.handshake.write().unwrap().last_initiation_consumption = Some(Instant::now());
        assert!(dev2.consume_initiation(&second).is_none());
    }

    #[test]
    fn test_response_in_wrong_state_dropped() {
        let dev1 = rand_device();
        let dev2 = rand_device();

        let peer1 = dev2.create_peer(dev1.public_key()).unwrap();
        let peer2 = dev1.create_peer(dev2.public_key()).unwrap();

        let msg1 = dev1.create_initiation(&peer2).unwrap();
        dev2.consume_initiation(&msg1).unwrap();
        let msg2 = dev2.create_response(&peer1).unwrap();

        assert!(dev1.consume_response(&msg2).is_some());
        // replayed response: the handshake has left InitiationCreated
        assert!(dev1.consume_response(&msg2).is_none());
    }

    #[test]
    fn test_unknown_receiver_index_dropped() {
        let dev1 = rand_device();
        let msg = MessageResponse {
            sender: 7,
            receiver: 0xdeadbeef,
            ephemeral: [0u8; 33],
            empty: [0u8; 16],
            mac1: [0u8; 32],
            mac2: [0u8; 32],
        };
        assert!(dev1.consume_response(&msg).is_none());
    }

    #[test]
    fn test_transport_ad_layout() {
        // the sender authenticates type || local || remote
        let dev1 = rand_device();
        let dev2 = rand_device();
        let peer1 = dev2.create_peer(dev1.public_key()).unwrap();
        let peer2 = dev1.create_peer(dev2.public_key()).unwrap();

        let msg1 = dev1.create_initiation(&peer2).unwrap();
        dev2.consume_initiation(&msg1).unwrap();
        let msg2 = dev2.create_response(&peer1).unwrap();
        dev1.consume_response(&msg2).unwrap();
        dev1.begin_symmetric_session(&peer2).unwrap();
        dev2.begin_symmetric_session(&peer1).unwrap();

        let key1 = peer2.keypairs.current().unwrap();
        let key2 = peer1.keypairs.next().unwrap();

        let mut ad = [0u8; 12];
        ad[0..4].copy_from_slice(&(MessageType::TransportData as u32).to_le_bytes());
        ad[4..8].copy_from_slice(&key1.local_index.to_le_bytes());
        ad[8..12].copy_from_slice(&key1.remote_index.to_le_bytes());

        let mut nonce = ZERO_NONCE;
        nonce[8..].copy_from_slice(&0u64.to_be_bytes());

        let sealed = key1.send.seal(&nonce, b"cross-checked payload", &ad);
        // receiver reconstructs the same 12 bytes from its own indices
        let datagram = key1.seal_transport(b"cross-checked payload").unwrap();
        let header = crate::protocol::messages::TransportHeader::from_bytes(&datagram).unwrap();
        assert_eq!(
            crate::protocol::messages::TransportHeader::payload(&datagram),
            &sealed[..]
        );
        let opened = key2
            .open_transport(
                header.counter,
                crate::protocol::messages::TransportHeader::payload(&datagram),
            )
            .unwrap();
        assert_eq!(opened, b"cross-checked payload");
    }
}
