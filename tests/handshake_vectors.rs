//! Pinned handshake and transport vectors
//!
//! Two devices with fixed static and ephemeral keys must reproduce the
//! known chain-key states after each handshake message, and the derived
//! session keys must produce the known transport ciphertexts.

use std::collections::VecDeque;
use std::sync::Arc;

use hex_literal::hex;
use rand::RngCore;

use ruguard::device::Device;
use ruguard::protocol::keys::NoisePrivateKey;
use ruguard::protocol::messages::MessageType;

/// Entropy source that plays back scripted reads (the ephemeral keys) and
/// falls through to the OS for everything else (session indices).
struct ScriptedRng {
    script: VecDeque<Vec<u8>>,
}

impl ScriptedRng {
    fn new(script: &[&[u8]]) -> Self {
        ScriptedRng {
            script: script.iter().map(|s| s.to_vec()).collect(),
        }
    }
}

impl RngCore for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        rand::rngs::OsRng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        rand::rngs::OsRng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let scripted = self
            .script
            .front()
            .map(|s| s.len() == dest.len())
            .unwrap_or(false);
        if scripted {
            dest.copy_from_slice(&self.script.pop_front().expect("front checked"));
        } else {
            rand::rngs::OsRng.fill_bytes(dest);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

fn static_device(static_hex: &str, ephemeral: &[u8]) -> Arc<Device> {
    let device = Arc::new(Device::with_rng(Box::new(ScriptedRng::new(&[ephemeral]))));
    device
        .set_private_key(NoisePrivateKey::from_maybe_zero_hex(static_hex).unwrap())
        .unwrap();
    device
}

fn transport_ad(sender_index: u32, receiver_index: u32) -> [u8; 12] {
    let mut ad = [0u8; 12];
    ad[0..4].copy_from_slice(&(MessageType::TransportData as u32).to_le_bytes());
    ad[4..8].copy_from_slice(&sender_index.to_le_bytes());
    ad[8..12].copy_from_slice(&receiver_index.to_le_bytes());
    ad
}

#[test]
fn handshake_and_transport_vectors() {
    let initiator = static_device(
        "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        &hex!("2122232425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f40"),
    );
    let responder = static_device(
        "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20",
        &hex!("202122232425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f"),
    );

    let peer1 = responder.create_peer(initiator.public_key()).unwrap();
    let peer2 = initiator.create_peer(responder.public_key()).unwrap();

    {
        let h1 = peer1.handshake.read().unwrap();
        let h2 = peer2.handshake.read().unwrap();
        assert_eq!(h1.precomputed_static_static, h2.precomputed_static_static);
    }

    // initiation
    let msg1 = initiator.create_initiation(&peer2).unwrap();
    assert!(responder.consume_initiation(&msg1).is_some());

    {
        let h1 = peer1.handshake.read().unwrap();
        let h2 = peer2.handshake.read().unwrap();
        assert_eq!(h1.chain_key, h2.chain_key);
        assert_eq!(h1.hash, h2.hash);
        assert_eq!(
            h1.chain_key,
            hex!("69b5cc4a8d6956325b0ab2939a3fad634000cdb9e0b647101a325805772fe13d")
        );
    }

    // response
    let msg2 = responder.create_response(&peer1).unwrap();
    assert!(initiator.consume_response(&msg2).is_some());

    {
        let h1 = peer1.handshake.read().unwrap();
        let h2 = peer2.handshake.read().unwrap();
        assert_eq!(h1.chain_key, h2.chain_key);
        assert_eq!(h1.hash, h2.hash);
        assert_eq!(
            h2.chain_key,
            hex!("22bf0e8be82132d8ee3f2d0ec52d27f542b5689b778eb8f2b19665b69494e27c")
        );
    }

    // session keys
    initiator.begin_symmetric_session(&peer2).unwrap();
    responder.begin_symmetric_session(&peer1).unwrap();

    let key1 = peer1.keypairs.next().expect("responder keypair in next");
    let key2 = peer2.keypairs.current().expect("initiator keypair current");

    let initiator_index = 1u32;
    let responder_index = 2u32;
    let nonce = [0u8; 16];

    // transport vector, first direction
    let plaintext = b"ru wireguard test message 1-----";
    let sealed = key1
        .send
        .seal(&nonce, plaintext, &transport_ad(initiator_index, responder_index));
    assert_eq!(
        sealed,
        hex!(
            "9d652aa28d7c6abef1f7f4dbdc8b3745af776cc2ef10199066bcaf179203edd5
             282656b14ef89945942bdf8a1063f868"
        )
    );
    let opened = key2
        .receive
        .open(&nonce, &sealed, &transport_ad(initiator_index, responder_index))
        .unwrap();
    assert_eq!(opened, plaintext);

    // transport vector, reverse direction
    let plaintext = b"ru wireguard test message 2-----";
    let sealed = key2
        .send
        .seal(&nonce, plaintext, &transport_ad(responder_index, initiator_index));
    assert_eq!(
        sealed,
        hex!(
            "c11b69a043ff5b77afd1b6b1b0ecaa3a3f6e46cc40814b50d99b49179e00ffa7
             3c14186c574954fa26522f50ee3b2f8b"
        )
    );
    let opened = key1
        .receive
        .open(&nonce, &sealed, &transport_ad(responder_index, initiator_index))
        .unwrap();
    assert_eq!(opened, plaintext);
}
