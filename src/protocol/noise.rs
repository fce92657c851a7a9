//! Noise IKpsk2 handshake state
//!
//! Pattern: Noise_IKpsk2_GC256A_GOST_R_341112_256_WITH_KUZNYECHIK_MGM.
//! This module holds the process-wide chain constants, the mix helpers, and
//! the per-peer handshake object. The message-level operations live on
//! `device::Device`, which owns the static identity and index table they
//! need.

use std::sync::LazyLock;
use std::time::Instant;

use crate::crypto::kdf;
use crate::crypto::mgm::NONCE_SIZE;
use crate::crypto::streebog;
use crate::protocol::keys::{NoisePrivateKey, NoisePublicKey, SymmetricKey};
use crate::tai64n::Timestamp;

pub const NOISE_CONSTRUCTION: &[u8] = b"Noise_IKpsk2_GC256A_GOST_R_341112_256_WITH_KUZNYECHIK_MGM";
pub const WIREGUARD_IDENTIFIER: &[u8] = b"RU WireGuard v1 2020 zx2c4 Jason@zx2c4.com";
pub const LABEL_MAC1: &[u8] = b"RU mac1---- 2020";
pub const LABEL_COOKIE: &[u8] = b"RU cookie-- 2020";

/// Nonce for both handshake AEAD messages
pub const ZERO_NONCE: [u8; NONCE_SIZE] = [0u8; NONCE_SIZE];

/// H(NoiseConstruction)
pub static INITIAL_CHAIN_KEY: LazyLock<[u8; 32]> =
    LazyLock::new(|| streebog::hash(NOISE_CONSTRUCTION));

/// H(InitialChainKey || WireGuardIdentifier)
pub static INITIAL_HASH: LazyLock<[u8; 32]> =
    LazyLock::new(|| mix_hash(&INITIAL_CHAIN_KEY, WIREGUARD_IDENTIFIER));

/// h' = H(h || data)
pub fn mix_hash(h: &[u8; 32], data: &[u8]) -> [u8; 32] {
    streebog::hash_two(h, data)
}

/// ck' = KDF1(ck, data)
pub fn mix_key(ck: &[u8; 32], data: &[u8]) -> [u8; 32] {
    kdf::kdf1(ck, data)
}

/// Handshake phase, advanced strictly in protocol order. Any message not
/// matching the expected next state for its side is silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Zeroed,
    InitiationCreated,
    InitiationConsumed,
    ResponseCreated,
    ResponseConsumed,
}

impl HandshakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeState::Zeroed => "zeroed",
            HandshakeState::InitiationCreated => "initiation-created",
            HandshakeState::InitiationConsumed => "initiation-consumed",
            HandshakeState::ResponseCreated => "response-created",
            HandshakeState::ResponseConsumed => "response-consumed",
        }
    }
}

/// Per-peer handshake state, guarded by the peer's RwLock
pub struct Handshake {
    pub state: HandshakeState,
    /// Rolling transcript hash
    pub hash: [u8; 32],
    /// Chaining key
    pub chain_key: [u8; 32],
    pub preshared_key: SymmetricKey,
    pub local_ephemeral: NoisePrivateKey,
    /// Local session index, also the key into the index table
    pub local_index: u32,
    /// Remote session index, used when sending
    pub remote_index: u32,
    /// Peer's long-term key
    pub remote_static: NoisePublicKey,
    pub remote_ephemeral: NoisePublicKey,
    /// Precomputed static-static VKO product
    pub precomputed_static_static: [u8; 32],
    /// Greatest timestamp accepted from this peer
    pub last_timestamp: Timestamp,
    pub last_initiation_consumption: Option<Instant>,
    pub last_sent_handshake: Option<Instant>,
}

impl Handshake {
    pub fn new(remote_static: NoisePublicKey, precomputed_static_static: [u8; 32]) -> Self {
        Handshake {
            state: HandshakeState::Zeroed,
            hash: [0u8; 32],
            chain_key: [0u8; 32],
            preshared_key: SymmetricKey::default(),
            local_ephemeral: NoisePrivateKey::default(),
            local_index: 0,
            remote_index: 0,
            remote_static,
            remote_ephemeral: NoisePublicKey::default(),
            precomputed_static_static,
            last_timestamp: Timestamp::default(),
            last_initiation_consumption: None,
            last_sent_handshake: None,
        }
    }

    pub fn mix_hash(&mut self, data: &[u8]) {
        self.hash = mix_hash(&self.hash, data);
    }

    pub fn mix_key(&mut self, data: &[u8]) {
        self.chain_key = mix_key(&self.chain_key, data);
    }

    /// Zero all transient secrets and return to the initial state. The
    /// ephemeral key is dropped through its zeroizing destructor.
    pub fn clear(&mut self) {
        self.local_ephemeral = NoisePrivateKey::default();
        self.remote_ephemeral = NoisePublicKey::default();
        self.chain_key = [0u8; 32];
        self.hash = [0u8; 32];
        self.local_index = 0;
        self.state = HandshakeState::Zeroed;
    }
}
