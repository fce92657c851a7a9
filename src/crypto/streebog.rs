//! Streebog (GOST R 34.11-2012) primitives
//!
//! Hash, HMAC and keyed-MAC helpers used throughout the protocol. The
//! 256-bit output keys the handshake; the 512-bit output only backs the
//! VKO-512 key agreement variant.

use hmac::{Mac, SimpleHmac};
use streebog::{Digest, Streebog256, Streebog512};

/// HMAC_GOSTR3411_2012_256 (RFC 2104 HMAC over Streebog-256, block size 64)
pub type HmacStreebog256 = SimpleHmac<Streebog256>;

/// Length of a Streebog-256 digest
pub const HASH_LEN: usize = 32;

/// Length of a Streebog-512 digest
pub const HASH_512_LEN: usize = 64;

/// Streebog-256 hash of a single input
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Streebog256::new();
    Digest::update(&mut hasher, data);
    hasher.finalize().into()
}

/// Streebog-256 hash of two concatenated inputs: HASH(a || b)
pub fn hash_two(a: &[u8], b: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Streebog256::new();
    Digest::update(&mut hasher, a);
    Digest::update(&mut hasher, b);
    hasher.finalize().into()
}

/// Streebog-512 hash of a single input
pub fn hash_512(data: &[u8]) -> [u8; HASH_512_LEN] {
    let mut hasher = Streebog512::new();
    Digest::update(&mut hasher, data);
    hasher.finalize().into()
}

/// Keyed MAC based on HMAC_GOSTR3411_2012_256
///
/// Used for mac1/mac2 on handshake messages and for cookie derivation.
/// HMAC accepts any key length.
pub fn mac(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = HmacStreebog256::new_from_slice(key).expect("HMAC accepts any key length");
    Mac::update(&mut mac, data);
    mac.finalize().into_bytes().into()
}

/// Constant-time zero check over secret-derived bytes
pub fn is_zero(val: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    let mut acc = subtle::Choice::from(1u8);
    for b in val {
        acc &= b.ct_eq(&0u8);
    }
    acc.into()
}
