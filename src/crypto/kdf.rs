//! KDF_TREE_GOSTR3411_2012_256 (RFC 7836, r = 1) and the chain-key splitters
//!
//! `kdf1`/`kdf2`/`kdf3` are the handshake's key-derivation helpers: one tree
//! invocation under a fixed per-arity label, split into 32-byte values.

use hmac::{Mac, SimpleHmac};
use streebog::Streebog256;

use crate::crypto::streebog::HASH_LEN;

pub const KDF1_LABEL: &[u8] = b"KDF_GOST_R_3411_2012_256_LABEL_1";
pub const KDF2_LABEL: &[u8] = b"KDF_GOST_R_3411_2012_256_LABEL_2";
pub const KDF3_LABEL: &[u8] = b"KDF_GOST_R_3411_2012_256_LABEL_3";

/// KDF_TREE_GOSTR3411_2012_256 with r = 1.
///
/// `length` must be a positive multiple of 32 no larger than 32 * 255;
/// anything else is a programmer error.
pub fn kdf_tree(secret: &[u8], label: &[u8], seed: &[u8], length: usize) -> Vec<u8> {
    if length == 0 || length % HASH_LEN != 0 || length > HASH_LEN * 255 {
        panic!("kdf_tree: invalid length parameter");
    }

    let bit_len = (length as u16) * 8;
    let n = (length / HASH_LEN) as u8;

    let mut out = Vec::with_capacity(length);
    for i in 1..=n {
        let mut mac = SimpleHmac::<Streebog256>::new_from_slice(secret)
            .expect("HMAC accepts any key length");
        Mac::update(&mut mac, &[i]);
        Mac::update(&mut mac, label);
        Mac::update(&mut mac, &[0x00]);
        Mac::update(&mut mac, seed);
        Mac::update(&mut mac, &bit_len.to_be_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes());
    }
    out
}

/// One 32-byte output
pub fn kdf1(key: &[u8], input: &[u8]) -> [u8; HASH_LEN] {
    let prk = kdf_tree(key, KDF1_LABEL, input, HASH_LEN);
    let mut t1 = [0u8; HASH_LEN];
    t1.copy_from_slice(&prk);
    t1
}

/// Two 32-byte outputs
pub fn kdf2(key: &[u8], input: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN]) {
    let prk = kdf_tree(key, KDF2_LABEL, input, 2 * HASH_LEN);
    let mut t1 = [0u8; HASH_LEN];
    let mut t2 = [0u8; HASH_LEN];
    t1.copy_from_slice(&prk[..HASH_LEN]);
    t2.copy_from_slice(&prk[HASH_LEN..]);
    (t1, t2)
}

/// Three 32-byte outputs
pub fn kdf3(key: &[u8], input: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN], [u8; HASH_LEN]) {
    let prk = kdf_tree(key, KDF3_LABEL, input, 3 * HASH_LEN);
    let mut t1 = [0u8; HASH_LEN];
    let mut t2 = [0u8; HASH_LEN];
    let mut t3 = [0u8; HASH_LEN];
    t1.copy_from_slice(&prk[..HASH_LEN]);
    t2.copy_from_slice(&prk[HASH_LEN..2 * HASH_LEN]);
    t3.copy_from_slice(&prk[2 * HASH_LEN..]);
    (t1, t2, t3)
}
