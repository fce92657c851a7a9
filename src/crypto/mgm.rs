//! Multilinear Galois Mode AEAD over Kuznyechik
//!
//! 128-bit nonce with a reserved high bit, 128-bit tag. Encryption draws a
//! keystream from E(0 || ICN) with the low nonce half incremented per block;
//! authentication draws multipliers from E(1 || ICN) with the high half
//! incremented. The tag is MSB128(E(sum)) where sum accumulates
//! GF(2^128) products of the multipliers with the padded associated data,
//! ciphertext, and the final bit-length block.
//!
//! Nonce misuse and over-size inputs are programmer errors and abort.

use subtle::ConstantTimeEq;

use crate::crypto::kuznyechik::{Kuznyechik, BLOCK_SIZE};
use crate::error::CryptoError;

/// MGM nonce length in bytes
pub const NONCE_SIZE: usize = 16;

/// MGM authentication tag length in bytes
pub const TAG_SIZE: usize = 16;

/// Per-field size ceiling: 2^63 - 8 bits
const MAX_FIELD_BYTES: u64 = (1 << 60) - 1;

/// GF(2^128) reduction polynomial x^128 + x^7 + x^2 + x + 1
const R128: u128 = 0x87;

/// Carry-less multiplication in GF(2^128)
fn gf128_mul(mut x: u128, mut y: u128) -> u128 {
    let mut z = 0u128;
    while y != 0 {
        if y & 1 == 1 {
            z ^= x;
        }
        let carry = x >> 127;
        x <<= 1;
        if carry == 1 {
            x ^= R128;
        }
        y >>= 1;
    }
    z
}

/// Big-endian increment over a nonce half
fn incr(data: &mut [u8]) {
    for b in data.iter_mut().rev() {
        *b = b.wrapping_add(1);
        if *b != 0 {
            return;
        }
    }
}

/// MGM AEAD instance bound to one block cipher key
#[derive(Clone)]
pub struct Mgm {
    cipher: Kuznyechik,
}

impl Mgm {
    pub fn new(cipher: Kuznyechik) -> Self {
        Self { cipher }
    }

    /// Keystream pass shared by seal and open. `icn` high bit must already
    /// be cleared by the caller.
    fn crypt(&self, out: &mut [u8], input: &[u8], icn: [u8; BLOCK_SIZE]) {
        let mut counter = self.cipher.encrypt_block(icn);
        let mut offset = 0;
        while input.len() - offset >= BLOCK_SIZE {
            let gamma = self.cipher.encrypt_block(counter);
            for k in 0..BLOCK_SIZE {
                out[offset + k] = input[offset + k] ^ gamma[k];
            }
            incr(&mut counter[BLOCK_SIZE / 2..]);
            offset += BLOCK_SIZE;
        }
        if offset < input.len() {
            let gamma = self.cipher.encrypt_block(counter);
            for k in 0..input.len() - offset {
                out[offset + k] = input[offset + k] ^ gamma[k];
            }
        }
    }

    /// Authentication pass over associated data and ciphertext. `icn` high
    /// bit must already be set by the caller.
    fn auth(&self, text: &[u8], ad: &[u8], icn: [u8; BLOCK_SIZE]) -> [u8; TAG_SIZE] {
        let ad_bits = (ad.len() as u64) * 8;
        let text_bits = (text.len() as u64) * 8;

        let mut z = self.cipher.encrypt_block(icn);
        let mut sum = 0u128;

        let mut absorb = |z: &mut [u8; BLOCK_SIZE], chunk: &[u8]| {
            let mut padded = [0u8; BLOCK_SIZE];
            padded[..chunk.len()].copy_from_slice(chunk);
            let h = self.cipher.encrypt_block(*z);
            sum ^= gf128_mul(
                u128::from_be_bytes(h),
                u128::from_be_bytes(padded),
            );
            incr(&mut z[..BLOCK_SIZE / 2]);
        };

        for chunk in ad.chunks(BLOCK_SIZE) {
            absorb(&mut z, chunk);
        }
        for chunk in text.chunks(BLOCK_SIZE) {
            absorb(&mut z, chunk);
        }

        let mut lengths = [0u8; BLOCK_SIZE];
        lengths[..8].copy_from_slice(&ad_bits.to_be_bytes());
        lengths[8..].copy_from_slice(&text_bits.to_be_bytes());

        let h = self.cipher.encrypt_block(z);
        sum ^= gf128_mul(u128::from_be_bytes(h), u128::from_be_bytes(lengths));

        self.cipher.encrypt_block(sum.to_be_bytes())
    }

    fn check_sizes(&self, nonce: &[u8; NONCE_SIZE], text_len: usize, ad_len: usize) {
        if nonce[0] & 0x80 != 0 {
            panic!("mgm: nonce high bit must be zero");
        }
        if text_len == 0 && ad_len == 0 {
            panic!("mgm: either text or associated data must be non-empty");
        }
        if ad_len as u64 > MAX_FIELD_BYTES
            || text_len as u64 > MAX_FIELD_BYTES
            || (text_len as u64 + ad_len as u64) > MAX_FIELD_BYTES
        {
            panic!("mgm: input exceeds size limit");
        }
    }

    /// Encrypt and authenticate. Returns ciphertext || tag.
    pub fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8], ad: &[u8]) -> Vec<u8> {
        self.check_sizes(nonce, plaintext.len(), ad.len());

        let mut out = vec![0u8; plaintext.len() + TAG_SIZE];

        let mut icn = *nonce;
        icn[0] &= 0x7F;
        self.crypt(&mut out[..plaintext.len()], plaintext, icn);

        icn[0] |= 0x80;
        let tag = self.auth(&out[..plaintext.len()], ad, icn);
        out[plaintext.len()..].copy_from_slice(&tag);
        out
    }

    /// Authenticate and decrypt ciphertext || tag. Fails without revealing
    /// plaintext when the tag does not match.
    pub fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_SIZE {
            panic!("mgm: ciphertext shorter than tag");
        }
        let ct = &ciphertext[..ciphertext.len() - TAG_SIZE];
        self.check_sizes(nonce, ct.len(), ad.len());

        let mut icn = *nonce;
        icn[0] |= 0x80;
        let expected = self.auth(ct, ad, icn);

        let tag = &ciphertext[ciphertext.len() - TAG_SIZE..];
        if expected.ct_eq(tag).unwrap_u8() != 1 {
            return Err(CryptoError::AuthenticationFailure);
        }

        let mut out = vec![0u8; ct.len()];
        icn[0] &= 0x7F;
        self.crypt(&mut out, ct, icn);
        Ok(out)
    }
}
