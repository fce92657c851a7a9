//! Noise key material
//!
//! Private keys are 256-bit scalars on the paramSetA curve, held internally
//! in big-endian order; the hex/config surface is the reversed little-endian
//! form mandated by the standard. Public keys travel as 33-byte compressed
//! points. Shared secrets come from VKO with a unit UKM.

use num_bigint::BigUint;
use num_traits::One;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::gost3410::{
    self, marshal_compressed, tc26_gost_3410_2012_256_param_set_a, unmarshal_compressed,
};
use crate::crypto::streebog;
use crate::error::CryptoError;

/// Compressed public key length: parity byte plus big-endian X
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Private scalar length
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Preshared and derived symmetric key length
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// A private scalar in big-endian byte order
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct NoisePrivateKey([u8; PRIVATE_KEY_SIZE]);

/// A compressed public point
#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub struct NoisePublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl Default for NoisePublicKey {
    fn default() -> Self {
        NoisePublicKey([0u8; PUBLIC_KEY_SIZE])
    }
}

/// An opaque 32-byte symmetric key (psk or derived transport key)
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey(pub [u8; SYMMETRIC_KEY_SIZE]);

fn load_exact_hex(dst: &mut [u8], src: &str) -> Result<(), CryptoError> {
    let decoded = hex::decode(src).map_err(|_| CryptoError::InvalidKeyLength {
        expected: dst.len(),
        got: 0,
    })?;
    if decoded.len() != dst.len() {
        return Err(CryptoError::InvalidKeyLength {
            expected: dst.len(),
            got: decoded.len(),
        });
    }
    dst.copy_from_slice(&decoded);
    Ok(())
}

impl NoisePrivateKey {
    /// Generate a fresh scalar from `rng`
    pub fn generate(rng: &mut dyn RngCore) -> Result<Self, CryptoError> {
        let curve = tc26_gost_3410_2012_256_param_set_a();
        let (key_be, _, _) = gost3410::generate_key(curve, rng)?;
        let mut sk = [0u8; PRIVATE_KEY_SIZE];
        sk.copy_from_slice(&key_be);
        Ok(Self(sk))
    }

    /// Derive the compressed public key
    pub fn public_key(&self) -> Result<NoisePublicKey, CryptoError> {
        let curve = tc26_gost_3410_2012_256_param_set_a();
        let (x, y) = curve.scalar_base_mult(&self.0)?;
        let mut pk = [0u8; PUBLIC_KEY_SIZE];
        pk.copy_from_slice(&marshal_compressed(curve, &x, &y));
        Ok(NoisePublicKey(pk))
    }

    /// VKO GOST R 34.10-2012 256-bit shared secret with ukm = 1.
    ///
    /// Returns `None` for malformed peer points or a degenerate product;
    /// callers treat that as a silent drop.
    pub fn shared_secret(&self, peer: &NoisePublicKey) -> Option<[u8; 32]> {
        let curve = tc26_gost_3410_2012_256_param_set_a();
        let (x, y) = unmarshal_compressed(curve, &peer.0)?;
        let ukm = BigUint::one();
        curve.kek_2012_256(&self.0, &x, &y, &ukm).ok()
    }

    pub fn is_zero(&self) -> bool {
        streebog::is_zero(&self.0)
    }

    /// Parse the little-endian hex form; an all-zero value is accepted and
    /// means "unset".
    pub fn from_maybe_zero_hex(src: &str) -> Result<Self, CryptoError> {
        let mut sk = [0u8; PRIVATE_KEY_SIZE];
        load_exact_hex(&mut sk, src)?;
        sk.reverse();
        Ok(Self(sk))
    }

    /// Little-endian hex form
    pub fn to_hex(&self) -> String {
        hex::encode(gost3410::reversed(&self.0))
    }

    /// Parse the little-endian raw form
    pub fn from_le_bytes(raw: &[u8; PRIVATE_KEY_SIZE]) -> Self {
        let mut sk = *raw;
        sk.reverse();
        Self(sk)
    }

    /// Little-endian raw form
    pub fn to_le_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        let mut out = self.0;
        out.reverse();
        out
    }

    /// Internal big-endian scalar bytes
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for NoisePrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl NoisePublicKey {
    pub fn from_hex(src: &str) -> Result<Self, CryptoError> {
        let mut pk = [0u8; PUBLIC_KEY_SIZE];
        load_exact_hex(&mut pk, src)?;
        Ok(Self(pk))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                got: raw.len(),
            });
        }
        let mut pk = [0u8; PUBLIC_KEY_SIZE];
        pk.copy_from_slice(raw);
        Ok(Self(pk))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        streebog::is_zero(&self.0)
    }

    /// Constant-time equality for use on authentication paths
    pub fn ct_equals(&self, other: &NoisePublicKey) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl std::fmt::Debug for NoisePublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // keys are routinely logged truncated, never in full
        write!(f, "peer({})", &self.to_hex()[..12])
    }
}

impl SymmetricKey {
    pub fn from_hex(src: &str) -> Result<Self, CryptoError> {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        load_exact_hex(&mut key, src)?;
        Ok(Self(key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        streebog::is_zero(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}
