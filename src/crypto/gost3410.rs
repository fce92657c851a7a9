//! GOST R 34.10-2012 elliptic curves and VKO key agreement (RFC 7836)
//!
//! Curve arithmetic is affine Weierstrass with big-integer coordinates.
//! Curve parameter sets are immutable process-wide statics; all scratch
//! values live on the stack so a curve may be shared freely between threads.
//!
//! Key byte order follows the standard: the external (hex/wire) form of a
//! private key and of raw point coordinates is little-endian, the internal
//! big-integer form is big-endian. `reverse`/`reversed` convert between the
//! two.

use std::sync::LazyLock;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::RngCore;

use crate::crypto::streebog;
use crate::error::CryptoError;

/// Bounded replacement for the reference implementation's retry-goto in
/// signature generation.
const MAX_SIGN_ATTEMPTS: u32 = 128;

/// An elliptic curve in canonical Weierstrass form, optionally carrying
/// twisted Edwards coefficients. Immutable after construction.
pub struct Curve {
    pub name: &'static str,

    /// Characteristic of the underlying prime field
    p: BigUint,
    /// Subgroup order
    q: BigUint,
    /// Cofactor
    co: BigUint,

    /// Weierstrass equation coefficients
    a: BigUint,
    b: BigUint,

    /// Twisted Edwards coefficients, when the parameter set defines them
    e: Option<BigUint>,
    d: Option<BigUint>,

    /// Base point
    x: BigUint,
    y: BigUint,
}

fn hex_uint(s: &str) -> BigUint {
    BigUint::parse_bytes(s.as_bytes(), 16).expect("valid hex constant")
}

/// Reverse bytes in place (little-endian <-> big-endian)
pub fn reverse(d: &mut [u8]) {
    d.reverse();
}

/// Reversed copy
pub fn reversed(d: &[u8]) -> Vec<u8> {
    let mut e = d.to_vec();
    e.reverse();
    e
}

/// Big-endian bytes left-padded to `size`
fn pad_be(v: &BigUint, size: usize) -> Vec<u8> {
    let bytes = v.to_bytes_be();
    let mut out = vec![0u8; size - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}

/// UKM (VKO factor) from its little-endian wire form
pub fn new_ukm(raw: &[u8]) -> BigUint {
    BigUint::from_bytes_le(raw)
}

impl Curve {
    fn new(
        name: &'static str,
        p: &str,
        q: &str,
        a: &str,
        b: &str,
        x: &str,
        y: &str,
        e: Option<&str>,
        d: Option<&str>,
        co: &str,
    ) -> Self {
        let c = Curve {
            name,
            p: hex_uint(p),
            q: hex_uint(q),
            co: hex_uint(co),
            a: hex_uint(a),
            b: hex_uint(b),
            e: e.map(hex_uint),
            d: d.map(hex_uint),
            x: hex_uint(x),
            y: hex_uint(y),
        };
        assert!(
            c.is_on_curve(&c.x, &c.y),
            "curve parameters are self-consistent"
        );
        c
    }

    /// Coordinate size in bytes: 32 for 256-bit sets, 64 for 512-bit sets
    pub fn point_size(&self) -> usize {
        if self.p.bits() > 256 {
            64
        } else {
            32
        }
    }

    pub fn subgroup_order(&self) -> &BigUint {
        &self.q
    }

    /// Right side of y^2 = x^3 + ax + b
    fn polynomial(&self, x: &BigUint) -> BigUint {
        (x * x * x + &self.a * x + &self.b) % &self.p
    }

    pub fn is_on_curve(&self, x: &BigUint, y: &BigUint) -> bool {
        if x >= &self.p || y >= &self.p {
            return false;
        }
        (y * y) % &self.p == self.polynomial(x)
    }

    fn mod_sub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        ((a + &self.p) - b) % &self.p
    }

    /// Affine point addition (doubling when the operands coincide). Fails
    /// when the slope denominator is not invertible, which only happens for
    /// inputs outside the prime-order subgroup.
    fn add(
        &self,
        p1: (&BigUint, &BigUint),
        p2: (&BigUint, &BigUint),
    ) -> Result<(BigUint, BigUint), CryptoError> {
        let (x1, y1) = p1;
        let (x2, y2) = p2;

        let lambda = if x1 == x2 && y1 == y2 {
            let num = (BigUint::from(3u32) * x1 * x1 + &self.a) % &self.p;
            let den = (BigUint::from(2u32) * y1) % &self.p;
            let inv = den.modinv(&self.p).ok_or(CryptoError::InvalidPoint)?;
            (num * inv) % &self.p
        } else {
            let num = self.mod_sub(y2, y1);
            let den = self.mod_sub(x2, x1);
            let inv = den.modinv(&self.p).ok_or(CryptoError::InvalidPoint)?;
            (num * inv) % &self.p
        };

        let x3 = self.mod_sub(&self.mod_sub(&((&lambda * &lambda) % &self.p), x1), x2);
        let y3 = self.mod_sub(&((&lambda * self.mod_sub(x1, &x3)) % &self.p), y1);
        Ok((x3, y3))
    }

    /// Scalar multiplication by double-and-add
    pub fn exp(
        &self,
        degree: &BigUint,
        xs: &BigUint,
        ys: &BigUint,
    ) -> Result<(BigUint, BigUint), CryptoError> {
        if degree.is_zero() {
            return Err(CryptoError::ZeroScalar);
        }
        let mut dg = degree - BigUint::one();
        let mut tx = xs.clone();
        let mut ty = ys.clone();
        let mut cx = xs.clone();
        let mut cy = ys.clone();
        while !dg.is_zero() {
            if dg.bit(0) {
                let (nx, ny) = self.add((&tx, &ty), (&cx, &cy))?;
                tx = nx;
                ty = ny;
            }
            dg >>= 1;
            let (nx, ny) = self.add((&cx, &cy), (&cx, &cy))?;
            cx = nx;
            cy = ny;
        }
        Ok((tx, ty))
    }

    /// Multiply the base point by a big-endian scalar
    pub fn scalar_base_mult(&self, k: &[u8]) -> Result<(BigUint, BigUint), CryptoError> {
        self.exp(&BigUint::from_bytes_be(k), &self.x, &self.y)
    }

    /// Raw shared point for VKO: ukm * cofactor * [priv](x, y), serialized
    /// as the little-endian Y || X form the KEK hash consumes.
    pub fn kek(
        &self,
        private: &[u8],
        x: &BigUint,
        y: &BigUint,
        ukm: &BigUint,
    ) -> Result<Vec<u8>, CryptoError> {
        let (mut kx, mut ky) = self.exp(&BigUint::from_bytes_be(private), x, y)?;
        let u = ukm * &self.co;
        if !u.is_one() {
            let (nx, ny) = self.exp(&u, &kx, &ky)?;
            kx = nx;
            ky = ny;
        }
        Ok(point_raw(self, &kx, &ky))
    }

    /// RFC 7836 VKO GOST R 34.10-2012 256-bit key agreement
    pub fn kek_2012_256(
        &self,
        private: &[u8],
        x: &BigUint,
        y: &BigUint,
        ukm: &BigUint,
    ) -> Result<[u8; 32], CryptoError> {
        let key = self.kek(private, x, y, ukm)?;
        Ok(streebog::hash(&key))
    }

    /// RFC 7836 VKO GOST R 34.10-2012 512-bit key agreement
    pub fn kek_2012_512(
        &self,
        private: &[u8],
        x: &BigUint,
        y: &BigUint,
        ukm: &BigUint,
    ) -> Result<[u8; 64], CryptoError> {
        let key = self.kek(private, x, y, ukm)?;
        Ok(streebog::hash_512(&key))
    }

    /// Twisted Edwards s/t conversion parameters
    fn edwards_st(&self) -> (BigUint, BigUint) {
        let e = self.e.as_ref().expect("curve has Edwards coefficients");
        let d = self.d.as_ref().expect("curve has Edwards coefficients");
        let inv4 = BigUint::from(4u32)
            .modinv(&self.p)
            .expect("prime modulus");
        let inv6 = BigUint::from(6u32)
            .modinv(&self.p)
            .expect("prime modulus");
        let s = (self.mod_sub(e, d) * inv4) % &self.p;
        let t = (((e + d) % &self.p) * inv6) % &self.p;
        (s, t)
    }

    /// Weierstrass (x, y) to twisted Edwards (u, v)
    pub fn xy2uv(&self, x: &BigUint, y: &BigUint) -> (BigUint, BigUint) {
        let (s, t) = self.edwards_st();
        let xt = self.mod_sub(x, &t);
        let u = (y.modinv(&self.p).expect("nonzero ordinate") * &xt) % &self.p;
        let num = self.mod_sub(&xt, &s);
        let den = ((&xt + &s) % &self.p)
            .modinv(&self.p)
            .expect("denominator invertible");
        let v = (num * den) % &self.p;
        (u, v)
    }

    /// Twisted Edwards (u, v) to Weierstrass (x, y)
    pub fn uv2xy(&self, u: &BigUint, v: &BigUint) -> (BigUint, BigUint) {
        let (s, t) = self.edwards_st();
        let num = (&s * ((BigUint::one() + v) % &self.p)) % &self.p;
        let den = self.mod_sub(&BigUint::one(), v);
        let x = ((num.clone() * den.modinv(&self.p).expect("denominator invertible")) % &self.p
            + &t)
            % &self.p;
        let y = (num
            * ((u * &den) % &self.p)
                .modinv(&self.p)
                .expect("denominator invertible"))
            % &self.p;
        (x, y)
    }
}

/// Raw little-endian Y || X point form used by VKO and `PublicKey::raw`
fn point_raw(curve: &Curve, x: &BigUint, y: &BigUint) -> Vec<u8> {
    let size = curve.point_size();
    let mut raw = pad_be(y, size);
    raw.extend_from_slice(&pad_be(x, size));
    reverse(&mut raw);
    raw
}

/// Uncompressed ANSI X9.62 encoding: 0x04 || X || Y (big-endian)
pub fn marshal(curve: &Curve, x: &BigUint, y: &BigUint) -> Vec<u8> {
    let size = curve.point_size();
    let mut out = Vec::with_capacity(1 + 2 * size);
    out.push(0x04);
    out.extend_from_slice(&pad_be(x, size));
    out.extend_from_slice(&pad_be(y, size));
    out
}

/// Compressed ANSI X9.62 encoding: (0x02 | parity(Y)) || X (big-endian)
pub fn marshal_compressed(curve: &Curve, x: &BigUint, y: &BigUint) -> Vec<u8> {
    let size = curve.point_size();
    let mut out = Vec::with_capacity(1 + size);
    out.push(0x02 | (y.bit(0) as u8));
    out.extend_from_slice(&pad_be(x, size));
    out
}

/// Inverse of `marshal`. Rejects malformed prefixes, out-of-field
/// coordinates and points off the curve.
pub fn unmarshal(curve: &Curve, data: &[u8]) -> Option<(BigUint, BigUint)> {
    let size = curve.point_size();
    if data.len() != 1 + 2 * size || data[0] != 0x04 {
        return None;
    }
    let x = BigUint::from_bytes_be(&data[1..1 + size]);
    let y = BigUint::from_bytes_be(&data[1 + size..]);
    if x >= curve.p || y >= curve.p {
        return None;
    }
    if !curve.is_on_curve(&x, &y) {
        return None;
    }
    Some((x, y))
}

/// Inverse of `marshal_compressed`. Reconstructs the ordinate as the modular
/// square root of x^3 + ax + b matching the parity bit.
pub fn unmarshal_compressed(curve: &Curve, data: &[u8]) -> Option<(BigUint, BigUint)> {
    let size = curve.point_size();
    if data.len() != 1 + size || (data[0] != 0x02 && data[0] != 0x03) {
        return None;
    }
    let x = BigUint::from_bytes_be(&data[1..]);
    if x >= curve.p {
        return None;
    }
    let y2 = curve.polynomial(&x);
    // p = 3 (mod 4) for the supported parameter sets
    let exp = (&curve.p + BigUint::one()) >> 2;
    let mut y = y2.modpow(&exp, &curve.p);
    if (&y * &y) % &curve.p != y2 {
        return None;
    }
    if y.bit(0) as u8 != data[0] & 1 {
        y = &curve.p - y;
    }
    if !curve.is_on_curve(&x, &y) {
        return None;
    }
    Some((x, y))
}

/// Generate a fresh private scalar; returns the big-endian key bytes and
/// the matching public point.
pub fn generate_key(
    curve: &Curve,
    rng: &mut dyn RngCore,
) -> Result<(Vec<u8>, BigUint, BigUint), CryptoError> {
    let mut raw = vec![0u8; curve.point_size()];
    rng.fill_bytes(&mut raw);
    reverse(&mut raw);
    let (x, y) = curve.exp(&BigUint::from_bytes_be(&raw), &curve.x, &curve.y)?;
    Ok((raw, x, y))
}

/// A private key bound to one curve
pub struct PrivateKey {
    pub curve: &'static Curve,
    pub key: BigUint,
}

impl PrivateKey {
    /// Parse the little-endian wire form. Zero keys are rejected.
    pub fn new(curve: &'static Curve, raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() != curve.point_size() {
            return Err(CryptoError::InvalidKeyLength {
                expected: curve.point_size(),
                got: raw.len(),
            });
        }
        let key = BigUint::from_bytes_le(raw);
        if key.is_zero() {
            return Err(CryptoError::ZeroScalar);
        }
        Ok(Self { curve, key })
    }

    /// Little-endian wire form
    pub fn raw(&self) -> Vec<u8> {
        let mut raw = pad_be(&self.key, self.curve.point_size());
        reverse(&mut raw);
        raw
    }

    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let (x, y) = self.curve.exp(&self.key, &self.curve.x, &self.curve.y)?;
        Ok(PublicKey {
            curve: self.curve,
            x,
            y,
        })
    }

    pub fn kek(&self, public: &PublicKey, ukm: &BigUint) -> Result<Vec<u8>, CryptoError> {
        self.curve
            .kek(&pad_be(&self.key, self.curve.point_size()), &public.x, &public.y, ukm)
    }

    pub fn kek_2012_256(&self, public: &PublicKey, ukm: &BigUint) -> Result<[u8; 32], CryptoError> {
        Ok(streebog::hash(&self.kek(public, ukm)?))
    }

    pub fn kek_2012_512(&self, public: &PublicKey, ukm: &BigUint) -> Result<[u8; 64], CryptoError> {
        Ok(streebog::hash_512(&self.kek(public, ukm)?))
    }

    /// GOST R 34.10-2012 signature over a digest. The nonce is sampled
    /// fresh until r and s are both nonzero, within a bounded retry budget.
    pub fn sign_digest(
        &self,
        digest: &[u8],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<u8>, CryptoError> {
        let q = &self.curve.q;
        let mut e = BigUint::from_bytes_be(digest) % q;
        if e.is_zero() {
            e = BigUint::one();
        }

        for _ in 0..MAX_SIGN_ATTEMPTS {
            let mut k_raw = vec![0u8; self.curve.point_size()];
            rng.fill_bytes(&mut k_raw);
            let k = BigUint::from_bytes_be(&k_raw) % q;
            if k.is_zero() {
                continue;
            }
            let (rx, _) = self.curve.exp(&k, &self.curve.x, &self.curve.y)?;
            let r = rx % q;
            if r.is_zero() {
                continue;
            }
            let s = (&self.key * &r + k * &e) % q;
            if s.is_zero() {
                continue;
            }
            let size = self.curve.point_size();
            let mut sig = pad_be(&s, size);
            sig.extend_from_slice(&pad_be(&r, size));
            return Ok(sig);
        }
        Err(CryptoError::SignRetriesExhausted)
    }
}

/// A public point bound to one curve
pub struct PublicKey {
    pub curve: &'static Curve,
    pub x: BigUint,
    pub y: BigUint,
}

impl PublicKey {
    /// Parse the little-endian raw form (Y || X reversed)
    pub fn new(curve: &'static Curve, raw: &[u8]) -> Result<Self, CryptoError> {
        let size = curve.point_size();
        if raw.len() != 2 * size {
            return Err(CryptoError::InvalidKeyLength {
                expected: 2 * size,
                got: raw.len(),
            });
        }
        let key = reversed(raw);
        Ok(Self {
            curve,
            x: BigUint::from_bytes_be(&key[size..]),
            y: BigUint::from_bytes_be(&key[..size]),
        })
    }

    /// Little-endian raw form
    pub fn raw(&self) -> Vec<u8> {
        point_raw(self.curve, &self.x, &self.y)
    }

    /// Verify a GOST R 34.10-2012 signature over a digest
    pub fn verify_digest(&self, digest: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let size = self.curve.point_size();
        if signature.len() != 2 * size {
            return Err(CryptoError::InvalidKeyLength {
                expected: 2 * size,
                got: signature.len(),
            });
        }
        let q = &self.curve.q;
        let s = BigUint::from_bytes_be(&signature[..size]);
        let r = BigUint::from_bytes_be(&signature[size..]);
        if r.is_zero() || &r >= q || s.is_zero() || &s >= q {
            return Ok(false);
        }

        let mut e = BigUint::from_bytes_be(digest) % q;
        if e.is_zero() {
            e = BigUint::one();
        }
        let v = e.modinv(q).ok_or(CryptoError::InvalidPoint)?;
        let z1 = (&s * &v) % q;
        let z2 = q - (&r * &v) % q;

        let (p1x, p1y) = self.curve.exp(&z1, &self.curve.x, &self.curve.y)?;
        let (q1x, q1y) = self.curve.exp(&z2, &self.x, &self.y)?;
        let (cx, _) = self.curve.add((&p1x, &p1y), (&q1x, &q1y))?;

        Ok(cx % q == r)
    }
}

/// id-tc26-gost-3410-2012-256-paramSetA: the handshake curve
pub fn tc26_gost_3410_2012_256_param_set_a() -> &'static Curve {
    static CURVE: LazyLock<Curve> = LazyLock::new(|| {
        Curve::new(
            "id-tc26-gost-3410-2012-256-paramSetA",
            "fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffd97",
            "400000000000000000000000000000000fd8cddfc87b6635c115af556c360c67",
            "c2173f1513981673af4892c23035a27ce25e2013bf95aa33b22c656f277e7335",
            "295f9bae7428ed9ccc20e7c359a9d41a22fccd9108e17bf7ba9337a6f8ae9513",
            "91e38443a5e82c0d880923425712b2bb658b9196932e02c78b2582fe742daa28",
            "32879423ab1a0375895786c4bb46e9565fde0b5344766740af268adb32322e5c",
            Some("01"),
            Some("0605f6b7c183fa81578bc39cfad518132b9df62897009af7e522c32d6dc7bffb"),
            "01",
        )
    });
    &CURVE
}

/// id-tc26-gost-3410-12-512-paramSetA: used by the RFC 7836 VKO vectors
pub fn tc26_gost_3410_2012_512_param_set_a() -> &'static Curve {
    static CURVE: LazyLock<Curve> = LazyLock::new(|| {
        Curve::new(
            "id-tc26-gost-3410-12-512-paramSetA",
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff\
             fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffdc7",
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff\
             27e69532f48d89116ff22b8d4e0560609b4b38abfad2b85dcacdb1411f10b275",
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff\
             fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffdc4",
            "e8c2505dedfc86ddc1bd0b2b6667f1da34b82574761cb0e879bd081cfd0b6265\
             ee3cb090f30d27614cb4574010da90dd862ef9d4ebee4761503190785a71c760",
            "0000000000000000000000000000000000000000000000000000000000000000\
             0000000000000000000000000000000000000000000000000000000000000003",
            "7503cfe87a836ae3a61b8816e25450e6ce5e1c93acf1abc1778064fdcbefa921\
             df1626be4fd036e93d75e6a50e3a41e98028fe5fc235f5b889a589cb5215f2a4",
            None,
            None,
            "01",
        )
    });
    &CURVE
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn curve256() -> &'static Curve {
        tc26_gost_3410_2012_256_param_set_a()
    }

    #[test]
    fn test_base_point_on_curve() {
        let c = curve256();
        assert!(c.is_on_curve(&c.x, &c.y));
        let c512 = tc26_gost_3410_2012_512_param_set_a();
        assert!(c512.is_on_curve(&c512.x, &c512.y));
    }

    #[test]
    fn test_zero_scalar_rejected() {
        let c = curve256();
        assert!(matches!(
            c.scalar_base_mult(&[0u8; 32]),
            Err(CryptoError::ZeroScalar)
        ));
    }

    #[test]
    fn test_compressed_roundtrip() {
        let c = curve256();
        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let (_, x, y) = generate_key(c, &mut rng).unwrap();
            let compressed = marshal_compressed(c, &x, &y);
            assert_eq!(compressed.len(), 33);
            let (ux, uy) = unmarshal_compressed(c, &compressed).unwrap();
            assert_eq!((ux, uy), (x, y));
        }
    }

    #[test]
    fn test_uncompressed_roundtrip() {
        let c = curve256();
        let mut rng = rand::thread_rng();
        let (_, x, y) = generate_key(c, &mut rng).unwrap();
        let raw = marshal(c, &x, &y);
        assert_eq!(raw.len(), 65);
        let (ux, uy) = unmarshal(c, &raw).unwrap();
        assert_eq!((ux, uy), (x, y));
    }

    #[test]
    fn test_unmarshal_compressed_rejects_bad_input() {
        let c = curve256();
        assert!(unmarshal_compressed(c, &[0u8; 33]).is_none());
        let mut all_ff = [0xffu8; 33];
        all_ff[0] = 0x02;
        // X >= p
        assert!(unmarshal_compressed(c, &all_ff).is_none());
        assert!(unmarshal_compressed(c, &[0x02; 16]).is_none());
    }

    #[test]
    fn test_vko_agreement_random() {
        let c = curve256();
        let mut rng = rand::thread_rng();
        let ukm = BigUint::one();
        for _ in 0..4 {
            let (ka, xa, ya) = generate_key(c, &mut rng).unwrap();
            let (kb, xb, yb) = generate_key(c, &mut rng).unwrap();
            let s1 = c.kek_2012_256(&ka, &xb, &yb, &ukm).unwrap();
            let s2 = c.kek_2012_256(&kb, &xa, &ya, &ukm).unwrap();
            assert_eq!(s1, s2);
        }
    }

    #[test]
    fn test_vko_rfc7836_vectors() {
        // RFC 7836 section 4.5 interop keys over the 512-bit paramSetA
        let c = tc26_gost_3410_2012_512_param_set_a();
        let ukm = new_ukm(&hex!("1d80603c8544c727"));

        let prv_a = PrivateKey::new(
            c,
            &hex!(
                "c990ecd972fce84ec4db022778f50fcac726f46708384b8d458304962d7147f8
                 c2db41cef22c90b102f2968404f9b9be6d47c79692d81826b32b8daca43cb667"
            ),
        )
        .unwrap();
        let pub_a = PublicKey::new(
            c,
            &hex!(
                "aab0eda4abff21208d18799fb9a8556654ba783070eba10cb9abb253ec56dcf5
                 d3ccba6192e464e6e5bcb6dea137792f2431f6c897eb1b3c0cc14327b1adc0a7
                 914613a3074e363aedb204d38d3563971bd8758e878c9db11403721b48002d38
                 461f92472d40ea92f9958c0ffa4c93756401b97f89fdbe0b5e46e4a4631cdb5a"
            ),
        )
        .unwrap();
        let prv_b = PrivateKey::new(
            c,
            &hex!(
                "48c859f7b6f11585887cc05ec6ef1390cfea739b1a18c0d4662293ef63b79e3b
                 8014070b44918590b4b996acfea4edfbbbcccc8c06edd8bf5bda92a51392d0db"
            ),
        )
        .unwrap();
        let pub_b = PublicKey::new(
            c,
            &hex!(
                "192fe183b9713a077253c72c8735de2ea42a3dbc66ea317838b65fa32523cd5e
                 fca974eda7c863f4954d1147f1f2b25c395fce1c129175e876d132e94ed5a651
                 04883b414c9b592ec4dc84826f07d0b6d9006dda176ce48c391e3f97d102e03b
                 b598bf132a228a45f7201aba08fc524a2d77e43a362ab022ad4028f75bde3b79"
            ),
        )
        .unwrap();

        let kek_a = prv_a.kek_2012_256(&pub_b, &ukm).unwrap();
        let kek_b = prv_b.kek_2012_256(&pub_a, &ukm).unwrap();
        assert_eq!(kek_a, kek_b);
        assert_eq!(
            kek_a,
            hex!("c9a9a77320e2cc559ed72dce6f47e2192ccea95fa648670582c054c0ef36c221")
        );

        let kek_a = prv_a.kek_2012_512(&pub_b, &ukm).unwrap();
        let kek_b = prv_b.kek_2012_512(&pub_a, &ukm).unwrap();
        assert_eq!(kek_a, kek_b);
        assert_eq!(
            kek_a,
            hex!(
                "79f002a96940ce7bde3259a52e015297adaad84597a0d205b50e3e1719f97bfa
                 7ee1d2661fa9979a5aa235b558a7e6d9f88f982dd63fc35a8ec0dd5e242d3bdf"
            )
        );
    }

    #[test]
    fn test_private_key_roundtrip() {
        let c = curve256();
        let raw = hex!("e84b5a6d2717c1003a13b431570353dbaca9146cf150c5f8575680feba52027a");
        let prv = PrivateKey::new(c, &raw).unwrap();
        assert_eq!(prv.raw(), raw);
    }

    #[test]
    fn test_sign_verify() {
        let c = curve256();
        let mut rng = rand::thread_rng();
        let (key_be, _, _) = generate_key(c, &mut rng).unwrap();
        let prv = PrivateKey::new(c, &reversed(&key_be)).unwrap();
        let public = prv.public_key().unwrap();

        let digest = crate::crypto::streebog::hash(b"message to be signed");
        let sig = prv.sign_digest(&digest, &mut rng).unwrap();
        assert!(public.verify_digest(&digest, &sig).unwrap());

        let other = crate::crypto::streebog::hash(b"a different message");
        assert!(!public.verify_digest(&other, &sig).unwrap());
    }

    #[test]
    fn test_edwards_conversion_roundtrip() {
        let c = curve256();
        let mut rng = rand::thread_rng();
        let (_, x, y) = generate_key(c, &mut rng).unwrap();
        let (u, v) = c.xy2uv(&x, &y);
        let (rx, ry) = c.uv2xy(&u, &v);
        assert_eq!((rx, ry), (x, y));
    }
}
