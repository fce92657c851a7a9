//! Kuznyechik (GOST R 34.12-2015) block cipher
//!
//! 128-bit block, 256-bit key, ten rounds of an LS network. Round keys come
//! from a 32-iteration Feistel schedule with constants C_i = L(i). Encryption
//! and decryption run off three process-wide lookup tables (LS for
//! encryption, SL and L-inverse for decryption) computed once on first use;
//! decryption round keys are the encryption keys with L-inverse applied to
//! rounds 2..10.

use std::sync::OnceLock;

use crate::error::CryptoError;

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Cipher key size in bytes
pub const KEY_SIZE: usize = 32;

const ROUNDS: usize = 10;

/// Pi substitution from RFC 7801
const PI: [u8; 256] = [
    0xFC, 0xEE, 0xDD, 0x11, 0xCF, 0x6E, 0x31, 0x16, 0xFB, 0xC4, 0xFA, 0xDA, 0x23, 0xC5, 0x04, 0x4D,
    0xE9, 0x77, 0xF0, 0xDB, 0x93, 0x2E, 0x99, 0xBA, 0x17, 0x36, 0xF1, 0xBB, 0x14, 0xCD, 0x5F, 0xC1,
    0xF9, 0x18, 0x65, 0x5A, 0xE2, 0x5C, 0xEF, 0x21, 0x81, 0x1C, 0x3C, 0x42, 0x8B, 0x01, 0x8E, 0x4F,
    0x05, 0x84, 0x02, 0xAE, 0xE3, 0x6A, 0x8F, 0xA0, 0x06, 0x0B, 0xED, 0x98, 0x7F, 0xD4, 0xD3, 0x1F,
    0xEB, 0x34, 0x2C, 0x51, 0xEA, 0xC8, 0x48, 0xAB, 0xF2, 0x2A, 0x68, 0xA2, 0xFD, 0x3A, 0xCE, 0xCC,
    0xB5, 0x70, 0x0E, 0x56, 0x08, 0x0C, 0x76, 0x12, 0xBF, 0x72, 0x13, 0x47, 0x9C, 0xB7, 0x5D, 0x87,
    0x15, 0xA1, 0x96, 0x29, 0x10, 0x7B, 0x9A, 0xC7, 0xF3, 0x91, 0x78, 0x6F, 0x9D, 0x9E, 0xB2, 0xB1,
    0x32, 0x75, 0x19, 0x3D, 0xFF, 0x35, 0x8A, 0x7E, 0x6D, 0x54, 0xC6, 0x80, 0xC3, 0xBD, 0x0D, 0x57,
    0xDF, 0xF5, 0x24, 0xA9, 0x3E, 0xA8, 0x43, 0xC9, 0xD7, 0x79, 0xD6, 0xF6, 0x7C, 0x22, 0xB9, 0x03,
    0xE0, 0x0F, 0xEC, 0xDE, 0x7A, 0x94, 0xB0, 0xBC, 0xDC, 0xE8, 0x28, 0x50, 0x4E, 0x33, 0x0A, 0x4A,
    0xA7, 0x97, 0x60, 0x73, 0x1E, 0x00, 0x62, 0x44, 0x1A, 0xB8, 0x38, 0x82, 0x64, 0x9F, 0x26, 0x41,
    0xAD, 0x45, 0x46, 0x92, 0x27, 0x5E, 0x55, 0x2F, 0x8C, 0xA3, 0xA5, 0x7D, 0x69, 0xD5, 0x95, 0x3B,
    0x07, 0x58, 0xB3, 0x40, 0x86, 0xAC, 0x1D, 0xF7, 0x30, 0x37, 0x6B, 0xE4, 0x88, 0xD9, 0xE7, 0x89,
    0xE1, 0x1B, 0x83, 0x49, 0x4C, 0x3F, 0xF8, 0xFE, 0x8D, 0x53, 0xAA, 0x90, 0xCA, 0xD8, 0x85, 0x61,
    0x20, 0x71, 0x67, 0xA4, 0x2D, 0x2B, 0x09, 0x5B, 0xCB, 0x9B, 0x25, 0xD0, 0xBE, 0xE5, 0x6C, 0x52,
    0x59, 0xA6, 0x74, 0xD2, 0xE6, 0xF4, 0xB4, 0xC0, 0xD1, 0x66, 0xAF, 0xC2, 0x39, 0x4B, 0x63, 0xB6,
];

/// L-function coefficient vector from RFC 7801
const L_VECTOR: [u8; 16] = [
    0x94, 0x20, 0x85, 0x10, 0xC2, 0xC0, 0x01, 0xFB, 0x01, 0xC0, 0xC2, 0x10, 0x85, 0x20, 0x94, 0x01,
];

type Block = [u8; BLOCK_SIZE];
type RoundKeys = [Block; ROUNDS];

/// Multiplication in GF(2^8) modulo P(x) = x^8 + x^7 + x^6 + x + 1 (0xC3)
fn gf2_mul(mut x: u8, mut y: u8) -> u8 {
    let mut z = 0u8;
    while y != 0 {
        if y & 1 == 1 {
            z ^= x;
        }
        if x & 0x80 != 0 {
            x = (x << 1) ^ 0xC3;
        } else {
            x <<= 1;
        }
        y >>= 1;
    }
    z
}

/// Linear transformation L: sixteen rounds of the R shift register
fn l_transform(mut block: Block) -> Block {
    for _ in 0..16 {
        let mut x = block[15];
        for i in (0..15).rev() {
            block[i + 1] = block[i];
            x ^= gf2_mul(block[i], L_VECTOR[i]);
        }
        block[0] = x;
    }
    block
}

/// Inverse of L
fn l_inverse(mut block: Block) -> Block {
    for _ in 0..16 {
        let mut x = block[0];
        for i in 0..15 {
            block[i] = block[i + 1];
            x ^= gf2_mul(block[i], L_VECTOR[i]);
        }
        block[15] = x;
    }
    block
}

fn xor_blocks(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Process-wide lookup tables, immutable after first initialization and
/// shared without locks.
struct Tables {
    /// S then L, per (byte position, byte value); drives encryption rounds
    ls_enc: Vec<[Block; 256]>,
    /// L-inverse alone; applied once before the decryption rounds and to
    /// derive decryption round keys
    l_inv: Vec<[Block; 256]>,
    /// inverse S then L-inverse; drives decryption rounds
    sl_dec: Vec<[Block; 256]>,
    pi_inv: [u8; 256],
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(|| {
        let mut pi_inv = [0u8; 256];
        for (i, &v) in PI.iter().enumerate() {
            pi_inv[v as usize] = i as u8;
        }

        let mut ls_enc = vec![[[0u8; BLOCK_SIZE]; 256]; BLOCK_SIZE];
        let mut l_inv = vec![[[0u8; BLOCK_SIZE]; 256]; BLOCK_SIZE];
        let mut sl_dec = vec![[[0u8; BLOCK_SIZE]; 256]; BLOCK_SIZE];

        for pos in 0..BLOCK_SIZE {
            for val in 0..256 {
                let mut x = [0u8; BLOCK_SIZE];
                x[pos] = PI[val];
                ls_enc[pos][val] = l_transform(x);

                let mut x = [0u8; BLOCK_SIZE];
                x[pos] = val as u8;
                l_inv[pos][val] = l_inverse(x);

                let mut x = [0u8; BLOCK_SIZE];
                x[pos] = pi_inv[val];
                sl_dec[pos][val] = l_inverse(x);
            }
        }

        Tables {
            ls_enc,
            l_inv,
            sl_dec,
            pi_inv,
        }
    })
}

/// Combined table application: XOR of the 16 per-byte table rows
fn lookup(table: &[[Block; 256]], block: &Block) -> Block {
    let mut r = table[0][block[0] as usize];
    for j in 1..BLOCK_SIZE {
        let row = &table[j][block[j] as usize];
        for k in 0..BLOCK_SIZE {
            r[k] ^= row[k];
        }
    }
    r
}

/// Expand the 256-bit key into ten 128-bit round keys
fn stretch_key(key: &[u8; KEY_SIZE]) -> RoundKeys {
    let mut rkeys = [[0u8; BLOCK_SIZE]; ROUNDS];

    let mut x = [0u8; BLOCK_SIZE];
    let mut y = [0u8; BLOCK_SIZE];
    x.copy_from_slice(&key[..BLOCK_SIZE]);
    y.copy_from_slice(&key[BLOCK_SIZE..]);

    rkeys[0] = x;
    rkeys[1] = y;

    for i in 1u8..=32 {
        // C_i = L(Vec128(i))
        let mut c = [0u8; BLOCK_SIZE];
        c[15] = i;
        let c = l_transform(c);

        let mut z = [0u8; BLOCK_SIZE];
        for k in 0..BLOCK_SIZE {
            z[k] = PI[(x[k] ^ c[k]) as usize];
        }
        let mut z = l_transform(z);
        for k in 0..BLOCK_SIZE {
            z[k] ^= y[k];
        }
        y = x;
        x = z;

        if i % 8 == 0 {
            rkeys[(i >> 2) as usize] = x;
            rkeys[(i >> 2) as usize + 1] = y;
        }
    }

    rkeys
}

/// Decryption round keys: L-inverse of rounds 2..10, round 1 unchanged
fn decrypt_round_keys(rkeys: &RoundKeys) -> RoundKeys {
    let mut out = [[0u8; BLOCK_SIZE]; ROUNDS];
    out[0] = rkeys[0];
    for k in 1..ROUNDS {
        out[k] = l_inverse(rkeys[k]);
    }
    out
}

/// A Kuznyechik instance with both key schedules expanded
#[derive(Clone)]
pub struct Kuznyechik {
    enc_keys: RoundKeys,
    dec_keys: RoundKeys,
}

impl Kuznyechik {
    /// Expand `key` into round keys. Only 256-bit keys are accepted.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                got: key.len(),
            });
        }
        let mut k = [0u8; KEY_SIZE];
        k.copy_from_slice(key);
        let enc_keys = stretch_key(&k);
        let dec_keys = decrypt_round_keys(&enc_keys);
        tables();
        Ok(Self { enc_keys, dec_keys })
    }

    /// Encrypt a single 128-bit block
    pub fn encrypt_block(&self, block: Block) -> Block {
        let t = tables();
        let mut ct = block;
        for round in 0..9 {
            ct = xor_blocks(&ct, &self.enc_keys[round]);
            ct = lookup(&t.ls_enc, &ct);
        }
        xor_blocks(&ct, &self.enc_keys[9])
    }

    /// Decrypt a single 128-bit block
    pub fn decrypt_block(&self, block: Block) -> Block {
        let t = tables();
        let mut pt = lookup(&t.l_inv, &block);
        for round in (2..ROUNDS).rev() {
            pt = xor_blocks(&pt, &self.dec_keys[round]);
            pt = lookup(&t.sl_dec, &pt);
        }
        for k in 0..BLOCK_SIZE {
            pt[k] ^= self.dec_keys[1][k];
            pt[k] = t.pi_inv[pt[k] as usize];
            pt[k] ^= self.dec_keys[0][k];
        }
        pt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_l_transform_vector() {
        // RFC 7801 L vector
        let input = hex!("64a59400000000000000000000000000");
        assert_eq!(l_transform(input), hex!("d456584dd0e3e84cc3166e4b7fa2890d"));
    }

    #[test]
    fn test_l_inverse_roundtrip() {
        let block = hex!("000102030405060708090a0b0c0d0e0f");
        assert_eq!(l_inverse(l_transform(block)), block);
    }

    #[test]
    fn test_rfc7801_vector() {
        let key = hex!("8899aabbccddeeff0011223344556677fedcba98765432100123456789abcdef");
        let pt = hex!("1122334455667700ffeeddccbbaa9988");
        let ct = hex!("7f679d90bebc24305a468d42b9d4edcd");

        let cipher = Kuznyechik::new(&key).unwrap();
        assert_eq!(cipher.encrypt_block(pt), ct);
        assert_eq!(cipher.decrypt_block(ct), pt);
    }

    #[test]
    fn test_round_keys_vector() {
        // RFC 7801 key schedule: K_10
        let key = hex!("8899aabbccddeeff0011223344556677fedcba98765432100123456789abcdef");
        let rkeys = stretch_key(&key);
        assert_eq!(rkeys[9], hex!("72e9dd7416bcf45b755dbaa88e4a4043"));
    }

    #[test]
    fn test_wrong_key_size() {
        assert!(matches!(
            Kuznyechik::new(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }

    #[test]
    fn test_roundtrip_random() {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let mut key = [0u8; KEY_SIZE];
            let mut pt = [0u8; BLOCK_SIZE];
            rng.fill_bytes(&mut key);
            rng.fill_bytes(&mut pt);

            let cipher = Kuznyechik::new(&key).unwrap();
            assert_eq!(cipher.decrypt_block(cipher.encrypt_block(pt)), pt);
        }
    }
}
