//! Cookie / MAC DoS-protection layer
//!
//! Every handshake message carries two trailing 32-byte fields. mac1 keys
//! off the receiver's public key and is always present; mac2 keys off a
//! cookie the receiver hands out (encrypted) when under load, and is zero
//! otherwise. The checker side owns a rotating secret; the generator side
//! latches the last mac1 it sent so a cookie reply can be authenticated.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::crypto::kuznyechik::Kuznyechik;
use crate::crypto::mgm::{Mgm, NONCE_SIZE};
use crate::crypto::streebog;
use crate::error::CryptoError;
use crate::protocol::keys::NoisePublicKey;
use crate::protocol::messages::{MessageCookieReply, MAC_SIZE};
use crate::protocol::noise::{LABEL_COOKIE, LABEL_MAC1};

/// Cookie secret and received-cookie lifetime
pub const COOKIE_REFRESH_TIME: Duration = Duration::from_secs(120);

/// Random MGM nonce with the reserved high bit cleared
fn fresh_mgm_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce[0] &= 0x7F;
    nonce
}

struct CheckerState {
    mac1_key: [u8; 32],
    cookie_encryption_key: [u8; 32],
    secret: [u8; 32],
    secret_set: Option<Instant>,
}

/// Validates macs on inbound handshake messages and mints cookie replies.
/// One per local identity.
pub struct CookieChecker {
    state: RwLock<CheckerState>,
}

struct GeneratorState {
    mac1_key: [u8; 32],
    cookie_encryption_key: [u8; 32],
    cookie: [u8; 32],
    cookie_set: Option<Instant>,
    last_mac1: Option<[u8; 32]>,
}

/// Stamps macs onto outbound handshake messages and consumes cookie
/// replies. One per remote peer.
pub struct CookieGenerator {
    state: RwLock<GeneratorState>,
}

impl CookieChecker {
    pub fn new(pk: &NoisePublicKey) -> Self {
        CookieChecker {
            state: RwLock::new(CheckerState {
                mac1_key: streebog::hash_two(LABEL_MAC1, pk.as_bytes()),
                cookie_encryption_key: streebog::hash_two(LABEL_COOKIE, pk.as_bytes()),
                secret: [0u8; 32],
                secret_set: None,
            }),
        }
    }

    /// Re-derive the keys after the local identity changes
    pub fn init(&self, pk: &NoisePublicKey) {
        let mut state = self.state.write().expect("cookie checker lock");
        state.mac1_key = streebog::hash_two(LABEL_MAC1, pk.as_bytes());
        state.cookie_encryption_key = streebog::hash_two(LABEL_COOKIE, pk.as_bytes());
        state.secret_set = None;
    }

    /// Verify the mac1 field of a full handshake message
    pub fn check_mac1(&self, msg: &[u8]) -> bool {
        let state = self.state.read().expect("cookie checker lock");
        let smac2 = msg.len() - MAC_SIZE;
        let smac1 = smac2 - MAC_SIZE;

        let mac1 = streebog::mac(&state.mac1_key, &msg[..smac1]);
        mac1.ct_eq(&msg[smac1..smac2]).into()
    }

    /// Verify the mac2 field against the cookie for `src`. Only meaningful
    /// while the secret is fresh; an expired secret fails closed.
    pub fn check_mac2(&self, msg: &[u8], src: &[u8]) -> bool {
        let state = self.state.read().expect("cookie checker lock");
        match state.secret_set {
            Some(set) if set.elapsed() <= COOKIE_REFRESH_TIME => {}
            _ => return false,
        }

        let cookie = streebog::mac(&state.secret, src);
        let smac2 = msg.len() - MAC_SIZE;
        let mac2 = streebog::mac(&cookie, &msg[..smac2]);
        mac2.ct_eq(&msg[smac2..]).into()
    }

    /// Build a cookie reply for a message that failed mac2 under load.
    /// `recv` is the sender index from the offending message; `src` is the
    /// source address bytes the cookie binds to.
    pub fn create_reply(
        &self,
        msg: &[u8],
        recv: u32,
        src: &[u8],
    ) -> Result<MessageCookieReply, CryptoError> {
        {
            let state = self.state.read().expect("cookie checker lock");
            let expired = match state.secret_set {
                Some(set) => set.elapsed() > COOKIE_REFRESH_TIME,
                None => true,
            };
            if expired {
                drop(state);
                let mut state = self.state.write().expect("cookie checker lock");
                OsRng.fill_bytes(&mut state.secret);
                state.secret_set = Some(Instant::now());
            }
        }

        let state = self.state.read().expect("cookie checker lock");
        let cookie = streebog::mac(&state.secret, src);

        let smac2 = msg.len() - MAC_SIZE;
        let smac1 = smac2 - MAC_SIZE;

        let nonce = fresh_mgm_nonce();
        let aead = Mgm::new(Kuznyechik::new(&state.cookie_encryption_key)?);
        let sealed = aead.seal(&nonce, &cookie, &msg[smac1..smac2]);

        let mut cookie_encrypted = [0u8; MAC_SIZE + 16];
        cookie_encrypted.copy_from_slice(&sealed);

        Ok(MessageCookieReply {
            receiver: recv,
            nonce,
            cookie_encrypted,
        })
    }
}

impl CookieGenerator {
    pub fn new(pk: &NoisePublicKey) -> Self {
        CookieGenerator {
            state: RwLock::new(GeneratorState {
                mac1_key: streebog::hash_two(LABEL_MAC1, pk.as_bytes()),
                cookie_encryption_key: streebog::hash_two(LABEL_COOKIE, pk.as_bytes()),
                cookie: [0u8; 32],
                cookie_set: None,
                last_mac1: None,
            }),
        }
    }

    /// Decrypt and stash the cookie from a reply. Fails when no handshake
    /// message was sent yet (nothing to bind the reply to) or when the seal
    /// does not verify.
    pub fn consume_reply(&self, msg: &MessageCookieReply) -> bool {
        let mut state = self.state.write().expect("cookie generator lock");
        let Some(last_mac1) = state.last_mac1 else {
            return false;
        };

        let Ok(cipher) = Kuznyechik::new(&state.cookie_encryption_key) else {
            return false;
        };
        let aead = Mgm::new(cipher);
        let Ok(cookie) = aead.open(&msg.nonce, &msg.cookie_encrypted, &last_mac1) else {
            return false;
        };

        state.cookie.copy_from_slice(&cookie);
        state.cookie_set = Some(Instant::now());
        true
    }

    /// Compute and write mac1 (always) and mac2 (while a fresh cookie is
    /// held) into the trailing fields of `msg`.
    pub fn add_macs(&self, msg: &mut [u8]) {
        let smac2 = msg.len() - MAC_SIZE;
        let smac1 = smac2 - MAC_SIZE;

        let mut state = self.state.write().expect("cookie generator lock");

        let mac1 = streebog::mac(&state.mac1_key, &msg[..smac1]);
        msg[smac1..smac2].copy_from_slice(&mac1);
        state.last_mac1 = Some(mac1);

        let fresh = match state.cookie_set {
            Some(set) => set.elapsed() <= COOKIE_REFRESH_TIME,
            None => false,
        };
        if !fresh {
            return;
        }
        let mac2 = streebog::mac(&state.cookie, &msg[..smac2]);
        msg[smac2..].copy_from_slice(&mac2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::keys::NoisePrivateKey;
    use crate::protocol::messages::MessageInitiation;

    fn test_identity() -> NoisePublicKey {
        let mut rng = rand::thread_rng();
        NoisePrivateKey::generate(&mut rng)
            .unwrap()
            .public_key()
            .unwrap()
    }

    #[test]
    fn test_mac1_roundtrip() {
        let pk = test_identity();
        let generator = CookieGenerator::new(&pk);
        let checker = CookieChecker::new(&pk);
        let src = [192, 168, 13, 37, 10, 10, 10];

        let mut msg = [0u8; MessageInitiation::SIZE];
        OsRng.fill_bytes(&mut msg);
        generator.add_macs(&mut msg);

        assert!(checker.check_mac1(&msg));
        // no cookie exchanged yet, mac2 is zero and must not verify
        assert_eq!(&msg[MessageInitiation::SIZE - MAC_SIZE..], &[0u8; MAC_SIZE]);
        assert!(!checker.check_mac2(&msg, &src));
    }

    #[test]
    fn test_cookie_reply_enables_mac2() {
        let pk = test_identity();
        let generator = CookieGenerator::new(&pk);
        let checker = CookieChecker::new(&pk);
        let src = [192, 168, 13, 37, 10, 10, 10];

        let mut first = [0u8; MessageInitiation::SIZE];
        OsRng.fill_bytes(&mut first);
        generator.add_macs(&mut first);

        let reply = checker.create_reply(&first, 1377, &src).unwrap();
        assert!(generator.consume_reply(&reply));

        let mut second = [0u8; MessageInitiation::SIZE];
        OsRng.fill_bytes(&mut second);
        generator.add_macs(&mut second);

        assert!(checker.check_mac1(&second));
        assert!(checker.check_mac2(&second, &src));
        assert_ne!(&second[MessageInitiation::SIZE - MAC_SIZE..], &[0u8; MAC_SIZE]);

        // tampering with the body breaks both macs
        second[5] ^= 0x20;
        assert!(!checker.check_mac1(&second));
        assert!(!checker.check_mac2(&second, &src));
        second[5] ^= 0x20;

        // the cookie binds to the source address
        let other_src = [192, 168, 13, 38, 10, 10, 10];
        assert!(!checker.check_mac2(&second, &other_src));
    }

    #[test]
    fn test_reply_without_mac1_rejected() {
        let pk = test_identity();
        let generator = CookieGenerator::new(&pk);
        let checker = CookieChecker::new(&pk);

        let mut msg = [0u8; MessageInitiation::SIZE];
        OsRng.fill_bytes(&mut msg);
        // generator never sent anything, so it cannot bind a reply
        let reply = checker.create_reply(&msg, 7, &[1, 2, 3, 4]).unwrap();
        assert!(!generator.consume_reply(&reply));
    }

    #[test]
    fn test_tampered_reply_rejected() {
        let pk = test_identity();
        let generator = CookieGenerator::new(&pk);
        let checker = CookieChecker::new(&pk);

        let mut msg = [0u8; MessageInitiation::SIZE];
        OsRng.fill_bytes(&mut msg);
        generator.add_macs(&mut msg);

        let mut reply = checker.create_reply(&msg, 7, &[1, 2, 3, 4]).unwrap();
        reply.cookie_encrypted[0] ^= 1;
        assert!(!generator.consume_reply(&reply));
    }
}
