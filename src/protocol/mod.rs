//! Protocol layer
//!
//! - Key material types (keys)
//! - Wire codec for the four message types (messages)
//! - Noise IKpsk2 handshake state (noise)
//! - Cookie/DoS protection (cookie)
//! - Anti-replay counter filter (replay)

pub mod cookie;
pub mod keys;
pub mod messages;
pub mod noise;
pub mod replay;

pub use cookie::{CookieChecker, CookieGenerator, COOKIE_REFRESH_TIME};
pub use keys::{NoisePrivateKey, NoisePublicKey, SymmetricKey};
pub use messages::{
    MessageCookieReply, MessageInitiation, MessageResponse, MessageType, TransportHeader,
};
pub use noise::{Handshake, HandshakeState};
pub use replay::ReplayFilter;
