//! Wire formats for the four protocol messages
//!
//! All messages are little-endian with fixed field widths:
//! - Type 1: Handshake Initiation (182 bytes)
//! - Type 2: Handshake Response (125 bytes)
//! - Type 3: Cookie Reply (72 bytes)
//! - Type 4: Transport Data (16-byte header + ciphertext, at least 32)
//!
//! The type field occupies byte 0 with three zero bytes behind it; inbound
//! dispatch reads byte 0 only.

use crate::crypto::mgm::{NONCE_SIZE, TAG_SIZE};
use crate::error::ProtocolError;
use crate::protocol::keys::PUBLIC_KEY_SIZE;
use crate::tai64n::TIMESTAMP_SIZE;

/// mac1/mac2 width (a full Streebog-256 output)
pub const MAC_SIZE: usize = 32;

/// Encrypted static key field width
const ENC_STATIC_SIZE: usize = PUBLIC_KEY_SIZE + TAG_SIZE;

/// Encrypted timestamp field width
const ENC_TIMESTAMP_SIZE: usize = TIMESTAMP_SIZE + TAG_SIZE;

/// Encrypted cookie field width
const ENC_COOKIE_SIZE: usize = MAC_SIZE + TAG_SIZE;

/// Message type identifiers
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    HandshakeInitiation = 1,
    HandshakeResponse = 2,
    CookieReply = 3,
    TransportData = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::HandshakeInitiation),
            2 => Ok(Self::HandshakeResponse),
            3 => Ok(Self::CookieReply),
            4 => Ok(Self::TransportData),
            _ => Err(ProtocolError::InvalidMessageType { msg_type: value }),
        }
    }
}

/// Message type of a raw datagram, from byte 0
pub fn get_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidMessageLength { expected: 1, got: 0 });
    }
    MessageType::try_from(data[0])
}

fn check_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() != expected {
        return Err(ProtocolError::InvalidMessageLength {
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

fn check_type(data: &[u8], expected: MessageType) -> Result<(), ProtocolError> {
    if data[0] != expected as u8 {
        return Err(ProtocolError::InvalidMessageType { msg_type: data[0] });
    }
    Ok(())
}

/// Handshake Initiation (182 bytes)
///
/// ```text
/// type(4) | sender(4) | ephemeral(33) | enc_static(49) |
/// enc_timestamp(28) | mac1(32) | mac2(32)
/// ```
#[derive(Clone)]
pub struct MessageInitiation {
    pub sender: u32,
    pub ephemeral: [u8; PUBLIC_KEY_SIZE],
    pub static_encrypted: [u8; ENC_STATIC_SIZE],
    pub timestamp_encrypted: [u8; ENC_TIMESTAMP_SIZE],
    pub mac1: [u8; MAC_SIZE],
    pub mac2: [u8; MAC_SIZE],
}

impl MessageInitiation {
    pub const SIZE: usize = 4 + 4 + PUBLIC_KEY_SIZE + ENC_STATIC_SIZE + ENC_TIMESTAMP_SIZE
        + MAC_SIZE
        + MAC_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&(MessageType::HandshakeInitiation as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.sender.to_le_bytes());
        buf[8..41].copy_from_slice(&self.ephemeral);
        buf[41..90].copy_from_slice(&self.static_encrypted);
        buf[90..118].copy_from_slice(&self.timestamp_encrypted);
        buf[118..150].copy_from_slice(&self.mac1);
        buf[150..182].copy_from_slice(&self.mac2);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        check_type(data, MessageType::HandshakeInitiation)?;

        let mut msg = MessageInitiation {
            sender: u32::from_le_bytes(data[4..8].try_into().expect("fixed slice")),
            ephemeral: [0u8; PUBLIC_KEY_SIZE],
            static_encrypted: [0u8; ENC_STATIC_SIZE],
            timestamp_encrypted: [0u8; ENC_TIMESTAMP_SIZE],
            mac1: [0u8; MAC_SIZE],
            mac2: [0u8; MAC_SIZE],
        };
        msg.ephemeral.copy_from_slice(&data[8..41]);
        msg.static_encrypted.copy_from_slice(&data[41..90]);
        msg.timestamp_encrypted.copy_from_slice(&data[90..118]);
        msg.mac1.copy_from_slice(&data[118..150]);
        msg.mac2.copy_from_slice(&data[150..182]);
        Ok(msg)
    }
}

/// Handshake Response (125 bytes)
///
/// ```text
/// type(4) | sender(4) | receiver(4) | ephemeral(33) | enc_empty(16) |
/// mac1(32) | mac2(32)
/// ```
#[derive(Clone)]
pub struct MessageResponse {
    pub sender: u32,
    pub receiver: u32,
    pub ephemeral: [u8; PUBLIC_KEY_SIZE],
    pub empty: [u8; TAG_SIZE],
    pub mac1: [u8; MAC_SIZE],
    pub mac2: [u8; MAC_SIZE],
}

impl MessageResponse {
    pub const SIZE: usize = 4 + 4 + 4 + PUBLIC_KEY_SIZE + TAG_SIZE + MAC_SIZE + MAC_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&(MessageType::HandshakeResponse as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.sender.to_le_bytes());
        buf[8..12].copy_from_slice(&self.receiver.to_le_bytes());
        buf[12..45].copy_from_slice(&self.ephemeral);
        buf[45..61].copy_from_slice(&self.empty);
        buf[61..93].copy_from_slice(&self.mac1);
        buf[93..125].copy_from_slice(&self.mac2);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        check_type(data, MessageType::HandshakeResponse)?;

        let mut msg = MessageResponse {
            sender: u32::from_le_bytes(data[4..8].try_into().expect("fixed slice")),
            receiver: u32::from_le_bytes(data[8..12].try_into().expect("fixed slice")),
            ephemeral: [0u8; PUBLIC_KEY_SIZE],
            empty: [0u8; TAG_SIZE],
            mac1: [0u8; MAC_SIZE],
            mac2: [0u8; MAC_SIZE],
        };
        msg.ephemeral.copy_from_slice(&data[12..45]);
        msg.empty.copy_from_slice(&data[45..61]);
        msg.mac1.copy_from_slice(&data[61..93]);
        msg.mac2.copy_from_slice(&data[93..125]);
        Ok(msg)
    }
}

/// Cookie Reply (72 bytes), the one message carrying no macs
///
/// ```text
/// type(4) | receiver(4) | nonce(16) | enc_cookie(48)
/// ```
#[derive(Clone)]
pub struct MessageCookieReply {
    pub receiver: u32,
    pub nonce: [u8; NONCE_SIZE],
    pub cookie_encrypted: [u8; ENC_COOKIE_SIZE],
}

impl MessageCookieReply {
    pub const SIZE: usize = 4 + 4 + NONCE_SIZE + ENC_COOKIE_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&(MessageType::CookieReply as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.receiver.to_le_bytes());
        buf[8..24].copy_from_slice(&self.nonce);
        buf[24..72].copy_from_slice(&self.cookie_encrypted);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        check_type(data, MessageType::CookieReply)?;

        let mut msg = MessageCookieReply {
            receiver: u32::from_le_bytes(data[4..8].try_into().expect("fixed slice")),
            nonce: [0u8; NONCE_SIZE],
            cookie_encrypted: [0u8; ENC_COOKIE_SIZE],
        };
        msg.nonce.copy_from_slice(&data[8..24]);
        msg.cookie_encrypted.copy_from_slice(&data[24..72]);
        Ok(msg)
    }
}

/// Transport Data header (16 bytes, followed by ciphertext || tag)
///
/// ```text
/// type(4) | receiver(4) | counter(8) | ciphertext+tag(>=16)
/// ```
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub receiver: u32,
    pub counter: u64,
}

impl TransportHeader {
    pub const SIZE: usize = 16;

    /// Smallest valid transport message: header plus a bare tag (keepalive)
    pub const MIN_SIZE: usize = Self::SIZE + TAG_SIZE;

    /// Assemble a complete transport datagram
    pub fn build_message(receiver: u32, counter: u64, encrypted: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE + encrypted.len());
        buf.extend_from_slice(&(MessageType::TransportData as u32).to_le_bytes());
        buf.extend_from_slice(&receiver.to_le_bytes());
        buf.extend_from_slice(&counter.to_le_bytes());
        buf.extend_from_slice(encrypted);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::MIN_SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                expected: Self::MIN_SIZE,
                got: data.len(),
            });
        }
        check_type(data, MessageType::TransportData)?;
        Ok(TransportHeader {
            receiver: u32::from_le_bytes(data[4..8].try_into().expect("fixed slice")),
            counter: u64::from_le_bytes(data[8..16].try_into().expect("fixed slice")),
        })
    }

    /// Ciphertext || tag portion of a transport datagram
    pub fn payload(data: &[u8]) -> &[u8] {
        &data[Self::SIZE..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_sizes() {
        assert_eq!(MessageInitiation::SIZE, 182);
        assert_eq!(MessageResponse::SIZE, 125);
        assert_eq!(MessageCookieReply::SIZE, 72);
        assert_eq!(TransportHeader::MIN_SIZE, 32);
    }

    #[test]
    fn test_initiation_roundtrip() {
        let msg = MessageInitiation {
            sender: 0x12345678,
            ephemeral: [1u8; PUBLIC_KEY_SIZE],
            static_encrypted: [2u8; ENC_STATIC_SIZE],
            timestamp_encrypted: [3u8; ENC_TIMESTAMP_SIZE],
            mac1: [4u8; MAC_SIZE],
            mac2: [5u8; MAC_SIZE],
        };

        let bytes = msg.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..4], &[0, 0, 0]);

        let parsed = MessageInitiation::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.sender, msg.sender);
        assert_eq!(parsed.ephemeral, msg.ephemeral);
        assert_eq!(parsed.static_encrypted, msg.static_encrypted);
        assert_eq!(parsed.timestamp_encrypted, msg.timestamp_encrypted);
        assert_eq!(parsed.mac1, msg.mac1);
        assert_eq!(parsed.mac2, msg.mac2);
    }

    #[test]
    fn test_response_roundtrip() {
        let msg = MessageResponse {
            sender: 0x11223344,
            receiver: 0x55667788,
            ephemeral: [9u8; PUBLIC_KEY_SIZE],
            empty: [7u8; TAG_SIZE],
            mac1: [4u8; MAC_SIZE],
            mac2: [0u8; MAC_SIZE],
        };

        let parsed = MessageResponse::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed.sender, msg.sender);
        assert_eq!(parsed.receiver, msg.receiver);
        assert_eq!(parsed.ephemeral, msg.ephemeral);
        assert_eq!(parsed.empty, msg.empty);
    }

    #[test]
    fn test_cookie_reply_roundtrip() {
        let msg = MessageCookieReply {
            receiver: 1377,
            nonce: [0x17; NONCE_SIZE],
            cookie_encrypted: [0x2a; ENC_COOKIE_SIZE],
        };

        let parsed = MessageCookieReply::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed.receiver, msg.receiver);
        assert_eq!(parsed.nonce, msg.nonce);
        assert_eq!(parsed.cookie_encrypted, msg.cookie_encrypted);
    }

    #[test]
    fn test_transport_build_and_parse() {
        let payload = vec![0xAA; 100];
        let datagram = TransportHeader::build_message(42, 1234, &payload);

        assert_eq!(datagram[0], 4);
        let header = TransportHeader::from_bytes(&datagram).unwrap();
        assert_eq!(header.receiver, 42);
        assert_eq!(header.counter, 1234);
        assert_eq!(TransportHeader::payload(&datagram), &payload[..]);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let bytes = [1u8; MessageInitiation::SIZE - 1];
        assert!(matches!(
            MessageInitiation::from_bytes(&bytes),
            Err(ProtocolError::InvalidMessageLength { .. })
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(get_message_type(&[9u8, 0, 0, 0]).is_err());
        assert!(get_message_type(&[]).is_err());
    }
}
