//! Error types for ruguard

use thiserror::Error;

/// Main error type for ruguard
#[derive(Error, Debug)]
pub enum RuguardError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Device errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// System I/O errors
    #[error("System error: {0}")]
    System(#[from] std::io::Error),
}

/// Configuration parsing errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid key: {field}")]
    InvalidKey { field: String },

    #[error("Invalid endpoint address: {value}")]
    InvalidAddress { value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid CIDR notation: {value}")]
    InvalidCidr { value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Decryption failed: invalid ciphertext or authentication tag")]
    AuthenticationFailure,

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Zero scalar")]
    ZeroScalar,

    #[error("Invalid curve point")]
    InvalidPoint,

    #[error("ECDH returned all zeros")]
    ZeroEcdh,

    #[error("Signature retry budget exhausted")]
    SignRetriesExhausted,
}

/// Protocol-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {msg_type}")]
    InvalidMessageType { msg_type: u8 },

    #[error("Invalid message length: expected {expected}, got {got}")]
    InvalidMessageLength { expected: usize, got: usize },

    #[error("MAC verification failed")]
    MacVerificationFailed,

    #[error("Replay detected: counter {counter} already seen")]
    ReplayDetected { counter: u64 },

    #[error("Unknown receiver index: {index}")]
    UnknownIndex { index: u32 },

    #[error("Handshake is in state {state}, expected {expected}")]
    WrongHandshakeState {
        state: &'static str,
        expected: &'static str,
    },

    #[error("Session expired")]
    SessionExpired,

    #[error("No active session")]
    NoSession,

    #[error("Source address not within peer's allowed IPs")]
    AllowedIpViolation,
}

/// Device-level errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Unknown peer")]
    UnknownPeer,

    #[error("Peer has no endpoint")]
    NoEndpoint,

    #[error("No peer routes {destination}")]
    NoRoute { destination: std::net::IpAddr },

    #[error("Index table exhausted after {attempts} attempts")]
    IndexCollision { attempts: u32 },

    #[error("Device is down")]
    Down,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ruguard operations
pub type Result<T> = std::result::Result<T, RuguardError>;
