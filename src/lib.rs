//! ruguard - a userspace VPN data plane on the GOST cryptographic suite
//!
//! Speaks a WireGuard-shaped protocol with the Curve25519/ChaCha20-Poly1305/
//! BLAKE2s stack replaced by GOST primitives: Streebog hashing, the
//! Kuznyechik block cipher in MGM mode, and VKO key agreement over the
//! GOST R 34.10-2012 256-bit paramSetA curve.
//!
//! # Layout
//!
//! - [`crypto`]: the primitive stack (hash, cipher, AEAD, KDF tree, curve)
//! - [`protocol`]: key types, the wire codec, the Noise IKpsk2 handshake
//!   state, cookie/DoS protection and the replay filter
//! - [`device`]: peers, session rotation, datagram dispatch and the IPC
//!   control surface
//! - [`config`]: the INI file surface and syncconf
//! - [`tunnel`]: the packet source/sink seam and the UDP run loop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ruguard::config::Config;
//! use ruguard::device::Device;
//! use ruguard::tunnel::{NullTun, Tunnel};
//!
//! #[tokio::main]
//! async fn main() -> ruguard::error::Result<()> {
//!     let config = Config::from_file("ruguard.conf")?;
//!     let device = Arc::new(Device::new());
//!     device.ipc_set_operation(&config.to_uapi()).ok();
//!     Tunnel::bind(device, NullTun).await?.run().await
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod protocol;
pub mod tai64n;
pub mod tunnel;

pub use config::Config;
pub use device::Device;
pub use error::RuguardError;
