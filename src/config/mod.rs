//! Configuration surface
//!
//! INI parsing/formatting for the `[Interface]`/`[Peer]` file format and
//! the syncconf reconciliation against a running device.

mod parser;
mod sync;

pub use parser::{Config, InterfaceConfig, PeerConfig};
pub use sync::{sync_device, sync_transaction};
