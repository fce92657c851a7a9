//! TAI64N handshake timestamps
//!
//! 12 bytes: TAI64 seconds (big-endian 64-bit) followed by nanoseconds
//! (big-endian 32-bit). The only protocol-relevant operation is the
//! strict-greater-than comparison used for initiation replay protection.
//! `now` is monotonic across the process: concurrent callers never observe
//! a repeated or decreasing stamp.

use std::sync::Mutex;

use tai64::Tai64N;

/// Encoded timestamp length
pub const TIMESTAMP_SIZE: usize = 12;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A TAI64N timestamp in its 12-byte wire form. The big-endian layout makes
/// lexicographic byte order coincide with chronological order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub [u8; TIMESTAMP_SIZE]);

static WATERMARK: Mutex<Timestamp> = Mutex::new(Timestamp([0u8; TIMESTAMP_SIZE]));

impl Timestamp {
    /// Current time, strictly greater than every previously emitted stamp
    pub fn now() -> Self {
        let wall = Timestamp(Tai64N::now().to_bytes());
        let mut watermark = WATERMARK.lock().expect("timestamp watermark poisoned");
        let stamp = if wall.after(&watermark) {
            wall
        } else {
            watermark.tick()
        };
        *watermark = stamp;
        stamp
    }

    /// Strict "later than" comparison
    pub fn after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    pub fn as_bytes(&self) -> &[u8; TIMESTAMP_SIZE] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; TIMESTAMP_SIZE]) -> Self {
        Timestamp(bytes)
    }

    /// Smallest representable increment: one nanosecond
    fn tick(&self) -> Timestamp {
        let mut secs = u64::from_be_bytes(self.0[..8].try_into().expect("fixed split"));
        let mut nanos = u32::from_be_bytes(self.0[8..].try_into().expect("fixed split"));
        nanos += 1;
        if nanos >= NANOS_PER_SEC {
            nanos = 0;
            secs += 1;
        }
        let mut out = [0u8; TIMESTAMP_SIZE];
        out[..8].copy_from_slice(&secs.to_be_bytes());
        out[8..].copy_from_slice(&nanos.to_be_bytes());
        Timestamp(out)
    }
}
