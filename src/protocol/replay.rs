//! Anti-replay counter filter
//!
//! Sliding bitmap window over the 64-bit transport counter. A counter above
//! the current maximum slides the window forward; a counter more than
//! `WINDOW_SIZE` below the maximum is rejected; anything inside the window
//! is accepted exactly once.

const BLOCK_BITS: u64 = 64;
const RING_BLOCKS: u64 = 129;

/// Window width W
pub const WINDOW_SIZE: u64 = (RING_BLOCKS - 1) * BLOCK_BITS;

/// Per-keypair replay filter, reset on every rekey
#[derive(Clone)]
pub struct ReplayFilter {
    last: u64,
    ring: [u64; RING_BLOCKS as usize],
}

impl Default for ReplayFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayFilter {
    pub fn new() -> Self {
        ReplayFilter {
            last: 0,
            ring: [0u64; RING_BLOCKS as usize],
        }
    }

    pub fn reset(&mut self) {
        self.last = 0;
        self.ring = [0u64; RING_BLOCKS as usize];
    }

    /// Accept `counter` if it has not been seen and lies within the window;
    /// marks it seen on acceptance. `limit` bounds the counter space
    /// (counters at or above it are rejected outright).
    pub fn validate_counter(&mut self, counter: u64, limit: u64) -> bool {
        if counter >= limit {
            return false;
        }
        let index_block = counter / BLOCK_BITS;
        if counter > self.last {
            // move window forward, clearing skipped blocks
            let current = self.last / BLOCK_BITS;
            let diff = (index_block - current).min(RING_BLOCKS);
            for i in 1..=diff {
                let block = (current + i) % RING_BLOCKS;
                self.ring[block as usize] = 0;
            }
            self.last = counter;
        } else if self.last - counter > WINDOW_SIZE {
            return false;
        }
        let bit = 1u64 << (counter % BLOCK_BITS);
        let block = &mut self.ring[(index_block % RING_BLOCKS) as usize];
        let seen = *block & bit != 0;
        *block |= bit;
        !seen
    }
}
