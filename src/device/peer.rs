//! Peers, keypairs and the three-slot rotation discipline

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use crate::crypto::mgm::{Mgm, NONCE_SIZE};
use crate::error::ProtocolError;
use crate::protocol::cookie::CookieGenerator;
use crate::protocol::messages::{MessageType, TransportHeader};
use crate::protocol::noise::Handshake;
use crate::protocol::replay::{ReplayFilter, WINDOW_SIZE};

pub const REKEY_AFTER_TIME: Duration = Duration::from_secs(120);
pub const REJECT_AFTER_TIME: Duration = Duration::from_secs(180);
pub const REKEY_TIMEOUT: Duration = Duration::from_secs(5);
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum spacing between accepted initiations from one peer
pub const HANDSHAKE_INITIATION_RATE: Duration = Duration::from_millis(20);

/// Counters at or above this force a rekey before further sends
pub const REJECT_AFTER_MESSAGES: u64 = u64::MAX - WINDOW_SIZE - 1;

/// Start rekeying comfortably before the hard limit
pub const REKEY_AFTER_MESSAGES: u64 = REJECT_AFTER_MESSAGES - (1 << 16);

/// Outbound packets waiting for a handshake to complete
const MAX_QUEUED_PACKETS: usize = 128;

/// Number of bytes of the transport header authenticated as associated data
pub const ADDITIONAL_DATA_SIZE: usize = 12;

/// A session keypair produced by one completed handshake
pub struct Keypair {
    pub send: Mgm,
    pub receive: Mgm,
    pub created: Instant,
    pub send_nonce: AtomicU64,
    pub replay_filter: Mutex<ReplayFilter>,
    pub is_initiator: bool,
    pub local_index: u32,
    pub remote_index: u32,
}

impl Keypair {
    /// Transport nonce: upper eight bytes zero, counter big-endian in the
    /// lower eight. The reserved high bit is structurally zero.
    fn nonce(counter: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[8..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    /// Associated data as the sender constructs it:
    /// type (LE32) || local index || remote index
    fn send_ad(&self) -> [u8; ADDITIONAL_DATA_SIZE] {
        let mut ad = [0u8; ADDITIONAL_DATA_SIZE];
        ad[0..4].copy_from_slice(&(MessageType::TransportData as u32).to_le_bytes());
        ad[4..8].copy_from_slice(&self.local_index.to_le_bytes());
        ad[8..12].copy_from_slice(&self.remote_index.to_le_bytes());
        ad
    }

    /// The same 12 bytes from the receiver's perspective: the sender's
    /// local index is our remote index and vice versa.
    fn receive_ad(&self) -> [u8; ADDITIONAL_DATA_SIZE] {
        let mut ad = [0u8; ADDITIONAL_DATA_SIZE];
        ad[0..4].copy_from_slice(&(MessageType::TransportData as u32).to_le_bytes());
        ad[4..8].copy_from_slice(&self.remote_index.to_le_bytes());
        ad[8..12].copy_from_slice(&self.local_index.to_le_bytes());
        ad
    }

    /// Reserve the next outbound counter; fails once the keypair is spent
    fn next_counter(&self) -> Result<u64, ProtocolError> {
        let counter = self.send_nonce.fetch_add(1, Ordering::SeqCst);
        if counter >= REJECT_AFTER_MESSAGES {
            // keep the counter saturated rather than wrapping
            self.send_nonce.store(REJECT_AFTER_MESSAGES, Ordering::SeqCst);
            return Err(ProtocolError::SessionExpired);
        }
        Ok(counter)
    }

    /// Seal an outbound packet into a complete transport datagram
    pub fn seal_transport(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if self.created.elapsed() >= REJECT_AFTER_TIME {
            return Err(ProtocolError::SessionExpired);
        }
        let counter = self.next_counter()?;
        let sealed = self
            .send
            .seal(&Self::nonce(counter), plaintext, &self.send_ad());
        Ok(TransportHeader::build_message(
            self.remote_index,
            counter,
            &sealed,
        ))
    }

    /// Open an inbound transport payload. The replay window is only
    /// advanced after the tag verifies, so forgeries cannot poison it.
    pub fn open_transport(
        &self,
        counter: u64,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        if self.created.elapsed() >= REJECT_AFTER_TIME {
            return Err(ProtocolError::SessionExpired);
        }
        let plaintext = self
            .receive
            .open(&Self::nonce(counter), payload, &self.receive_ad())
            .map_err(|_| ProtocolError::MacVerificationFailed)?;

        let mut filter = self.replay_filter.lock().expect("replay filter lock");
        if !filter.validate_counter(counter, REJECT_AFTER_MESSAGES) {
            return Err(ProtocolError::ReplayDetected { counter });
        }
        Ok(plaintext)
    }

    /// Should the owner start a fresh handshake for this keypair?
    pub fn needs_rekey(&self) -> bool {
        (self.is_initiator && self.created.elapsed() >= REKEY_AFTER_TIME)
            || self.send_nonce.load(Ordering::Relaxed) >= REKEY_AFTER_MESSAGES
    }

    pub fn is_expired(&self) -> bool {
        self.created.elapsed() >= REJECT_AFTER_TIME
    }
}

#[derive(Default)]
struct Slots {
    previous: Option<Arc<Keypair>>,
    current: Option<Arc<Keypair>>,
    next: Option<Arc<Keypair>>,
}

/// The per-peer keypair slots: `previous`, `current`, and a `next` slot
/// reserved for a responder-derived keypair awaiting its first inbound
/// transport. `has_next` mirrors the next slot for a lock-free fast path.
#[derive(Default)]
pub struct KeypairSlots {
    slots: Mutex<Slots>,
    has_next: AtomicBool,
}

impl KeypairSlots {
    pub fn current(&self) -> Option<Arc<Keypair>> {
        self.slots.lock().expect("keypair slots lock").current.clone()
    }

    pub fn next(&self) -> Option<Arc<Keypair>> {
        if !self.has_next.load(Ordering::Acquire) {
            return None;
        }
        self.slots.lock().expect("keypair slots lock").next.clone()
    }

    /// Initiator installation: the fresh keypair becomes `current`.
    /// Returns the keypairs displaced out of all three slots.
    pub fn install_initiator(&self, keypair: Arc<Keypair>) -> Vec<Arc<Keypair>> {
        let mut slots = self.slots.lock().expect("keypair slots lock");
        let mut dropped = Vec::new();

        if let Some(next) = slots.next.take() {
            self.has_next.store(false, Ordering::Release);
            if let Some(current) = slots.current.take() {
                dropped.push(current);
            }
            if let Some(previous) = slots.previous.replace(next) {
                dropped.push(previous);
            }
        } else {
            let current = slots.current.take();
            if let Some(previous) = match current {
                Some(current) => slots.previous.replace(current),
                None => slots.previous.take(),
            } {
                dropped.push(previous);
            }
        }
        slots.current = Some(keypair);
        dropped
    }

    /// Responder installation: the fresh keypair waits in `next`
    pub fn install_responder(&self, keypair: Arc<Keypair>) -> Vec<Arc<Keypair>> {
        let mut slots = self.slots.lock().expect("keypair slots lock");
        let mut dropped = Vec::new();

        if let Some(next) = slots.next.replace(keypair) {
            dropped.push(next);
        }
        self.has_next.store(true, Ordering::Release);
        if let Some(previous) = slots.previous.take() {
            dropped.push(previous);
        }
        dropped
    }

    /// First inbound transport under `next` promotes it to `current`.
    /// Returns the displaced keypair, if the promotion happened.
    pub fn promote_on_receive(&self, received: &Arc<Keypair>) -> (bool, Option<Arc<Keypair>>) {
        if !self.has_next.load(Ordering::Acquire) {
            return (false, None);
        }
        let mut slots = self.slots.lock().expect("keypair slots lock");
        let matches = slots
            .next
            .as_ref()
            .map(|next| Arc::ptr_eq(next, received))
            .unwrap_or(false);
        if !matches {
            return (false, None);
        }
        let old = slots.previous.take();
        slots.previous = slots.current.take();
        slots.current = slots.next.take();
        self.has_next.store(false, Ordering::Release);
        (true, old)
    }

    /// Look up a keypair occupying any of the three slots
    pub fn find_by_index(&self, index: u32) -> Option<Arc<Keypair>> {
        let slots = self.slots.lock().expect("keypair slots lock");
        let result = [&slots.previous, &slots.current, &slots.next]
            .into_iter()
            .flatten()
            .find(|kp| kp.local_index == index)
            .cloned();
        result
    }

    /// Evict everything, returning the occupants for index cleanup
    pub fn clear(&self) -> Vec<Arc<Keypair>> {
        let mut slots = self.slots.lock().expect("keypair slots lock");
        self.has_next.store(false, Ordering::Release);
        [slots.previous.take(), slots.current.take(), slots.next.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// A configured remote peer
pub struct Peer {
    pub handshake: RwLock<Handshake>,
    pub keypairs: KeypairSlots,
    pub cookie_generator: CookieGenerator,
    pub endpoint: Mutex<Option<SocketAddr>>,
    /// Seconds; zero disables
    pub persistent_keepalive: AtomicU32,
    /// Packets queued while a handshake completes
    pub staged: Mutex<VecDeque<Vec<u8>>>,
    pub last_data_sent: Mutex<Option<Instant>>,
    pub last_data_received: Mutex<Option<Instant>>,
    pub last_handshake: Mutex<Option<SystemTime>>,
    pub tx_bytes: AtomicU64,
    pub rx_bytes: AtomicU64,
}

impl Peer {
    pub fn new(handshake: Handshake, cookie_generator: CookieGenerator) -> Self {
        Peer {
            handshake: RwLock::new(handshake),
            keypairs: KeypairSlots::default(),
            cookie_generator,
            endpoint: Mutex::new(None),
            persistent_keepalive: AtomicU32::new(0),
            staged: Mutex::new(VecDeque::new()),
            last_data_sent: Mutex::new(None),
            last_data_received: Mutex::new(None),
            last_handshake: Mutex::new(None),
            tx_bytes: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock().expect("endpoint lock")
    }

    pub fn set_endpoint(&self, addr: SocketAddr) {
        *self.endpoint.lock().expect("endpoint lock") = Some(addr);
    }

    /// Stage an outbound packet until transport keys exist
    pub fn stage_packet(&self, packet: Vec<u8>) {
        let mut staged = self.staged.lock().expect("staged queue lock");
        if staged.len() >= MAX_QUEUED_PACKETS {
            staged.pop_front();
        }
        staged.push_back(packet);
    }

    pub fn take_staged(&self) -> Vec<Vec<u8>> {
        self.staged.lock().expect("staged queue lock").drain(..).collect()
    }

    pub fn mark_data_sent(&self) {
        *self.last_data_sent.lock().expect("timer lock") = Some(Instant::now());
    }

    pub fn mark_data_received(&self) {
        *self.last_data_received.lock().expect("timer lock") = Some(Instant::now());
    }

    /// Is a persistent keepalive due?
    pub fn keepalive_due(&self) -> bool {
        let interval = self.persistent_keepalive.load(Ordering::Relaxed);
        if interval == 0 {
            return false;
        }
        let interval = Duration::from_secs(interval as u64);
        match *self.last_data_sent.lock().expect("timer lock") {
            Some(sent) => sent.elapsed() >= interval,
            None => true,
        }
    }
}
