//! Thread-safe Lamport logical clock.
//!
//! A single `std::sync::Mutex<u64>` serializes `tick`, `update` and `read`,
//! matching `Distribuidopy/lamport_clock.py`'s use of a plain lock rather
//! than an atomic: `update` needs to read-then-write under one critical
//! section, so a bare `AtomicU64::fetch_max` would not be enough on its own.

use std::sync::Mutex;

/// A Lamport timestamp. Always strictly positive after the first `tick`.
pub type Timestamp = u64;

#[derive(Debug, Default)]
pub struct LamportClock {
    time: Mutex<Timestamp>,
}

impl LamportClock {
    pub fn new() -> Self {
        Self {
            time: Mutex::new(0),
        }
    }

    /// Local event: `time <- time + 1`, returns the new value.
    pub fn tick(&self) -> Timestamp {
        let mut time = self.time.lock().unwrap();
        *time += 1;
        *time
    }

    /// Inbound message event: `time <- max(time, received) + 1`.
    ///
    /// The `+ 1` applies unconditionally, even when `received < time` —
    /// receiving is itself a local event and must advance the clock past
    /// both the current value and the remote one.
    pub fn update(&self, received: Timestamp) -> Timestamp {
        let mut time = self.time.lock().unwrap();
        *time = (*time).max(received) + 1;
        *time
    }

    /// Current value without side effects. Never used for protocol
    /// decisions — only for logging and tests.
    pub fn read(&self) -> Timestamp {
        *self.time.lock().unwrap()
    }
}
