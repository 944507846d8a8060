//! Process-wide strictly increasing request nonces.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;

/// Issues strictly increasing nonces to every request attempt.
///
/// Values start from the wall clock in microseconds so they stay above nonces
/// used by earlier runs of the process, and never repeat even if the clock
/// stalls or steps backwards. The counter is the only state shared by the
/// trade dialogue and the order monitor.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    last: Mutex<u64>,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next nonce.
    pub fn next(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let nonce = now.max(last.saturating_add(1));
        *last = nonce;
        nonce
    }
}
