//! Deterministic identifier generation.
//!
//! Counters restart per process so replays produce identical id sequences;
//! anything that must survive a replay (intent identity) is derived from
//! content hashes instead.

use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub struct IdGenerator {
    prefix: &'static str,
    counter: u64,
}

impl IdGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, counter: 0 }
    }

    pub fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{}{:06}", self.prefix, self.counter)
    }
}

/// Timestamp directory name for a live session: `YYYYMMDD-HHMMSS`.
pub fn session_stamp(ts_utc: DateTime<Utc>) -> String {
    ts_utc.format("%Y%m%d-%H%M%S").to_string()
}
