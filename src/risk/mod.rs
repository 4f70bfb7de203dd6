//! Trade-frequency gating.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Caps how many intents may become orders per UTC day. The sizing math
/// itself lives in the OMS; this is the outermost throttle.
pub struct RiskGates {
    pub max_trades_per_day: u32,
    trades_by_day: HashMap<String, u32>,
}

impl RiskGates {
    pub fn new(max_trades_per_day: u32) -> Self {
        Self {
            max_trades_per_day,
            trades_by_day: HashMap::new(),
        }
    }

    pub fn allow_trade(&self, ts_utc: DateTime<Utc>) -> bool {
        let key = day_key(ts_utc);
        self.trades_by_day.get(&key).copied().unwrap_or(0) < self.max_trades_per_day
    }

    pub fn record_trade(&mut self, ts_utc: DateTime<Utc>) {
        *self.trades_by_day.entry(day_key(ts_utc)).or_insert(0) += 1;
    }
}

impl Default for RiskGates {
    fn default() -> Self {
        Self::new(1)
    }
}

fn day_key(ts_utc: DateTime<Utc>) -> String {
    ts_utc.format("%Y-%m-%d").to_string()
}
