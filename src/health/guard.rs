//! Engine trading-state ladder driven by data-quality snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::health::monitor::DataQualitySnapshot;
use crate::types::EngineState;

/// Emitted on every state change; silence means the state held.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineStateEvent {
    pub ts_utc: DateTime<Utc>,
    pub state: EngineState,
    pub prev_state: EngineState,
    pub score_0_1: f64,
    pub reason_codes: Vec<String>,
    pub kill_latched: bool,
}

pub struct EngineGuard {
    thresholds: Thresholds,
    pub current_state: EngineState,
    pub last_transition_ts: Option<DateTime<Utc>>,
    pub kill_latched: bool,
}

impl EngineGuard {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            current_state: EngineState::Run,
            last_transition_ts: None,
            kill_latched: false,
        }
    }

    /// Fold one snapshot into the ladder. Returns a transition event only
    /// when the state changes. KILL latches permanently.
    pub fn update(&mut self, snapshot: &DataQualitySnapshot) -> Option<EngineStateEvent> {
        let now = snapshot.ts_utc;
        let prev_state = self.current_state;

        let mut target = if self.kill_latched {
            EngineState::Kill
        } else {
            let reasons = &snapshot.reason_codes;
            let has = |needle: &str| reasons.iter().any(|code| code == needle);
            let has_prefix = |prefix: &str| reasons.iter().any(|code| code.starts_with(prefix));
            let has_missing_feed = has_prefix("missing_feed_");
            let has_stale = has_prefix("stale_");
            let has_soft = has_prefix("low_eps_")
                || has_prefix("resync_rate_high_")
                || has_prefix("desync_rate_high_")
                || has_prefix("gaps_high_");

            let target = if snapshot.score_0_1 <= self.thresholds.health_kill_score
                || has("mid_diff_high")
                || has_missing_feed
            {
                EngineState::Kill
            } else if snapshot.score_0_1 <= self.thresholds.health_freeze_score
                || has("queue_depth_high")
                || has_stale
            {
                EngineState::Freeze
            } else if snapshot.score_0_1 <= self.thresholds.health_degraded_score || has_soft {
                EngineState::Degraded
            } else {
                EngineState::Run
            };

            if target == EngineState::Kill {
                self.kill_latched = true;
            }
            target
        };

        // Hysteresis: leaving FREEZE needs a recovered score and a full
        // recovery window since the freeze transition.
        if prev_state == EngineState::Freeze && target == EngineState::Run {
            if snapshot.score_0_1 < self.thresholds.health_recover_score {
                target = EngineState::Freeze;
            } else {
                match self.last_transition_ts {
                    None => target = EngineState::Freeze,
                    Some(last) => {
                        let elapsed_ms = ((now - last).num_milliseconds()).max(0);
                        if elapsed_ms < self.thresholds.health_recover_window_ms {
                            target = EngineState::Freeze;
                        }
                    }
                }
            }
        }

        if prev_state == EngineState::Degraded
            && target == EngineState::Run
            && snapshot.score_0_1 < self.thresholds.health_recover_score
        {
            target = EngineState::Degraded;
        }

        if target == prev_state {
            return None;
        }

        self.current_state = target;
        self.last_transition_ts = Some(now);

        Some(EngineStateEvent {
            ts_utc: now,
            state: target,
            prev_state,
            score_0_1: snapshot.score_0_1,
            reason_codes: snapshot.reason_codes.clone(),
            kill_latched: self.kill_latched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn thresholds() -> Thresholds {
        Thresholds {
            window: 5,
            depth_k: 1,
            quantile_high: 0.6,
            quantile_low: 0.4,
            min_samples: 2,
            signal_score_min: 0.2,
            ..Thresholds::default()
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn snapshot(at: DateTime<Utc>, score: f64, reasons: &[&str]) -> DataQualitySnapshot {
        DataQualitySnapshot {
            ts_utc: at,
            symbol: "BTCUSDT".into(),
            per_venue: BTreeMap::new(),
            queue_depth: 0,
            mid_by_venue: BTreeMap::new(),
            mid_diff_bps: None,
            score_0_1: score,
            reason_codes: reasons.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Scenario (S6): a missing-feed snapshot, then a perfect one.
    /// Expected: the guard transitions to KILL, and the later healthy
    /// snapshot produces no event — KILL is latched.
    #[test]
    fn test_kill_latches() {
        let mut guard = EngineGuard::new(thresholds());

        let event = guard.update(&snapshot(ts(0), 0.2, &["missing_feed_BYBIT"]));
        let event = event.expect("transition to KILL");
        assert_eq!(event.state, EngineState::Kill);
        assert!(event.kill_latched);
        assert_eq!(guard.current_state, EngineState::Kill);

        let event = guard.update(&snapshot(ts(1), 1.0, &[]));
        assert!(event.is_none());
        assert_eq!(guard.current_state, EngineState::Kill);
    }

    /// Scenario: a freeze-score snapshot, a recovered score inside the
    /// recovery window, then one after the window.
    /// Expected: FREEZE holds through the early recovery and only returns
    /// to RUN once both the score and the elapsed window allow it.
    #[test]
    fn test_freeze_recover_window() {
        let mut t = thresholds();
        t.health_freeze_score = 0.6;
        t.health_recover_score = 0.9;
        t.health_recover_window_ms = 5000;
        let mut guard = EngineGuard::new(t);

        let event = guard.update(&snapshot(ts(0), 0.5, &[]));
        assert!(event.is_some());
        assert_eq!(guard.current_state, EngineState::Freeze);

        let event = guard.update(&snapshot(ts(2), 0.95, &[]));
        assert!(event.is_none());
        assert_eq!(guard.current_state, EngineState::Freeze);

        let event = guard.update(&snapshot(ts(6), 0.95, &[]));
        assert!(event.is_some());
        assert_eq!(guard.current_state, EngineState::Run);
    }

    /// Scenario: a soft reason drives DEGRADED; a score just below the
    /// recover bound holds it; a recovered score releases it.
    /// Expected: DEGRADED → DEGRADED (no event) → RUN.
    #[test]
    fn test_degraded_recover_score() {
        let mut guard = EngineGuard::new(thresholds());

        let event = guard.update(&snapshot(ts(0), 0.95, &["low_eps_BYBIT"]));
        assert!(event.is_some());
        assert_eq!(guard.current_state, EngineState::Degraded);

        let event = guard.update(&snapshot(ts(1), 0.89, &[]));
        assert!(event.is_none());
        assert_eq!(guard.current_state, EngineState::Degraded);

        let event = guard.update(&snapshot(ts(2), 0.95, &[]));
        assert!(event.is_some());
        assert_eq!(guard.current_state, EngineState::Run);
    }

    /// Scenario: stale feed reason with an otherwise fine score.
    /// Expected: FREEZE, not KILL.
    #[test]
    fn test_stale_freezes() {
        let mut guard = EngineGuard::new(thresholds());
        let event = guard.update(&snapshot(ts(0), 0.0, &["stale_BYBIT"]));
        // score 0 ≤ kill bound → KILL despite the stale reason
        assert_eq!(event.unwrap().state, EngineState::Kill);

        let mut guard = EngineGuard::new(thresholds());
        let event = guard.update(&snapshot(ts(0), 0.5, &["stale_BYBIT"]));
        assert_eq!(event.unwrap().state, EngineState::Freeze);
    }

    /// Scenario: mid divergence reason.
    /// Expected: immediate KILL with latch.
    #[test]
    fn test_mid_diff_kills() {
        let mut guard = EngineGuard::new(thresholds());
        let event = guard.update(&snapshot(ts(0), 0.9, &["mid_diff_high"]));
        assert_eq!(event.unwrap().state, EngineState::Kill);
        assert!(guard.kill_latched);
    }

    /// Scenario: an unchanged healthy state.
    /// Expected: no events at all.
    #[test]
    fn test_no_event_without_change() {
        let mut guard = EngineGuard::new(thresholds());
        assert!(guard.update(&snapshot(ts(0), 1.0, &[])).is_none());
        assert!(guard.update(&snapshot(ts(1), 0.99, &[])).is_none());
    }
}
