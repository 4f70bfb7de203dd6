//! Cross-venue consensus: a signal becomes tradable only when both data
//! venues report the same event within a bounded time window, and the
//! health guard allows the engine to act on it.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::bus::Event;
use crate::config::Thresholds;
use crate::events::clamp_score;
use crate::health::guard::EngineGuard;
use crate::health::monitor::{HealthMonitor, REQUIRED_VENUES};
use crate::types::{EngineState, Setup, Side, SignalEvent, SignalMeta, Venue};

/// Multiplier applied when a recent cross-venue dislocation has already
/// snapped back (a "reversion-looks-better" boost for fade setups).
const RLB_BOOST: f64 = 1.10;

pub struct ConsensusOutcome {
    pub signal: SignalEvent,
    /// 1.0 in RUN; `health_risk_scale_degraded` when the guard is DEGRADED.
    pub risk_scale: f64,
}

pub struct ConsensusGate {
    thresholds: Thresholds,
    latest: HashMap<Venue, SignalEvent>,
    mid_diff_history: VecDeque<(DateTime<Utc>, f64)>,
}

impl ConsensusGate {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            latest: HashMap::new(),
            mid_diff_history: VecDeque::new(),
        }
    }

    /// Evaluate one incoming signal. Emits DATA_QUALITY / ENGINE_STATE /
    /// blocked-signal events into `out`; returns the confirmed consensus
    /// signal when every gate passes.
    pub fn on_signal(
        &mut self,
        signal: &SignalEvent,
        health: &mut HealthMonitor,
        guard: &mut EngineGuard,
        out: &mut Vec<Event>,
    ) -> Option<ConsensusOutcome> {
        if !signal.meta.actionable()
            || signal.meta.is_consensus()
            || signal.meta.is_blocked()
            || !REQUIRED_VENUES.contains(&signal.venue)
        {
            return None;
        }

        self.latest.insert(signal.venue, signal.clone());

        let peer_venue = if signal.venue == REQUIRED_VENUES[0] {
            REQUIRED_VENUES[1]
        } else {
            REQUIRED_VENUES[0]
        };
        let peer = self.latest.get(&peer_venue)?.clone();

        if peer.event_name != signal.event_name || peer.symbol != signal.symbol {
            return None;
        }

        let setup = signal.meta.setup();
        let peer_setup = peer.meta.setup();
        if (setup.is_some() || peer_setup.is_some()) && setup != peer_setup {
            return None;
        }

        let direction = signal.meta.direction();
        let peer_direction = peer.meta.direction();
        if (direction.is_some() || peer_direction.is_some()) && direction != peer_direction {
            return None;
        }

        let delta_ms = (signal.ts_utc - peer.ts_utc).num_milliseconds().abs();
        if delta_ms > self.thresholds.consensus_window_ms {
            return None;
        }

        let mut combined = (signal.score_0_1 * peer.score_0_1).max(0.0).sqrt();

        let mut rlb_boost = false;
        if matches!(setup, Some(Setup::Saf) | Some(Setup::Afs)) {
            if self.rlb_applies(signal.ts_utc, current_mid_diff(health)) {
                combined = clamp_score(combined * RLB_BOOST);
                rlb_boost = true;
            }
        }

        if combined < self.thresholds.signal_score_min {
            debug!(
                event = %signal.event_name,
                combined,
                "consensus score below minimum, suppressed"
            );
            return None;
        }

        let snapshot = health.snapshot(&signal.symbol, signal.ts_utc);
        if let Some(diff) = snapshot.mid_diff_bps {
            self.record_mid_diff(snapshot.ts_utc, diff);
        }
        let mid_diff_bps = snapshot.mid_diff_bps;
        let reasons = snapshot.reason_codes.clone();
        out.push(Event::DataQuality(snapshot.clone()));

        if let Some(transition) = guard.update(&snapshot) {
            out.push(Event::EngineState(transition));
        }

        match guard.current_state {
            EngineState::Freeze | EngineState::Kill => {
                out.push(Event::Signal(SignalEvent {
                    event_name: signal.event_name,
                    symbol: signal.symbol.clone(),
                    venue: signal.venue,
                    ts_utc: signal.ts_utc,
                    score_0_1: combined,
                    reason_codes: vec!["consensus_blocked".into()],
                    meta: SignalMeta::Blocked {
                        state: guard.current_state,
                        reasons,
                    },
                }));
                None
            }
            state => {
                let risk_scale = if state == EngineState::Degraded {
                    self.thresholds.health_risk_scale_degraded
                } else {
                    1.0
                };
                let mut reason_codes = vec!["consensus_confirmed".to_string()];
                if rlb_boost {
                    reason_codes.push("rlb_boost".into());
                }
                Some(ConsensusOutcome {
                    signal: SignalEvent {
                        event_name: signal.event_name,
                        symbol: signal.symbol.clone(),
                        venue: signal.venue,
                        ts_utc: signal.ts_utc,
                        score_0_1: combined,
                        reason_codes,
                        meta: SignalMeta::Consensus {
                            direction: direction.or(peer_direction).unwrap_or(Side::Unknown),
                            setup,
                            venues: (peer.venue, signal.venue),
                            scores: (peer.score_0_1, signal.score_0_1),
                            mid_diff_bps,
                            rlb_boost,
                        },
                    },
                    risk_scale,
                })
            }
        }
    }

    /// A spike at or above `rlb_spike_bps` inside the lookback window, with
    /// the venues currently re-aligned.
    fn rlb_applies(&self, ref_ts: DateTime<Utc>, current_diff: Option<f64>) -> bool {
        let Some(current) = current_diff else {
            return false;
        };
        if current > self.thresholds.max_mid_diff_bps {
            return false;
        }
        self.mid_diff_history.iter().any(|(ts, diff)| {
            (ref_ts - *ts).num_milliseconds() <= self.thresholds.rlb_window_ms
                && *diff >= self.thresholds.rlb_spike_bps
        })
    }

    fn record_mid_diff(&mut self, ts_utc: DateTime<Utc>, diff_bps: f64) {
        self.mid_diff_history.push_back((ts_utc, diff_bps));
        while self
            .mid_diff_history
            .front()
            .is_some_and(|(ts, _)| (ts_utc - *ts).num_milliseconds() > self.thresholds.rlb_window_ms)
        {
            self.mid_diff_history.pop_front();
        }
    }
}

fn current_mid_diff(health: &HealthMonitor) -> Option<f64> {
    let mid_a = health.mid_for(REQUIRED_VENUES[0])?;
    let mid_b = health.mid_for(REQUIRED_VENUES[1])?;
    let avg = ((mid_a + mid_b) / 2.0).max(1e-12);
    Some((mid_a - mid_b).abs() / avg * 10_000.0)
}
