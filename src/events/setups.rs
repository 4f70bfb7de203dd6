//! Structured setup detection over the micro-bar stream.
//!
//! Four independent state machines share one bounded bar history and are
//! updated per bar in the order PER, DLV, SAF, AFS. A DLV breakout seeds
//! PER so a confirmed re-entry can follow the vacuum. Each stage is a sum
//! type variant; transitions build fresh values, so a reset can never leak
//! stage-specific state into the next cycle.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::config::Thresholds;
use crate::events::clamp_score;
use crate::events::microbars::MicroBar;
use crate::types::{EventName, SignalEvent, SignalMeta, Side, Venue};

const EPS: f64 = 1e-12;

// ─── Bar helpers ───

fn bar_range(bar: &MicroBar) -> f64 {
    bar.high - bar.low
}

fn upper_wick(bar: &MicroBar) -> f64 {
    bar.high - bar.open.max(bar.close)
}

fn lower_wick(bar: &MicroBar) -> f64 {
    bar.open.min(bar.close) - bar.low
}

fn bar_direction(bar: &MicroBar) -> i8 {
    if bar.close > bar.open {
        1
    } else if bar.close < bar.open {
        -1
    } else {
        0
    }
}

/// How far the close sits off the directional extreme, as a range share.
fn close_off_ratio(bar: &MicroBar, direction: i8) -> f64 {
    let range = bar_range(bar).max(EPS);
    if direction > 0 {
        (bar.high - bar.close) / range
    } else {
        (bar.close - bar.low) / range
    }
}

/// The wick against the direction of travel, as a range share.
fn counter_wick_ratio(bar: &MicroBar, direction: i8) -> f64 {
    let range = bar_range(bar).max(EPS);
    if direction > 0 {
        lower_wick(bar) / range
    } else {
        upper_wick(bar) / range
    }
}

/// Overlap of consecutive bar bodies relative to the current bar's range.
fn overlap_ratio(prev: &MicroBar, curr: &MicroBar) -> f64 {
    let overlap = (prev.high.min(curr.high) - prev.low.max(curr.low)).max(0.0);
    overlap / bar_range(curr).max(EPS)
}

fn bps(value: f64, base: f64) -> f64 {
    value / base.max(EPS) * 10_000.0
}

fn ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn dir_side(direction: i8) -> Side {
    if direction > 0 {
        Side::Buy
    } else {
        Side::Sell
    }
}

// ─── Stage types ───

#[derive(Clone, Debug, Default)]
enum DlvState {
    #[default]
    Idle,
    Pause(DlvPause),
    AwaitBreakout(DlvArmed),
}

#[derive(Clone, Debug)]
struct DlvPause {
    direction: i8,
    pre_high: f64,
    pre_low: f64,
    run_quality: f64,
    avg_run_range: f64,
    pause: Vec<MicroBar>,
}

#[derive(Clone, Debug)]
struct DlvArmed {
    direction: i8,
    pre_high: f64,
    pre_low: f64,
    run_quality: f64,
    avg_run_range: f64,
    pause_high: f64,
    pause_low: f64,
    pause_range: f64,
}

#[derive(Clone, Copy, Debug)]
struct SafEntry {
    ts_end: DateTime<Utc>,
    reach_bps: f64,
    ofi_abs: f64,
}

#[derive(Clone, Debug)]
struct SafCollect {
    attack_side: i8,
    level: f64,
    attacks: Vec<SafEntry>,
}

#[derive(Clone, Debug, Default)]
enum SafState {
    #[default]
    Idle,
    Collecting(SafCollect),
    AwaitBreak(SafCollect),
}

#[derive(Clone, Debug)]
struct AfsAccept {
    sweep_direction: i8,
    pre_high: f64,
    pre_low: f64,
    sweep_bar: MicroBar,
    acceptance: Vec<MicroBar>,
}

#[derive(Clone, Debug, Default)]
enum AfsState {
    #[default]
    Idle,
    Acceptance(AfsAccept),
}

#[derive(Clone, Debug)]
struct PerArmed {
    direction: i8,
    old_range_high: f64,
    old_range_low: f64,
    peak_high: f64,
    peak_low: f64,
    pullback_low: Option<f64>,
    pullback_high: Option<f64>,
    pullback_seen: bool,
    bars_since: usize,
    last_bar: Option<MicroBar>,
}

#[derive(Clone, Debug, Default)]
enum PerState {
    #[default]
    Idle,
    Armed(PerArmed),
}

// ─── Engine ───

pub struct SetupEngine {
    symbol: String,
    venue: Venue,
    t: Thresholds,
    history: VecDeque<MicroBar>,
    max_history: usize,
    dlv: DlvState,
    saf: SafState,
    afs: AfsState,
    per: PerState,
}

impl SetupEngine {
    pub fn new(symbol: impl Into<String>, venue: Venue, thresholds: Thresholds) -> Self {
        let max_history = Self::max_history(&thresholds);
        Self {
            symbol: symbol.into(),
            venue,
            t: thresholds,
            history: VecDeque::with_capacity(max_history),
            max_history,
            dlv: DlvState::Idle,
            saf: SafState::Idle,
            afs: AfsState::Idle,
            per: PerState::Idle,
        }
    }

    fn max_history(t: &Thresholds) -> usize {
        [
            t.dlv_pre_bars + t.dlv_run_bars + t.dlv_pause_bars + 8,
            t.afs_pre_bars + t.afs_hold_bars_max + 8,
            t.saf_level_bars + t.saf_min_attacks + 8,
            t.per_ttl_bars + 8,
            64,
        ]
        .into_iter()
        .max()
        .unwrap_or(64)
    }

    /// Seed the PER machine from a DLV breakout signal.
    pub fn on_primitive_signal(&mut self, signal: &SignalEvent) {
        if let SignalMeta::Dlv {
            direction,
            pre_range_high,
            pre_range_low,
            peak_high,
            peak_low,
            ..
        } = &signal.meta
        {
            let direction = if *direction == Side::Buy { 1 } else { -1 };
            self.per = PerState::Armed(PerArmed {
                direction,
                old_range_high: *pre_range_high,
                old_range_low: *pre_range_low,
                peak_high: *peak_high,
                peak_low: *peak_low,
                pullback_low: None,
                pullback_high: None,
                pullback_seen: false,
                bars_since: 0,
                last_bar: None,
            });
        }
    }

    pub fn on_bar(&mut self, bar: &MicroBar) -> Vec<SignalEvent> {
        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(*bar);

        let mut signals = Vec::new();

        if let Some(signal) = self.update_per(bar) {
            signals.push(signal);
        }
        if let Some(signal) = self.update_dlv(bar) {
            self.on_primitive_signal(&signal);
            signals.push(signal);
        }
        if let Some(signal) = self.update_saf(bar) {
            signals.push(signal);
        }
        if let Some(signal) = self.update_afs(bar) {
            signals.push(signal);
        }

        signals
    }

    fn signal(
        &self,
        event_name: EventName,
        ts_utc: DateTime<Utc>,
        score: f64,
        reasons: &[&str],
        meta: SignalMeta,
    ) -> SignalEvent {
        SignalEvent {
            event_name,
            symbol: self.symbol.clone(),
            venue: self.venue,
            ts_utc,
            score_0_1: score,
            reason_codes: reasons.iter().map(|r| r.to_string()).collect(),
            meta,
        }
    }

    // ─── DLV: directional liquidity vacuum ───

    fn update_dlv(&mut self, bar: &MicroBar) -> Option<SignalEvent> {
        if matches!(self.dlv, DlvState::Idle) {
            self.try_arm_dlv();
            return None;
        }

        let (direction, pre_high, pre_low) = match &self.dlv {
            DlvState::Pause(p) => (p.direction, p.pre_high, p.pre_low),
            DlvState::AwaitBreakout(a) => (a.direction, a.pre_high, a.pre_low),
            DlvState::Idle => unreachable!(),
        };

        // Any retest into the old range invalidates the vacuum, in both the
        // pause and the await-breakout stages.
        let tol = self.t.dlv_retest_tolerance_bps / 10_000.0;
        let retested = if direction > 0 {
            bar.low <= pre_high * (1.0 + tol)
        } else {
            bar.high >= pre_low * (1.0 - tol)
        };
        if retested {
            self.dlv = DlvState::Idle;
            return None;
        }

        match std::mem::take(&mut self.dlv) {
            DlvState::Pause(mut pause) => {
                pause.pause.push(*bar);
                let pause_high = pause.pause.iter().map(|b| b.high).fold(f64::MIN, f64::max);
                let pause_low = pause.pause.iter().map(|b| b.low).fold(f64::MAX, f64::min);
                let pause_range = pause_high - pause_low;
                if pause_range > self.t.dlv_pause_range_ratio * pause.avg_run_range.max(EPS) {
                    return None;
                }
                if pause.pause.len() < self.t.dlv_pause_bars {
                    self.dlv = DlvState::Pause(pause);
                    return None;
                }
                self.dlv = DlvState::AwaitBreakout(DlvArmed {
                    direction: pause.direction,
                    pre_high: pause.pre_high,
                    pre_low: pause.pre_low,
                    run_quality: pause.run_quality,
                    avg_run_range: pause.avg_run_range,
                    pause_high,
                    pause_low,
                    pause_range,
                });
                None
            }
            DlvState::AwaitBreakout(armed) => {
                let breakout = (armed.direction > 0 && bar.close > armed.pause_high)
                    || (armed.direction < 0 && bar.close < armed.pause_low);
                if !breakout {
                    self.dlv = DlvState::AwaitBreakout(armed);
                    return None;
                }

                let avg_run_range = armed.avg_run_range.max(EPS);
                let pause_quality = clamp_score(1.0 - armed.pause_range / avg_run_range);
                let score =
                    clamp_score((clamp_score(armed.run_quality) * pause_quality).sqrt());
                Some(self.signal(
                    EventName::E1,
                    bar.ts_end,
                    score,
                    &["DLV", "dlv_run", "dlv_pause", "dlv_breakout"],
                    SignalMeta::Dlv {
                        direction: dir_side(armed.direction),
                        pre_range_high: armed.pre_high,
                        pre_range_low: armed.pre_low,
                        pause_high: armed.pause_high,
                        pause_low: armed.pause_low,
                        peak_high: bar.high,
                        peak_low: bar.low,
                    },
                ))
            }
            DlvState::Idle => None,
        }
    }

    /// From idle, look for a clean one-directional run clear of the prior
    /// range; success arms the pause stage.
    fn try_arm_dlv(&mut self) {
        let t = &self.t;
        let needed = t.dlv_pre_bars + t.dlv_run_bars;
        if self.history.len() < needed {
            return;
        }

        let hist: Vec<&MicroBar> = self.history.iter().collect();
        let run = &hist[hist.len() - t.dlv_run_bars..];
        let pre = &hist[hist.len() - needed..hist.len() - t.dlv_run_bars];
        let pre_high = pre.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let pre_low = pre.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        let direction = bar_direction(run[0]);
        if direction == 0 || run.iter().any(|&b| bar_direction(b) != direction) {
            return;
        }

        let tol = t.dlv_retest_tolerance_bps / 10_000.0;
        if direction > 0 {
            let min_allowed = pre_high * (1.0 + tol);
            if run.iter().any(|b| b.low <= min_allowed) {
                return;
            }
        } else {
            let max_allowed = pre_low * (1.0 - tol);
            if run.iter().any(|b| b.high >= max_allowed) {
                return;
            }
        }

        let mut quality_terms = Vec::with_capacity(run.len());
        for (idx, &b) in run.iter().enumerate() {
            let mut overlap = 0.0;
            if idx > 0 {
                overlap = overlap_ratio(run[idx - 1], b);
                if overlap > t.dlv_max_overlap_ratio {
                    return;
                }
            }
            let counter = counter_wick_ratio(b, direction);
            let close_off = close_off_ratio(b, direction);
            if counter > t.dlv_max_counter_wick_ratio {
                return;
            }
            if close_off > t.dlv_max_close_off_ratio {
                return;
            }
            quality_terms.push((1.0 - overlap) * (1.0 - counter) * (1.0 - close_off));
        }

        let avg_run_range = run.iter().map(|&b| bar_range(b)).sum::<f64>() / run.len() as f64;
        let run_quality = quality_terms.iter().sum::<f64>() / quality_terms.len() as f64;

        self.dlv = DlvState::Pause(DlvPause {
            direction,
            pre_high,
            pre_low,
            run_quality,
            avg_run_range,
            pause: Vec::new(),
        });
    }

    // ─── SAF: attack fatigue at a level ───

    fn update_saf(&mut self, bar: &MicroBar) -> Option<SignalEvent> {
        if self.history.len() < 2 {
            return None;
        }
        let prev = self.history[self.history.len() - 2];

        if matches!(self.saf, SafState::AwaitBreak(_)) {
            let SafState::AwaitBreak(collect) = std::mem::take(&mut self.saf) else {
                unreachable!()
            };
            if let Some(last) = collect.attacks.last() {
                if ms(bar.ts_end) - ms(last.ts_end) > self.t.saf_window_ms {
                    return None;
                }
            }
            if collect.attack_side > 0 && bar.close < prev.low {
                return Some(self.emit_saf(collect, bar, &prev));
            }
            if collect.attack_side < 0 && bar.close > prev.high {
                return Some(self.emit_saf(collect, bar, &prev));
            }
            self.saf = SafState::AwaitBreak(collect);
            return None;
        }

        let return_bps = bps((bar.close - bar.open).abs(), bar.open);
        let attack_side = if bar.ofi_mean > 0.0 {
            1
        } else if bar.ofi_mean < 0.0 {
            -1
        } else {
            0
        };
        let is_attack = attack_side != 0
            && bar.ofi_abs_mean >= self.t.saf_min_ofi_abs
            && bar.replenishment_mean >= self.t.saf_min_replenishment
            && return_bps.abs() <= self.t.saf_max_return_bps;

        if !is_attack {
            if let SafState::Collecting(collect) = &self.saf {
                if let Some(first) = collect.attacks.first() {
                    if ms(bar.ts_end) - ms(first.ts_end) > self.t.saf_window_ms {
                        self.saf = SafState::Idle;
                    }
                }
            }
            return None;
        }

        if self.history.len() < self.t.saf_level_bars + 1 {
            return None;
        }
        let hist: Vec<&MicroBar> = self.history.iter().collect();
        let level_bars = &hist[hist.len() - self.t.saf_level_bars - 1..hist.len() - 1];
        let (level, reach) = if attack_side > 0 {
            let level = level_bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            (level, bps(level - bar.high, level).max(0.0))
        } else {
            let level = level_bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            (level, bps(bar.low - level, level).max(0.0))
        };

        let entry = SafEntry {
            ts_end: bar.ts_end,
            reach_bps: reach,
            ofi_abs: bar.ofi_abs_mean,
        };
        let restart = SafCollect {
            attack_side,
            level,
            attacks: vec![entry],
        };

        let SafState::Collecting(mut collect) = std::mem::take(&mut self.saf) else {
            // Idle: open a fresh collection around this level.
            self.saf = SafState::Collecting(restart);
            return None;
        };

        // Side flip, stale window, or level drift restarts the collection.
        if collect.attack_side != attack_side {
            self.saf = SafState::Collecting(restart);
            return None;
        }
        if let Some(first) = collect.attacks.first() {
            if ms(bar.ts_end) - ms(first.ts_end) > self.t.saf_window_ms {
                self.saf = SafState::Collecting(restart);
                return None;
            }
        }
        if bps((level - collect.level).abs(), collect.level) > self.t.saf_level_tolerance_bps {
            self.saf = SafState::Collecting(restart);
            return None;
        }

        collect.attacks.push(entry);

        if collect.attacks.len() < self.t.saf_min_attacks {
            self.saf = SafState::Collecting(collect);
            return None;
        }

        let first = collect.attacks[0];
        let last = collect.attacks[collect.attacks.len() - 1];
        let reach_worsen = last.reach_bps - first.reach_bps;
        if reach_worsen < self.t.saf_reach_worsen_bps
            || last.ofi_abs > first.ofi_abs * self.t.saf_ofi_decay_ratio
        {
            self.saf = SafState::Collecting(collect);
            return None;
        }

        self.saf = SafState::AwaitBreak(collect);
        None
    }

    fn emit_saf(&self, collect: SafCollect, bar: &MicroBar, prev: &MicroBar) -> SignalEvent {
        let t = &self.t;
        let first = collect.attacks.first().copied();
        let last = collect.attacks.last().copied();
        let reach_worsen = match (first, last) {
            (Some(first), Some(last)) => last.reach_bps - first.reach_bps,
            _ => 0.0,
        };
        let reach_quality = if t.saf_reach_worsen_bps <= 0.0 {
            1.0
        } else {
            clamp_score(reach_worsen / t.saf_reach_worsen_bps)
        };
        let target_ofi = first.map(|f| f.ofi_abs * t.saf_ofi_decay_ratio).unwrap_or(0.0);
        let last_ofi = last.map(|l| l.ofi_abs).unwrap_or(0.0);
        let ofi_quality = if target_ofi <= 0.0 {
            1.0
        } else {
            clamp_score(target_ofi / last_ofi.max(EPS))
        };
        let score = clamp_score((reach_quality * ofi_quality).sqrt());

        let reversal = -collect.attack_side;
        self.signal(
            EventName::E2,
            bar.ts_end,
            score,
            &["SAF", "saf_confirmed", "structure_break"],
            SignalMeta::Saf {
                direction: dir_side(reversal),
                level: collect.level,
                reach_bps: last.map(|l| l.reach_bps).unwrap_or(0.0),
                prev_high: prev.high,
                prev_low: prev.low,
            },
        )
    }

    // ─── AFS: acceptance failure after a sweep ───

    fn update_afs(&mut self, bar: &MicroBar) -> Option<SignalEvent> {
        let t = &self.t;

        if matches!(self.afs, AfsState::Idle) {
            if self.history.len() < t.afs_pre_bars + 1 {
                return None;
            }
            let hist: Vec<&MicroBar> = self.history.iter().collect();
            let pre = &hist[hist.len() - t.afs_pre_bars - 1..hist.len() - 1];
            let pre_high = pre.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let pre_low = pre.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let up_sweep = bar.high >= pre_high * (1.0 + t.afs_sweep_bps / 10_000.0);
            let down_sweep = bar.low <= pre_low * (1.0 - t.afs_sweep_bps / 10_000.0);
            if !up_sweep && !down_sweep {
                return None;
            }
            let sweep_direction = if up_sweep && down_sweep {
                // Both bounds taken out: follow the larger extension.
                let up_ext = bps(bar.high - pre_high, pre_high);
                let down_ext = bps(pre_low - bar.low, pre_low);
                if up_ext >= down_ext {
                    1
                } else {
                    -1
                }
            } else if up_sweep {
                1
            } else {
                -1
            };

            self.afs = AfsState::Acceptance(AfsAccept {
                sweep_direction,
                pre_high,
                pre_low,
                sweep_bar: *bar,
                acceptance: Vec::new(),
            });
            return None;
        }

        let AfsState::Acceptance(mut accept) = std::mem::take(&mut self.afs) else {
            return None;
        };

        let accept_cond = if accept.sweep_direction > 0 {
            bar.close > accept.pre_high
        } else {
            bar.close < accept.pre_low
        };

        if accept_cond {
            // Still holding beyond the swept level; bounded by hold_bars_max.
            if accept.acceptance.len() >= t.afs_hold_bars_max {
                return None;
            }
            accept.acceptance.push(*bar);
            self.afs = AfsState::Acceptance(accept);
            return None;
        }

        if accept.acceptance.is_empty() {
            return None;
        }

        let acc_high = accept.acceptance.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let acc_low = accept.acceptance.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let acc_range = acc_high - acc_low;
        let sweep_range = bar_range(&accept.sweep_bar).max(EPS);

        if acc_range > t.afs_consol_range_ratio * sweep_range {
            return None;
        }

        let follow_bps = if accept.sweep_direction > 0 {
            bps(acc_high - accept.sweep_bar.high, accept.sweep_bar.high)
        } else {
            bps(accept.sweep_bar.low - acc_low, accept.sweep_bar.low)
        };
        if follow_bps > t.afs_followthrough_max_bps {
            return None;
        }

        let (is_fail, direction) = if accept.sweep_direction > 0 {
            (bar.close <= accept.pre_high && bar.close < acc_low, Side::Sell)
        } else {
            (bar.close >= accept.pre_low && bar.close > acc_high, Side::Buy)
        };
        if !is_fail {
            return None;
        }

        let sweep_ext_bps = if accept.sweep_direction > 0 {
            bps(accept.sweep_bar.high - accept.pre_high, accept.pre_high)
        } else {
            bps(accept.pre_low - accept.sweep_bar.low, accept.pre_low)
        };
        let sweep_quality = if t.afs_sweep_bps <= 0.0 {
            1.0
        } else {
            clamp_score(sweep_ext_bps / t.afs_sweep_bps)
        };
        let denom = (t.afs_consol_range_ratio * sweep_range).max(EPS);
        let consol_quality = clamp_score(1.0 - acc_range / denom);
        let score = clamp_score((sweep_quality * consol_quality).sqrt());

        Some(self.signal(
            EventName::E3,
            bar.ts_end,
            score,
            &["AFS", "afs_acceptance_failed"],
            SignalMeta::Afs {
                direction,
                pre_range_high: accept.pre_high,
                pre_range_low: accept.pre_low,
                sweep_high: accept.sweep_bar.high,
                sweep_low: accept.sweep_bar.low,
                acceptance_high: acc_high,
                acceptance_low: acc_low,
                acceptance_range: acc_range,
            },
        ))
    }

    // ─── PER: post-event re-entry, seeded by DLV ───

    fn update_per(&mut self, bar: &MicroBar) -> Option<SignalEvent> {
        let PerState::Armed(mut armed) = std::mem::take(&mut self.per) else {
            return None;
        };
        let t = &self.t;

        armed.bars_since += 1;
        if armed.bars_since > t.per_ttl_bars {
            return None;
        }

        if armed.direction > 0 {
            armed.peak_high = armed.peak_high.max(bar.high);
            armed.pullback_low = Some(match armed.pullback_low {
                Some(low) => low.min(bar.low),
                None => bar.low,
            });
            if let Some(last) = &armed.last_bar {
                if bar.low < last.low {
                    armed.pullback_seen = true;
                }
            }
        } else {
            armed.peak_low = armed.peak_low.min(bar.low);
            armed.pullback_high = Some(match armed.pullback_high {
                Some(high) => high.max(bar.high),
                None => bar.high,
            });
            if let Some(last) = &armed.last_bar {
                if bar.high > last.high {
                    armed.pullback_seen = true;
                }
            }
        }

        let depth_bps = if armed.direction > 0 {
            let hold_level = armed.old_range_high * (1.0 + t.per_min_hold_bps / 10_000.0);
            if armed.pullback_low.is_some_and(|low| low <= hold_level) {
                return None;
            }
            let depth = bps(
                armed.peak_high - armed.pullback_low.unwrap_or(armed.peak_high),
                armed.peak_high,
            );
            if depth > t.per_max_pullback_bps {
                return None;
            }
            depth
        } else {
            let hold_level = armed.old_range_low * (1.0 - t.per_min_hold_bps / 10_000.0);
            if armed.pullback_high.is_some_and(|high| high >= hold_level) {
                return None;
            }
            let depth = bps(
                armed.pullback_high.unwrap_or(armed.peak_low) - armed.peak_low,
                armed.peak_low,
            );
            if depth > t.per_max_pullback_bps {
                return None;
            }
            depth
        };

        if let Some(prev) = &armed.last_bar {
            if armed.pullback_seen {
                if armed.direction > 0 && bar.close > prev.high {
                    return Some(self.emit_per(&armed, bar, armed.peak_high, armed.pullback_low, depth_bps));
                }
                if armed.direction < 0 && bar.close < prev.low {
                    return Some(self.emit_per(&armed, bar, armed.peak_low, armed.pullback_high, depth_bps));
                }
            }
        }

        armed.last_bar = Some(*bar);
        self.per = PerState::Armed(armed);
        None
    }

    fn emit_per(
        &self,
        armed: &PerArmed,
        bar: &MicroBar,
        peak: f64,
        pullback: Option<f64>,
        depth_bps: f64,
    ) -> SignalEvent {
        let t = &self.t;

        let hold_bps = if armed.direction > 0 {
            bps(pullback.unwrap_or(peak) - armed.old_range_high, armed.old_range_high)
        } else {
            bps(armed.old_range_low - pullback.unwrap_or(peak), armed.old_range_low)
        };

        let hold_quality = if t.per_min_hold_bps <= 0.0 {
            1.0
        } else {
            clamp_score(hold_bps / t.per_min_hold_bps)
        };
        let depth_quality = if t.per_max_pullback_bps <= 0.0 {
            1.0
        } else {
            clamp_score(1.0 - depth_bps / t.per_max_pullback_bps)
        };
        let score = clamp_score((hold_quality * depth_quality).sqrt());

        self.signal(
            EventName::E1,
            bar.ts_end,
            score,
            &["PER", "per_reprice_confirmed"],
            SignalMeta::Per {
                direction: dir_side(armed.direction),
                old_range_high: armed.old_range_high,
                old_range_low: armed.old_range_low,
                peak,
                pullback,
                depth_bps,
            },
        )
    }
}
