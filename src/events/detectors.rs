//! Rolling-quantile primitive detectors.
//!
//! Each feature keeps its own fixed window; once warm, a frame whose gated
//! features sit beyond their high/low quantiles emits a non-actionable
//! signal (E1–E4). These are indicators only — the structured setups in
//! [`crate::events::setups`] produce the actionable signals.

use std::collections::{BTreeMap, VecDeque};

use crate::features::FeatureFrame;
use crate::types::{EventName, SignalEvent, SignalMeta};

/// Bounded sample window answering nearest-rank quantile queries.
#[derive(Clone, Debug)]
pub struct RollingQuantile {
    window: usize,
    values: VecDeque<f64>,
}

impl RollingQuantile {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            values: VecDeque::with_capacity(window.max(1)),
        }
    }

    pub fn update(&mut self, value: f64) {
        if self.values.len() == self.window {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Nearest-rank quantile: index `⌊q · (n − 1)⌋` of the sorted window.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = (q * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn ready(&self, min_samples: usize) -> bool {
        self.values.len() >= min_samples
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DetectorConfig {
    pub window: usize,
    pub quantile_high: f64,
    pub quantile_low: f64,
    pub min_samples: usize,
}

pub struct DetectorEngine {
    config: DetectorConfig,
    depth: RollingQuantile,
    ofi: RollingQuantile,
    bias: RollingQuantile,
    delta: RollingQuantile,
    progress: RollingQuantile,
    replen: RollingQuantile,
    sweep: RollingQuantile,
    return_speed: RollingQuantile,
    post_abs: RollingQuantile,
    basis: RollingQuantile,
    lead_lag: RollingQuantile,
}

impl DetectorEngine {
    pub fn new(config: DetectorConfig) -> Self {
        let q = || RollingQuantile::new(config.window);
        Self {
            config,
            depth: q(),
            ofi: q(),
            bias: q(),
            delta: q(),
            progress: q(),
            replen: q(),
            sweep: q(),
            return_speed: q(),
            post_abs: q(),
            basis: q(),
            lead_lag: q(),
        }
    }

    pub fn evaluate(&mut self, frame: &FeatureFrame) -> Vec<SignalEvent> {
        self.depth.update(frame.depth_near);
        self.ofi.update(frame.ofi_z);
        self.bias.update(frame.microprice_bias);
        self.delta.update(frame.delta_size);
        self.progress.update(frame.price_progress);
        self.replen.update(frame.replenishment);
        self.sweep.update(frame.sweep_distance);
        self.return_speed.update(frame.return_speed);
        self.post_abs.update(frame.post_sweep_absorption);
        self.basis.update(frame.basis_z.abs());
        self.lead_lag.update(frame.lead_lag);

        if !self.depth.ready(self.config.min_samples) {
            return Vec::new();
        }

        let mut signals = Vec::new();

        // E1: thin book with aggressive one-sided pressure.
        if let (Some(depth_low), Some(ofi_high), Some(bias_high)) = (
            self.depth.quantile(self.config.quantile_low),
            self.ofi.quantile(self.config.quantile_high),
            self.bias.quantile(self.config.quantile_high),
        ) {
            if frame.depth_near <= depth_low
                && frame.ofi_z >= ofi_high
                && frame.microprice_bias >= bias_high
            {
                let score = avg(&[
                    score_low(frame.depth_near, depth_low),
                    score_high(frame.ofi_z, ofi_high),
                    score_high(frame.microprice_bias, bias_high),
                ]);
                signals.push(self.signal(
                    frame,
                    EventName::E1,
                    score,
                    &["depth_near_low", "ofi_z_high", "microprice_bias_high"],
                    &[
                        ("depth_near", frame.depth_near),
                        ("ofi_z", frame.ofi_z),
                        ("microprice_bias", frame.microprice_bias),
                    ],
                ));
            }
        }

        // E2: heavy churn that goes nowhere while the touch refills.
        if let (Some(delta_high), Some(progress_low), Some(replen_high)) = (
            self.delta.quantile(self.config.quantile_high),
            self.progress.quantile(self.config.quantile_low),
            self.replen.quantile(self.config.quantile_high),
        ) {
            if frame.delta_size >= delta_high
                && frame.price_progress <= progress_low
                && frame.replenishment >= replen_high
            {
                let score = avg(&[
                    score_high(frame.delta_size, delta_high),
                    score_low(frame.price_progress, progress_low),
                    score_high(frame.replenishment, replen_high),
                ]);
                signals.push(self.signal(
                    frame,
                    EventName::E2,
                    score,
                    &["delta_high", "price_progress_low", "replenishment_high"],
                    &[
                        ("delta_size", frame.delta_size),
                        ("price_progress", frame.price_progress),
                        ("replenishment", frame.replenishment),
                    ],
                ));
            }
        }

        // E3: fast sweep that is immediately absorbed.
        if let (Some(sweep_high), Some(return_high), Some(post_abs_high)) = (
            self.sweep.quantile(self.config.quantile_high),
            self.return_speed.quantile(self.config.quantile_high),
            self.post_abs.quantile(self.config.quantile_high),
        ) {
            if frame.sweep_distance >= sweep_high
                && frame.return_speed >= return_high
                && frame.post_sweep_absorption >= post_abs_high
            {
                let score = avg(&[
                    score_high(frame.sweep_distance, sweep_high),
                    score_high(frame.return_speed, return_high),
                    score_high(frame.post_sweep_absorption, post_abs_high),
                ]);
                signals.push(self.signal(
                    frame,
                    EventName::E3,
                    score,
                    &[
                        "sweep_distance_high",
                        "return_speed_high",
                        "post_sweep_absorption_high",
                    ],
                    &[
                        ("sweep_distance", frame.sweep_distance),
                        ("return_speed", frame.return_speed),
                        ("post_sweep_absorption", frame.post_sweep_absorption),
                    ],
                ));
            }
        }

        // E4: stretched cross-venue basis with the leader pulling.
        if let (Some(basis_high), Some(lead_lag_high)) = (
            self.basis.quantile(self.config.quantile_high),
            self.lead_lag.quantile(self.config.quantile_high),
        ) {
            if frame.basis_z.abs() >= basis_high && frame.lead_lag >= lead_lag_high {
                let score = avg(&[
                    score_high(frame.basis_z.abs(), basis_high),
                    score_high(frame.lead_lag, lead_lag_high),
                ]);
                signals.push(self.signal(
                    frame,
                    EventName::E4,
                    score,
                    &["basis_z_extreme", "lead_lag_high"],
                    &[("basis_z", frame.basis_z), ("lead_lag", frame.lead_lag)],
                ));
            }
        }

        signals
    }

    fn signal(
        &self,
        frame: &FeatureFrame,
        event_name: EventName,
        score: f64,
        reasons: &[&str],
        values: &[(&str, f64)],
    ) -> SignalEvent {
        SignalEvent {
            event_name,
            symbol: frame.symbol.clone(),
            venue: frame.venue,
            ts_utc: frame.ts_utc,
            score_0_1: score,
            reason_codes: reasons.iter().map(|r| r.to_string()).collect(),
            meta: SignalMeta::Detector {
                values: values
                    .iter()
                    .map(|(name, value)| (name.to_string(), *value))
                    .collect::<BTreeMap<_, _>>(),
            },
        }
    }
}

/// Normalised "value reached the high threshold" score.
fn score_high(value: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        return 0.0;
    }
    (value / threshold).clamp(0.0, 1.0)
}

/// Normalised "value stayed under the low threshold" score.
fn score_low(value: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        return 0.0;
    }
    if value <= threshold {
        return 1.0;
    }
    (threshold / value).clamp(0.0, 1.0)
}

fn avg(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
