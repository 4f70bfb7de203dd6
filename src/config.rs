//! Engine configuration loaded from a YAML file.
//!
//! `symbols`, the core `thresholds` keys and `risk_phases` are required and
//! fail startup with the offending key path; every detector, setup,
//! consensus and health knob is optional and falls back to the documented
//! default. An unknown `risk.active_phase` falls back silently to `F0`,
//! else to the lowest sorted phase name.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config {path}: risk_phases must not be empty")]
    NoRiskPhases { path: String },
}

#[derive(Clone, Debug, Deserialize)]
pub struct SymbolsConfig {
    /// Symbol of the leading data venue (e.g. "BTCUSDT").
    pub leader: String,
    /// Symbol routed to the execution venue (e.g. "BTCUSD_CFD").
    pub exec: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct RiskPhase {
    pub risk_frac: f64,
    pub max_daily_loss: f64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RiskSelection {
    pub active_phase: Option<String>,
}

/// Detector, setup, consensus and health parameters. The first six fields
/// are required in the config file; everything else is optional.
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "ThresholdsDe")]
pub struct Thresholds {
    pub window: usize,
    pub depth_k: usize,
    pub quantile_high: f64,
    pub quantile_low: f64,
    pub min_samples: usize,
    pub signal_score_min: f64,

    pub consensus_window_ms: i64,
    pub max_stale_ms: i64,
    pub bar_interval_ms: i64,

    pub dlv_pre_bars: usize,
    pub dlv_run_bars: usize,
    pub dlv_pause_bars: usize,
    pub dlv_max_overlap_ratio: f64,
    pub dlv_max_counter_wick_ratio: f64,
    pub dlv_max_close_off_ratio: f64,
    pub dlv_pause_range_ratio: f64,
    pub dlv_retest_tolerance_bps: f64,

    pub afs_pre_bars: usize,
    pub afs_sweep_bps: f64,
    pub afs_hold_bars_max: usize,
    pub afs_consol_range_ratio: f64,
    pub afs_followthrough_max_bps: f64,

    pub saf_level_bars: usize,
    pub saf_window_ms: i64,
    pub saf_min_attacks: usize,
    pub saf_level_tolerance_bps: f64,
    pub saf_max_return_bps: f64,
    pub saf_min_replenishment: f64,
    pub saf_min_ofi_abs: f64,
    pub saf_reach_worsen_bps: f64,
    pub saf_ofi_decay_ratio: f64,

    pub per_ttl_bars: usize,
    pub per_min_hold_bps: f64,
    pub per_max_pullback_bps: f64,

    pub rlb_window_ms: i64,
    pub rlb_spike_bps: f64,
    pub max_mid_diff_bps: f64,

    pub health_eps_window_ms: i64,
    pub health_min_eps: f64,
    pub health_rate_window_ms: i64,
    pub health_max_resync_per_min: f64,
    pub health_max_desync_per_min: f64,
    pub health_max_gaps_in_window: usize,
    pub health_max_queue_depth: usize,
    pub health_kill_score: f64,
    pub health_freeze_score: f64,
    pub health_degraded_score: f64,
    pub health_recover_score: f64,
    pub health_recover_window_ms: i64,
    pub health_risk_scale_degraded: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            window: 300,
            depth_k: 10,
            quantile_high: 0.9,
            quantile_low: 0.1,
            min_samples: 50,
            signal_score_min: 0.2,

            consensus_window_ms: 750,
            max_stale_ms: 2000,
            bar_interval_ms: 500,

            dlv_pre_bars: 20,
            dlv_run_bars: 4,
            dlv_pause_bars: 2,
            dlv_max_overlap_ratio: 0.20,
            dlv_max_counter_wick_ratio: 0.25,
            dlv_max_close_off_ratio: 0.20,
            dlv_pause_range_ratio: 0.40,
            dlv_retest_tolerance_bps: 0.0,

            afs_pre_bars: 20,
            afs_sweep_bps: 10.0,
            afs_hold_bars_max: 3,
            afs_consol_range_ratio: 0.50,
            afs_followthrough_max_bps: 5.0,

            saf_level_bars: 20,
            saf_window_ms: 8000,
            saf_min_attacks: 4,
            saf_level_tolerance_bps: 10.0,
            saf_max_return_bps: 3.0,
            saf_min_replenishment: 0.5,
            saf_min_ofi_abs: 0.5,
            saf_reach_worsen_bps: 1.0,
            saf_ofi_decay_ratio: 0.7,

            per_ttl_bars: 30,
            per_min_hold_bps: 10.0,
            per_max_pullback_bps: 80.0,

            rlb_window_ms: 10_000,
            rlb_spike_bps: 15.0,
            max_mid_diff_bps: 25.0,

            health_eps_window_ms: 5000,
            health_min_eps: 1.0,
            health_rate_window_ms: 60_000,
            health_max_resync_per_min: 2.0,
            health_max_desync_per_min: 1.0,
            health_max_gaps_in_window: 5,
            health_max_queue_depth: 5000,
            health_kill_score: 0.05,
            health_freeze_score: 0.35,
            health_degraded_score: 0.75,
            health_recover_score: 0.90,
            health_recover_window_ms: 5000,
            health_risk_scale_degraded: 0.5,
        }
    }
}

/// Wire shape: required core keys plus optional knobs.
#[derive(Deserialize)]
struct ThresholdsDe {
    window: usize,
    depth_k: usize,
    quantile_high: f64,
    quantile_low: f64,
    min_samples: usize,
    signal_score_min: f64,

    consensus_window_ms: Option<i64>,
    max_stale_ms: Option<i64>,
    bar_interval_ms: Option<i64>,

    dlv_pre_bars: Option<usize>,
    dlv_run_bars: Option<usize>,
    dlv_pause_bars: Option<usize>,
    dlv_max_overlap_ratio: Option<f64>,
    dlv_max_counter_wick_ratio: Option<f64>,
    dlv_max_close_off_ratio: Option<f64>,
    dlv_pause_range_ratio: Option<f64>,
    dlv_retest_tolerance_bps: Option<f64>,

    afs_pre_bars: Option<usize>,
    afs_sweep_bps: Option<f64>,
    afs_hold_bars_max: Option<usize>,
    afs_consol_range_ratio: Option<f64>,
    afs_followthrough_max_bps: Option<f64>,

    saf_level_bars: Option<usize>,
    saf_window_ms: Option<i64>,
    saf_min_attacks: Option<usize>,
    saf_level_tolerance_bps: Option<f64>,
    saf_max_return_bps: Option<f64>,
    saf_min_replenishment: Option<f64>,
    saf_min_ofi_abs: Option<f64>,
    saf_reach_worsen_bps: Option<f64>,
    saf_ofi_decay_ratio: Option<f64>,

    per_ttl_bars: Option<usize>,
    per_min_hold_bps: Option<f64>,
    per_max_pullback_bps: Option<f64>,

    rlb_window_ms: Option<i64>,
    rlb_spike_bps: Option<f64>,
    max_mid_diff_bps: Option<f64>,

    health_eps_window_ms: Option<i64>,
    health_min_eps: Option<f64>,
    health_rate_window_ms: Option<i64>,
    health_max_resync_per_min: Option<f64>,
    health_max_desync_per_min: Option<f64>,
    health_max_gaps_in_window: Option<usize>,
    health_max_queue_depth: Option<usize>,
    health_kill_score: Option<f64>,
    health_freeze_score: Option<f64>,
    health_degraded_score: Option<f64>,
    health_recover_score: Option<f64>,
    health_recover_window_ms: Option<i64>,
    health_risk_scale_degraded: Option<f64>,
}

impl From<ThresholdsDe> for Thresholds {
    fn from(de: ThresholdsDe) -> Self {
        let d = Thresholds::default();
        Thresholds {
            window: de.window,
            depth_k: de.depth_k,
            quantile_high: de.quantile_high,
            quantile_low: de.quantile_low,
            min_samples: de.min_samples,
            signal_score_min: de.signal_score_min,

            consensus_window_ms: de.consensus_window_ms.unwrap_or(d.consensus_window_ms),
            max_stale_ms: de.max_stale_ms.unwrap_or(d.max_stale_ms),
            bar_interval_ms: de.bar_interval_ms.unwrap_or(d.bar_interval_ms),

            dlv_pre_bars: de.dlv_pre_bars.unwrap_or(d.dlv_pre_bars),
            dlv_run_bars: de.dlv_run_bars.unwrap_or(d.dlv_run_bars),
            dlv_pause_bars: de.dlv_pause_bars.unwrap_or(d.dlv_pause_bars),
            dlv_max_overlap_ratio: de.dlv_max_overlap_ratio.unwrap_or(d.dlv_max_overlap_ratio),
            dlv_max_counter_wick_ratio: de
                .dlv_max_counter_wick_ratio
                .unwrap_or(d.dlv_max_counter_wick_ratio),
            dlv_max_close_off_ratio: de
                .dlv_max_close_off_ratio
                .unwrap_or(d.dlv_max_close_off_ratio),
            dlv_pause_range_ratio: de.dlv_pause_range_ratio.unwrap_or(d.dlv_pause_range_ratio),
            dlv_retest_tolerance_bps: de
                .dlv_retest_tolerance_bps
                .unwrap_or(d.dlv_retest_tolerance_bps),

            afs_pre_bars: de.afs_pre_bars.unwrap_or(d.afs_pre_bars),
            afs_sweep_bps: de.afs_sweep_bps.unwrap_or(d.afs_sweep_bps),
            afs_hold_bars_max: de.afs_hold_bars_max.unwrap_or(d.afs_hold_bars_max),
            afs_consol_range_ratio: de.afs_consol_range_ratio.unwrap_or(d.afs_consol_range_ratio),
            afs_followthrough_max_bps: de
                .afs_followthrough_max_bps
                .unwrap_or(d.afs_followthrough_max_bps),

            saf_level_bars: de.saf_level_bars.unwrap_or(d.saf_level_bars),
            saf_window_ms: de.saf_window_ms.unwrap_or(d.saf_window_ms),
            saf_min_attacks: de.saf_min_attacks.unwrap_or(d.saf_min_attacks),
            saf_level_tolerance_bps: de
                .saf_level_tolerance_bps
                .unwrap_or(d.saf_level_tolerance_bps),
            saf_max_return_bps: de.saf_max_return_bps.unwrap_or(d.saf_max_return_bps),
            saf_min_replenishment: de.saf_min_replenishment.unwrap_or(d.saf_min_replenishment),
            saf_min_ofi_abs: de.saf_min_ofi_abs.unwrap_or(d.saf_min_ofi_abs),
            saf_reach_worsen_bps: de.saf_reach_worsen_bps.unwrap_or(d.saf_reach_worsen_bps),
            saf_ofi_decay_ratio: de.saf_ofi_decay_ratio.unwrap_or(d.saf_ofi_decay_ratio),

            per_ttl_bars: de.per_ttl_bars.unwrap_or(d.per_ttl_bars),
            per_min_hold_bps: de.per_min_hold_bps.unwrap_or(d.per_min_hold_bps),
            per_max_pullback_bps: de.per_max_pullback_bps.unwrap_or(d.per_max_pullback_bps),

            rlb_window_ms: de.rlb_window_ms.unwrap_or(d.rlb_window_ms),
            rlb_spike_bps: de.rlb_spike_bps.unwrap_or(d.rlb_spike_bps),
            max_mid_diff_bps: de.max_mid_diff_bps.unwrap_or(d.max_mid_diff_bps),

            health_eps_window_ms: de.health_eps_window_ms.unwrap_or(d.health_eps_window_ms),
            health_min_eps: de.health_min_eps.unwrap_or(d.health_min_eps),
            health_rate_window_ms: de.health_rate_window_ms.unwrap_or(d.health_rate_window_ms),
            health_max_resync_per_min: de
                .health_max_resync_per_min
                .unwrap_or(d.health_max_resync_per_min),
            health_max_desync_per_min: de
                .health_max_desync_per_min
                .unwrap_or(d.health_max_desync_per_min),
            health_max_gaps_in_window: de
                .health_max_gaps_in_window
                .unwrap_or(d.health_max_gaps_in_window),
            health_max_queue_depth: de.health_max_queue_depth.unwrap_or(d.health_max_queue_depth),
            health_kill_score: de.health_kill_score.unwrap_or(d.health_kill_score),
            health_freeze_score: de.health_freeze_score.unwrap_or(d.health_freeze_score),
            health_degraded_score: de.health_degraded_score.unwrap_or(d.health_degraded_score),
            health_recover_score: de.health_recover_score.unwrap_or(d.health_recover_score),
            health_recover_window_ms: de
                .health_recover_window_ms
                .unwrap_or(d.health_recover_window_ms),
            health_risk_scale_degraded: de
                .health_risk_scale_degraded
                .unwrap_or(d.health_risk_scale_degraded),
        }
    }
}

/// Live-session wiring: websocket endpoints and journal placement.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub out_dir: String,
    pub journal_filename: Option<String>,
    pub bybit_ws: String,
    pub bybit_depth: usize,
    pub binance_ws: String,
    pub binance_rest: String,
    pub binance_depth: usize,
    pub binance_depth_interval_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            out_dir: "_out/live".into(),
            journal_filename: None,
            bybit_ws: "wss://stream.bybit.com/v5/public/spot".into(),
            bybit_depth: 50,
            binance_ws: "wss://stream.binance.com:9443/ws".into(),
            binance_rest: "https://api.binance.com/api/v3/depth".into(),
            binance_depth: 50,
            binance_depth_interval_ms: 100,
        }
    }
}

impl LiveConfig {
    /// Journal filename, derived from the leader symbol unless configured.
    pub fn journal_filename_for(&self, leader: &str) -> String {
        self.journal_filename
            .clone()
            .unwrap_or_else(|| format!("{}_live.jsonl", leader.to_lowercase()))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    pub symbols: SymbolsConfig,
    pub thresholds: Thresholds,
    pub risk_phases: BTreeMap<String, RiskPhase>,
    #[serde(default)]
    pub risk: RiskSelection,
    #[serde(default)]
    pub live: LiveConfig,
}

impl EngineConfig {
    /// The phase actually in force, after fallback resolution.
    pub fn active_phase(&self) -> &str {
        resolve_active_phase(&self.risk_phases, self.risk.active_phase.as_deref())
    }

    pub fn active_risk_frac(&self) -> f64 {
        self.risk_phases
            .get(self.active_phase())
            .map(|phase| phase.risk_frac)
            .unwrap_or(0.0)
    }
}

/// Unknown phases fall back silently: F0 when present, else the lowest
/// sorted phase name.
pub fn resolve_active_phase<'a>(
    phases: &'a BTreeMap<String, RiskPhase>,
    requested: Option<&'a str>,
) -> &'a str {
    if let Some(name) = requested {
        if phases.contains_key(name) {
            return name;
        }
    }
    if phases.contains_key("F0") {
        return "F0";
    }
    phases.keys().next().map(String::as_str).unwrap_or("F0")
}

pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    let config: EngineConfig = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: display.clone(),
        source,
    })?;
    if config.risk_phases.is_empty() {
        return Err(ConfigError::NoRiskPhases { path: display });
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
symbols:
  leader: BTCUSDT
  exec: BTCUSD_CFD
thresholds:
  window: 300
  depth_k: 10
  quantile_high: 0.9
  quantile_low: 0.1
  min_samples: 50
  signal_score_min: 0.2
risk_phases:
  F0:
    risk_frac: 0.002
    max_daily_loss: 0.01
  F2:
    risk_frac: 0.003
    max_daily_loss: 0.015
"#;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    /// Scenario: a minimal config with only the required keys.
    /// Expected: optional thresholds take their documented defaults and the
    /// live section is fully defaulted.
    #[test]
    fn test_minimal_config_defaults() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.symbols.leader, "BTCUSDT");
        assert_eq!(config.symbols.exec, "BTCUSD_CFD");
        assert_eq!(config.thresholds.window, 300);
        assert_eq!(config.thresholds.consensus_window_ms, 750);
        assert_eq!(config.thresholds.bar_interval_ms, 500);
        assert_eq!(config.thresholds.dlv_pre_bars, 20);
        assert_eq!(config.thresholds.max_mid_diff_bps, 25.0);
        assert_eq!(config.thresholds.health_max_queue_depth, 5000);
        assert_eq!(config.live.bybit_depth, 50);
        assert_eq!(config.live.journal_filename_for("BTCUSDT"), "btcusdt_live.jsonl");
    }

    /// Scenario: a config missing a required thresholds key.
    /// Expected: load fails with a parse error naming the missing field.
    #[test]
    fn test_missing_required_key_fails() {
        let file = write_config(
            r#"
symbols:
  leader: BTCUSDT
  exec: BTCUSD_CFD
thresholds:
  window: 300
  depth_k: 10
  quantile_high: 0.9
  quantile_low: 0.1
  min_samples: 50
risk_phases:
  F0:
    risk_frac: 0.002
    max_daily_loss: 0.01
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("signal_score_min"), "message = {message}");
    }

    /// Scenario: active_phase names a configured phase.
    /// Expected: it is used as-is.
    #[test]
    fn test_active_phase_honoured() {
        let file = write_config(&format!("{MINIMAL}risk:\n  active_phase: F2\n"));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.active_phase(), "F2");
        assert_eq!(config.active_risk_frac(), 0.003);
    }

    /// Scenario: active_phase names an unknown phase.
    /// Expected: silent fallback to F0.
    #[test]
    fn test_unknown_active_phase_falls_back_to_f0() {
        let file = write_config(&format!("{MINIMAL}risk:\n  active_phase: F9\n"));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.active_phase(), "F0");
    }

    /// Scenario: unknown active_phase and no F0 either.
    /// Expected: fallback to the lowest sorted phase name.
    #[test]
    fn test_fallback_to_lowest_sorted_phase() {
        let mut phases = BTreeMap::new();
        phases.insert(
            "F3".to_string(),
            RiskPhase {
                risk_frac: 0.0035,
                max_daily_loss: 0.0175,
            },
        );
        phases.insert(
            "F1".to_string(),
            RiskPhase {
                risk_frac: 0.0025,
                max_daily_loss: 0.0125,
            },
        );
        assert_eq!(resolve_active_phase(&phases, Some("F9")), "F1");
        assert_eq!(resolve_active_phase(&phases, None), "F1");
    }

    /// Scenario: empty risk_phases mapping.
    /// Expected: startup fails.
    #[test]
    fn test_empty_phases_rejected() {
        let file = write_config(
            r#"
symbols:
  leader: BTCUSDT
  exec: BTCUSD_CFD
thresholds:
  window: 300
  depth_k: 10
  quantile_high: 0.9
  quantile_low: 0.1
  min_samples: 50
  signal_score_min: 0.2
risk_phases: {}
"#,
        );
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::NoRiskPhases { .. })
        ));
    }

    /// Scenario: thresholds overrides for setup parameters.
    /// Expected: overrides land, untouched knobs keep defaults.
    #[test]
    fn test_threshold_overrides() {
        let file = write_config(
            r#"
symbols:
  leader: BTCUSDT
  exec: BTCUSD_CFD
thresholds:
  window: 64
  depth_k: 5
  quantile_high: 0.8
  quantile_low: 0.2
  min_samples: 10
  signal_score_min: 0.3
  dlv_run_bars: 3
  afs_sweep_bps: 12.5
  health_kill_score: 0.1
risk_phases:
  F0:
    risk_frac: 0.002
    max_daily_loss: 0.01
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.thresholds.dlv_run_bars, 3);
        assert_eq!(config.thresholds.afs_sweep_bps, 12.5);
        assert_eq!(config.thresholds.health_kill_score, 0.1);
        assert_eq!(config.thresholds.dlv_pause_bars, 2);
    }
}
