//! Per-venue feature derivation: one [`FeatureFrame`] per book update.

pub mod basis;
pub mod book_features;
pub mod iceberg;
pub mod ofi;
pub mod spoof;
pub mod vpin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::book::OrderBook;
use crate::features::basis::BasisTracker;
use crate::features::book_features::compute_book_features;
use crate::features::iceberg::IcebergTracker;
use crate::features::ofi::OfiState;
use crate::features::spoof::SpoofTracker;
use crate::features::vpin::VpinTracker;
use crate::types::{BookDelta, BookSnapshot, TradePrint, Venue};

/// Trade volume per VPIN bucket.
const VPIN_BUCKET_SIZE: f64 = 10.0;

/// Derived microstructure features at one book update. Immutable; owned by
/// the caller and consumed once by downstream subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub symbol: String,
    pub venue: Venue,
    pub ts_utc: DateTime<Utc>,
    pub depth_near: f64,
    pub microprice_bias: f64,
    pub ofi_z: f64,
    pub delta_size: f64,
    pub price_progress: f64,
    pub replenishment: f64,
    pub sweep_distance: f64,
    pub return_speed: f64,
    pub post_sweep_absorption: f64,
    pub basis_z: f64,
    pub lead_lag: f64,
    pub microprice: f64,
    pub mid: f64,
}

/// Owns one venue's book plus the rolling trackers derived from it.
pub struct FeatureEngine {
    pub symbol: String,
    pub venue: Venue,
    depth_k: usize,
    book: OrderBook,
    ofi: OfiState,
    iceberg: IcebergTracker,
    spoof: SpoofTracker,
    vpin: VpinTracker,
    basis: BasisTracker,
    peer_mid: Option<f64>,
    last_mid: Option<f64>,
    last_ts: Option<DateTime<Utc>>,
}

impl FeatureEngine {
    pub fn new(symbol: impl Into<String>, venue: Venue, depth_k: usize, window: usize) -> Self {
        let symbol = symbol.into();
        Self {
            book: OrderBook::empty(symbol.clone(), venue, depth_k),
            symbol,
            venue,
            depth_k,
            ofi: OfiState::new(window),
            iceberg: IcebergTracker::new(window),
            spoof: SpoofTracker::new(window),
            vpin: VpinTracker::new(VPIN_BUCKET_SIZE, window),
            basis: BasisTracker::new(window),
            peer_mid: None,
            last_mid: None,
            last_ts: None,
        }
    }

    /// Latest mid of the peer venue, wired by the pipeline so the basis
    /// feature compares real venues instead of itself.
    pub fn set_peer_mid(&mut self, mid: Option<f64>) {
        self.peer_mid = mid;
    }

    pub fn on_book_snapshot(&mut self, snapshot: &BookSnapshot) -> Option<FeatureFrame> {
        self.book.apply_snapshot(snapshot);
        self.compute(snapshot.ts_utc, None)
    }

    pub fn on_book_delta(&mut self, delta: &BookDelta) -> Option<FeatureFrame> {
        let prev_mid = self.last_mid;
        let prev_ts = self.last_ts;
        let delta_size: f64 = delta
            .bids
            .iter()
            .chain(delta.asks.iter())
            .map(|level| level.size.abs())
            .sum();
        self.spoof.update(delta);
        self.book.apply_delta(delta);
        self.compute(delta.ts_utc, Some((prev_mid, prev_ts, delta_size)))
    }

    /// Trades only feed the flow-toxicity tracker; no frame is produced.
    pub fn on_trade(&mut self, trade: &TradePrint) -> f64 {
        self.vpin.update(trade)
    }

    pub fn vpin(&self) -> f64 {
        self.vpin.value()
    }

    pub fn spoof_ratio(&self) -> f64 {
        self.spoof.value()
    }

    fn compute(
        &mut self,
        ts_utc: DateTime<Utc>,
        delta_context: Option<(Option<f64>, Option<DateTime<Utc>>, f64)>,
    ) -> Option<FeatureFrame> {
        let features = compute_book_features(&self.book, self.depth_k, ts_utc)?;

        let (_, ofi_z) = self.ofi.update(self.book.best_bid(), self.book.best_ask());
        let replenishment = self.iceberg.update(self.book.best_bid(), self.book.best_ask());

        let (prev_mid, prev_ts, delta_size) = delta_context.unwrap_or((None, None, 0.0));

        let mut price_progress = 0.0;
        let mut sweep_distance = 0.0;
        let mut return_speed = 0.0;
        if let Some(prev_mid) = prev_mid {
            price_progress = (features.mid - prev_mid).abs();
            sweep_distance = price_progress;
            if let Some(prev_ts) = prev_ts {
                let dt = ((ts_utc - prev_ts).num_milliseconds() as f64 / 1000.0).max(1e-6);
                return_speed = price_progress / dt;
            }
        }

        let post_sweep_absorption = if sweep_distance > 0.0 { replenishment } else { 0.0 };

        let (_, basis_z, lead_lag) = self.basis.update(features.mid, self.peer_mid);

        self.last_mid = Some(features.mid);
        self.last_ts = Some(ts_utc);

        Some(FeatureFrame {
            symbol: features.symbol,
            venue: features.venue,
            ts_utc,
            depth_near: features.depth_near,
            microprice_bias: features.microprice_bias,
            ofi_z,
            delta_size,
            price_progress,
            replenishment,
            sweep_distance,
            return_speed,
            post_sweep_absorption,
            basis_z,
            lead_lag,
            microprice: features.microprice,
            mid: features.mid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookLevel, Side};
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::milliseconds(ms)
    }

    fn snapshot(bids: &[(f64, f64)], asks: &[(f64, f64)], at: DateTime<Utc>) -> BookSnapshot {
        BookSnapshot {
            symbol: "BTCUSDT".into(),
            venue: Venue::Bybit,
            ts_utc: at,
            bids: bids.iter().map(|&(p, s)| BookLevel::new(p, s)).collect(),
            asks: asks.iter().map(|&(p, s)| BookLevel::new(p, s)).collect(),
            depth: 5,
        }
    }

    fn delta(bids: &[(f64, f64)], asks: &[(f64, f64)], at: DateTime<Utc>) -> BookDelta {
        BookDelta {
            symbol: "BTCUSDT".into(),
            venue: Venue::Bybit,
            ts_utc: at,
            bids: bids.iter().map(|&(p, s)| BookLevel::new(p, s)).collect(),
            asks: asks.iter().map(|&(p, s)| BookLevel::new(p, s)).collect(),
            is_snapshot: false,
            update_id: None,
        }
    }

    /// Scenario: snapshot then a delta that moves the mid by 0.5 after 250ms.
    /// Expected: price_progress = sweep_distance = 0.5 and
    /// return_speed = 0.5 / 0.25s = 2.0; delta_size sums |size| over levels.
    #[test]
    fn test_progress_and_speed_from_delta() {
        let mut engine = FeatureEngine::new("BTCUSDT", Venue::Bybit, 5, 16);
        engine
            .on_book_snapshot(&snapshot(&[(100.0, 1.0)], &[(101.0, 1.0)], ts(0)))
            .unwrap();

        let frame = engine
            .on_book_delta(&delta(&[(100.5, 2.0)], &[(101.0, 0.0), (102.0, 1.0)], ts(250)))
            .unwrap();

        assert!((frame.price_progress - 0.75).abs() < 1e-12);
        assert_eq!(frame.sweep_distance, frame.price_progress);
        assert!((frame.return_speed - 3.0).abs() < 1e-12);
        assert!((frame.delta_size - 3.0).abs() < 1e-12);
    }

    /// Scenario: snapshot with no prior state.
    /// Expected: progress/sweep/speed are 0 and the frame carries mid and
    /// microprice.
    #[test]
    fn test_snapshot_frame_baseline() {
        let mut engine = FeatureEngine::new("BTCUSDT", Venue::Bybit, 5, 16);
        let frame = engine
            .on_book_snapshot(&snapshot(&[(100.0, 1.0)], &[(101.0, 3.0)], ts(0)))
            .unwrap();
        assert_eq!(frame.price_progress, 0.0);
        assert_eq!(frame.return_speed, 0.0);
        assert_eq!(frame.post_sweep_absorption, 0.0);
        assert!((frame.mid - 100.5).abs() < 1e-12);
        assert!((frame.microprice - 100.25).abs() < 1e-12);
    }

    /// Scenario: an empty-book snapshot (no asks).
    /// Expected: no frame is produced.
    #[test]
    fn test_one_sided_book_no_frame() {
        let mut engine = FeatureEngine::new("BTCUSDT", Venue::Bybit, 5, 16);
        assert!(engine
            .on_book_snapshot(&snapshot(&[(100.0, 1.0)], &[], ts(0)))
            .is_none());
    }

    /// Scenario: no peer mid wired.
    /// Expected: basis_z and lead_lag stay 0 across updates.
    #[test]
    fn test_basis_zero_without_peer() {
        let mut engine = FeatureEngine::new("BTCUSDT", Venue::Bybit, 5, 16);
        engine.on_book_snapshot(&snapshot(&[(100.0, 1.0)], &[(101.0, 1.0)], ts(0)));
        let frame = engine
            .on_book_delta(&delta(&[(100.5, 1.0)], &[], ts(100)))
            .unwrap();
        assert_eq!(frame.basis_z, 0.0);
        assert_eq!(frame.lead_lag, 0.0);
    }

    /// Scenario: peer mid wired and both venues moving together.
    /// Expected: lead_lag becomes non-zero once two observations exist.
    #[test]
    fn test_basis_with_peer() {
        let mut engine = FeatureEngine::new("BTCUSDT", Venue::Bybit, 5, 16);
        engine.set_peer_mid(Some(100.4));
        engine.on_book_snapshot(&snapshot(&[(100.0, 1.0)], &[(101.0, 1.0)], ts(0)));
        engine.set_peer_mid(Some(100.9));
        let frame = engine
            .on_book_delta(&delta(&[(100.5, 1.0), (100.0, 0.0)], &[], ts(100)))
            .unwrap();
        assert!(frame.lead_lag > 0.0);
    }

    /// Scenario: trades feed VPIN but produce no frames.
    /// Expected: vpin() reflects one full one-sided bucket.
    #[test]
    fn test_trades_feed_vpin_only() {
        let mut engine = FeatureEngine::new("BTCUSDT", Venue::Bybit, 5, 16);
        let v = engine.on_trade(&TradePrint {
            symbol: "BTCUSDT".into(),
            venue: Venue::Bybit,
            ts_utc: ts(0),
            price: 100.0,
            size: 10.0,
            aggressor_side: Side::Buy,
        });
        assert!((v - 1.0).abs() < 1e-12);
        assert!((engine.vpin() - 1.0).abs() < 1e-12);
    }

    /// Scenario: a delta that only removes levels.
    /// Expected: the spoof ratio rises to 1.0 for that observation.
    #[test]
    fn test_spoof_ratio_updates_on_delta() {
        let mut engine = FeatureEngine::new("BTCUSDT", Venue::Bybit, 5, 16);
        engine.on_book_snapshot(&snapshot(&[(100.0, 1.0)], &[(101.0, 1.0)], ts(0)));
        engine.on_book_delta(&delta(&[(100.0, 0.0), (99.5, 1.0)], &[], ts(100)));
        assert!((engine.spoof_ratio() - 0.5).abs() < 1e-12);
    }
}
