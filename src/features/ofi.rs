//! Order-flow imbalance and its rolling z-score.

use std::collections::VecDeque;

use crate::types::BookLevel;

/// Fixed-window mean/std over a ring buffer with incremental sums.
#[derive(Clone, Debug)]
pub struct RollingStats {
    window: usize,
    values: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl RollingStats {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            values: VecDeque::with_capacity(window.max(1)),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn update(&mut self, value: f64) {
        if self.values.len() == self.window {
            if let Some(evicted) = self.values.pop_front() {
                self.sum -= evicted;
                self.sum_sq -= evicted * evicted;
            }
        }
        self.values.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn mean_std(&self) -> (f64, f64) {
        let n = self.values.len();
        if n == 0 {
            return (0.0, 0.0);
        }
        let mean = self.sum / n as f64;
        let var = (self.sum_sq / n as f64 - mean * mean).max(0.0);
        (mean, var.sqrt())
    }

    /// Z-score of `value` against the window; 0 when the std is 0.
    pub fn zscore(&self, value: f64) -> f64 {
        let (mean, std) = self.mean_std();
        if std == 0.0 {
            return 0.0;
        }
        (value - mean) / std
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Top-of-book order-flow imbalance fed into a rolling z.
#[derive(Clone, Debug)]
pub struct OfiState {
    stats: RollingStats,
    last_bid: Option<BookLevel>,
    last_ask: Option<BookLevel>,
}

impl OfiState {
    pub fn new(window: usize) -> Self {
        Self {
            stats: RollingStats::new(window),
            last_bid: None,
            last_ask: None,
        }
    }

    /// Feed the current best levels; returns `(ofi, ofi_z)`. The first
    /// observation only seeds and returns zeros.
    pub fn update(&mut self, best_bid: Option<BookLevel>, best_ask: Option<BookLevel>) -> (f64, f64) {
        let (Some(bid), Some(ask)) = (best_bid, best_ask) else {
            return (0.0, 0.0);
        };
        let (Some(prev_bid), Some(prev_ask)) = (self.last_bid, self.last_ask) else {
            self.last_bid = Some(bid);
            self.last_ask = Some(ask);
            return (0.0, 0.0);
        };

        let ofi = compute_ofi(prev_bid, prev_ask, bid, ask);
        self.stats.update(ofi);
        let z = self.stats.zscore(ofi);
        self.last_bid = Some(bid);
        self.last_ask = Some(ask);
        (ofi, z)
    }
}

/// Signed contribution of top-of-book changes: bid improvements add size,
/// bid retreats subtract the prior size; asks mirror with opposite sign.
fn compute_ofi(prev_bid: BookLevel, prev_ask: BookLevel, bid: BookLevel, ask: BookLevel) -> f64 {
    let mut ofi = 0.0;
    if bid.price > prev_bid.price {
        ofi += bid.size;
    } else if bid.price == prev_bid.price {
        ofi += bid.size - prev_bid.size;
    } else {
        ofi -= prev_bid.size;
    }

    if ask.price < prev_ask.price {
        ofi -= ask.size;
    } else if ask.price == prev_ask.price {
        ofi -= ask.size - prev_ask.size;
    } else {
        ofi += prev_ask.size;
    }

    ofi
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: rolling stats over [1, 2, 3] with window 3.
    /// Expected: mean 2, population std sqrt(2/3).
    #[test]
    fn test_rolling_stats_mean_std() {
        let mut stats = RollingStats::new(3);
        for v in [1.0, 2.0, 3.0] {
            stats.update(v);
        }
        let (mean, std) = stats.mean_std();
        assert!((mean - 2.0).abs() < 1e-12);
        assert!((std - (2.0_f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    /// Scenario: window 2 fed four values.
    /// Expected: eviction keeps only the last two values in the sums.
    #[test]
    fn test_rolling_stats_eviction() {
        let mut stats = RollingStats::new(2);
        for v in [10.0, 20.0, 30.0, 40.0] {
            stats.update(v);
        }
        let (mean, _) = stats.mean_std();
        assert!((mean - 35.0).abs() < 1e-12);
        assert_eq!(stats.len(), 2);
    }

    /// Scenario: constant series.
    /// Expected: zscore is 0 when the std is 0.
    #[test]
    fn test_zscore_zero_std() {
        let mut stats = RollingStats::new(5);
        for _ in 0..5 {
            stats.update(7.0);
        }
        assert_eq!(stats.zscore(7.0), 0.0);
    }

    /// Scenario: bid size grows at an unchanged price, ask unchanged.
    /// Expected: OFI equals the bid size delta.
    #[test]
    fn test_ofi_bid_size_increase() {
        let ofi = compute_ofi(
            BookLevel::new(100.0, 1.0),
            BookLevel::new(101.0, 1.0),
            BookLevel::new(100.0, 3.0),
            BookLevel::new(101.0, 1.0),
        );
        assert!((ofi - 2.0).abs() < 1e-12);
    }

    /// Scenario: bid price improves; ask price retreats.
    /// Expected: improved bid adds its full size, retreated ask adds the
    /// prior ask size.
    #[test]
    fn test_ofi_price_moves() {
        let ofi = compute_ofi(
            BookLevel::new(100.0, 1.0),
            BookLevel::new(101.0, 2.0),
            BookLevel::new(100.5, 4.0),
            BookLevel::new(101.5, 9.0),
        );
        // +4 (bid up) + 2 (ask retreat releases prior size)
        assert!((ofi - 6.0).abs() < 1e-12);
    }

    /// Scenario: bid price falls; ask price improves.
    /// Expected: falling bid subtracts its prior size, improving ask
    /// subtracts its new size.
    #[test]
    fn test_ofi_negative_pressure() {
        let ofi = compute_ofi(
            BookLevel::new(100.0, 5.0),
            BookLevel::new(101.0, 1.0),
            BookLevel::new(99.5, 2.0),
            BookLevel::new(100.5, 3.0),
        );
        // -5 (bid fell) - 3 (ask improved)
        assert!((ofi + 8.0).abs() < 1e-12);
    }

    /// Scenario: OfiState updates — seed, then two moves.
    /// Expected: the seed returns zeros; afterwards z is finite and the
    /// state tracks the latest levels.
    #[test]
    fn test_ofi_state_seeds_then_tracks() {
        let mut state = OfiState::new(8);
        let (ofi, z) = state.update(
            Some(BookLevel::new(100.0, 1.0)),
            Some(BookLevel::new(101.0, 1.0)),
        );
        assert_eq!((ofi, z), (0.0, 0.0));

        let (ofi, _) = state.update(
            Some(BookLevel::new(100.0, 2.0)),
            Some(BookLevel::new(101.0, 1.0)),
        );
        assert!((ofi - 1.0).abs() < 1e-12);

        // One-sided book: no update, zeros returned.
        let (ofi, z) = state.update(Some(BookLevel::new(100.0, 2.0)), None);
        assert_eq!((ofi, z), (0.0, 0.0));
    }
}
