//! Volume-synchronised trade imbalance (VPIN-style) over fixed buckets.

use std::collections::VecDeque;

use crate::types::{Side, TradePrint};

#[derive(Clone, Debug)]
pub struct VpinTracker {
    bucket_size: f64,
    window: usize,
    bucket_buy: f64,
    bucket_sell: f64,
    buckets: VecDeque<f64>,
}

impl VpinTracker {
    pub fn new(bucket_size: f64, window: usize) -> Self {
        Self {
            bucket_size,
            window: window.max(1),
            bucket_buy: 0.0,
            bucket_sell: 0.0,
            buckets: VecDeque::with_capacity(window.max(1)),
        }
    }

    /// Accumulate a trade; whenever a full bucket of volume has arrived,
    /// record its buy/sell imbalance. Returns the rolling mean imbalance.
    pub fn update(&mut self, trade: &TradePrint) -> f64 {
        match trade.aggressor_side {
            Side::Buy => self.bucket_buy += trade.size,
            Side::Sell => self.bucket_sell += trade.size,
            Side::Unknown => {}
        }

        let mut total = self.bucket_buy + self.bucket_sell;
        while self.bucket_size > 0.0 && total >= self.bucket_size {
            let buy = self.bucket_buy.min(self.bucket_size);
            let sell = self.bucket_sell.min(self.bucket_size - buy);
            let imbalance = (buy - sell).abs() / self.bucket_size;
            if self.buckets.len() == self.window {
                self.buckets.pop_front();
            }
            self.buckets.push_back(imbalance);
            self.bucket_buy = (self.bucket_buy - buy).max(0.0);
            self.bucket_sell = (self.bucket_sell - sell).max(0.0);
            total = self.bucket_buy + self.bucket_sell;
        }

        self.value()
    }

    pub fn value(&self) -> f64 {
        if self.buckets.is_empty() {
            return 0.0;
        }
        self.buckets.iter().sum::<f64>() / self.buckets.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Venue;
    use chrono::{TimeZone, Utc};

    fn trade(size: f64, side: Side) -> TradePrint {
        TradePrint {
            symbol: "BTCUSDT".into(),
            venue: Venue::Bybit,
            ts_utc: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            price: 100.0,
            size,
            aggressor_side: side,
        }
    }

    /// Scenario: a full bucket of pure buy volume.
    /// Expected: the bucket closes with imbalance 1.0.
    #[test]
    fn test_one_sided_bucket() {
        let mut vpin = VpinTracker::new(10.0, 4);
        let v = vpin.update(&trade(10.0, Side::Buy));
        assert!((v - 1.0).abs() < 1e-12);
    }

    /// Scenario: a bucket filled half buy, half sell.
    /// Expected: imbalance 0.
    #[test]
    fn test_balanced_bucket() {
        let mut vpin = VpinTracker::new(10.0, 4);
        vpin.update(&trade(5.0, Side::Buy));
        let v = vpin.update(&trade(5.0, Side::Sell));
        assert!(v.abs() < 1e-12);
    }

    /// Scenario: one oversized trade spanning two buckets.
    /// Expected: both buckets close in a single update.
    #[test]
    fn test_oversized_trade_closes_multiple_buckets() {
        let mut vpin = VpinTracker::new(10.0, 4);
        vpin.update(&trade(20.0, Side::Buy));
        assert_eq!(vpin.buckets.len(), 2);
        assert!((vpin.value() - 1.0).abs() < 1e-12);
    }

    /// Scenario: unknown aggressor side.
    /// Expected: the trade is ignored.
    #[test]
    fn test_unknown_side_ignored() {
        let mut vpin = VpinTracker::new(10.0, 4);
        let v = vpin.update(&trade(50.0, Side::Unknown));
        assert_eq!(v, 0.0);
        assert!(vpin.buckets.is_empty());
    }
}
