//! Per-venue freshness and rate accounting, composed into one score.
//!
//! The pipeline calls the `observe_*` hooks as events pass through; a
//! `snapshot` evaluates both required venues at a reference timestamp.
//! Hard failures (missing feed, staleness, mid divergence, queue pressure)
//! zero the score; soft conditions multiply it down.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::types::Venue;

/// The two venues whose feeds must both be alive for consensus trading.
pub const REQUIRED_VENUES: [Venue; 2] = [Venue::Bybit, Venue::Binance];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueHealth {
    pub last_book_ts_utc: Option<DateTime<Utc>>,
    pub last_trade_ts_utc: Option<DateTime<Utc>>,
    pub last_feature_ts_utc: Option<DateTime<Utc>>,
    pub staleness_ms: Option<f64>,
    pub eps: f64,
    pub resync_per_min: f64,
    pub desync_per_min: f64,
    pub gap_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataQualitySnapshot {
    pub ts_utc: DateTime<Utc>,
    pub symbol: String,
    pub per_venue: BTreeMap<Venue, VenueHealth>,
    pub queue_depth: usize,
    pub mid_by_venue: BTreeMap<Venue, f64>,
    pub mid_diff_bps: Option<f64>,
    pub score_0_1: f64,
    pub reason_codes: Vec<String>,
}

pub struct HealthMonitor {
    thresholds: Thresholds,
    queue_depth: usize,
    book_events: HashMap<Venue, VecDeque<DateTime<Utc>>>,
    trade_events: HashMap<Venue, VecDeque<DateTime<Utc>>>,
    feature_events: HashMap<Venue, VecDeque<DateTime<Utc>>>,
    resync_events: HashMap<Venue, VecDeque<DateTime<Utc>>>,
    desync_events: HashMap<Venue, VecDeque<DateTime<Utc>>>,
    gap_events: HashMap<Venue, VecDeque<DateTime<Utc>>>,
    last_book_ts: HashMap<Venue, DateTime<Utc>>,
    last_trade_ts: HashMap<Venue, DateTime<Utc>>,
    last_feature_ts: HashMap<Venue, DateTime<Utc>>,
    last_trade_price: HashMap<Venue, f64>,
    last_mid: HashMap<Venue, f64>,
}

impl HealthMonitor {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            queue_depth: 0,
            book_events: HashMap::new(),
            trade_events: HashMap::new(),
            feature_events: HashMap::new(),
            resync_events: HashMap::new(),
            desync_events: HashMap::new(),
            gap_events: HashMap::new(),
            last_book_ts: HashMap::new(),
            last_trade_ts: HashMap::new(),
            last_feature_ts: HashMap::new(),
            last_trade_price: HashMap::new(),
            last_mid: HashMap::new(),
        }
    }

    pub fn observe_book(&mut self, venue: Venue, ts_utc: DateTime<Utc>) {
        self.last_book_ts.insert(venue, ts_utc);
        self.book_events.entry(venue).or_default().push_back(ts_utc);
    }

    pub fn observe_trade(&mut self, venue: Venue, ts_utc: DateTime<Utc>, price: Option<f64>) {
        self.last_trade_ts.insert(venue, ts_utc);
        self.trade_events.entry(venue).or_default().push_back(ts_utc);
        if let Some(price) = price {
            self.last_trade_price.insert(venue, price);
        }
    }

    pub fn observe_feature(&mut self, venue: Venue, ts_utc: DateTime<Utc>, mid: f64) {
        self.last_feature_ts.insert(venue, ts_utc);
        self.feature_events.entry(venue).or_default().push_back(ts_utc);
        self.last_mid.insert(venue, mid);
    }

    pub fn observe_resync(&mut self, venue: Venue, ts_utc: DateTime<Utc>) {
        self.resync_events.entry(venue).or_default().push_back(ts_utc);
    }

    pub fn observe_desync(&mut self, venue: Venue, ts_utc: DateTime<Utc>) {
        self.desync_events.entry(venue).or_default().push_back(ts_utc);
    }

    pub fn observe_gap(&mut self, venue: Venue, ts_utc: DateTime<Utc>) {
        self.gap_events.entry(venue).or_default().push_back(ts_utc);
    }

    pub fn set_queue_depth(&mut self, depth: usize) {
        self.queue_depth = depth;
    }

    /// Latest known mid for a venue, falling back to the last trade price.
    pub fn mid_for(&self, venue: Venue) -> Option<f64> {
        self.last_mid
            .get(&venue)
            .or_else(|| self.last_trade_price.get(&venue))
            .copied()
    }

    pub fn snapshot(&mut self, symbol: &str, ref_ts: DateTime<Utc>) -> DataQualitySnapshot {
        let mut per_venue = BTreeMap::new();
        let mut reason_codes: Vec<String> = Vec::new();
        let mut score: f64 = 1.0;
        let mut hard_fail = false;
        let mut mid_by_venue = BTreeMap::new();

        for venue in REQUIRED_VENUES {
            let book_ts = self.last_book_ts.get(&venue).copied();
            let trade_ts = self.last_trade_ts.get(&venue).copied();
            let feature_ts = self.last_feature_ts.get(&venue).copied();
            let latest_ts = [book_ts, trade_ts, feature_ts].into_iter().flatten().max();

            let staleness_ms = match latest_ts {
                None => {
                    reason_codes.push(format!("missing_feed_{venue}"));
                    hard_fail = true;
                    None
                }
                Some(latest) => {
                    let staleness = ((ref_ts - latest).num_milliseconds() as f64).max(0.0);
                    if staleness > self.thresholds.max_stale_ms as f64 {
                        reason_codes.push(format!("stale_{venue}"));
                        hard_fail = true;
                    }
                    Some(staleness)
                }
            };

            let eps = self.compute_eps(venue, ref_ts);
            if eps < self.thresholds.health_min_eps {
                reason_codes.push(format!("low_eps_{venue}"));
                score *= 0.5;
            }

            let resync_per_min = self.compute_rate(EventStore::Resync, venue, ref_ts);
            if resync_per_min > self.thresholds.health_max_resync_per_min {
                reason_codes.push(format!("resync_rate_high_{venue}"));
                score *= 0.6;
            }

            let desync_per_min = self.compute_rate(EventStore::Desync, venue, ref_ts);
            if desync_per_min > self.thresholds.health_max_desync_per_min {
                reason_codes.push(format!("desync_rate_high_{venue}"));
                score *= 0.6;
            }

            let gap_count = self.count_window(
                EventStore::Gap,
                venue,
                ref_ts,
                self.thresholds.health_rate_window_ms,
            );
            if gap_count > self.thresholds.health_max_gaps_in_window {
                reason_codes.push(format!("gaps_high_{venue}"));
                score *= 0.7;
            }

            if let Some(mid) = self.mid_for(venue) {
                mid_by_venue.insert(venue, mid);
            }

            per_venue.insert(
                venue,
                VenueHealth {
                    last_book_ts_utc: book_ts,
                    last_trade_ts_utc: trade_ts,
                    last_feature_ts_utc: feature_ts,
                    staleness_ms,
                    eps,
                    resync_per_min,
                    desync_per_min,
                    gap_count,
                },
            );
        }

        let mid_diff_bps = if REQUIRED_VENUES.iter().all(|v| mid_by_venue.contains_key(v)) {
            let mid_a = mid_by_venue[&REQUIRED_VENUES[0]];
            let mid_b = mid_by_venue[&REQUIRED_VENUES[1]];
            let mid_avg = ((mid_a + mid_b) / 2.0).max(1e-12);
            let diff = (mid_a - mid_b).abs() / mid_avg * 10_000.0;
            if diff > self.thresholds.max_mid_diff_bps {
                reason_codes.push("mid_diff_high".into());
                hard_fail = true;
            }
            Some(diff)
        } else {
            reason_codes.push("mid_missing".into());
            hard_fail = true;
            None
        };

        if self.queue_depth > self.thresholds.health_max_queue_depth {
            reason_codes.push("queue_depth_high".into());
            hard_fail = true;
        }

        if hard_fail {
            score = 0.0;
        }

        DataQualitySnapshot {
            ts_utc: ref_ts,
            symbol: symbol.to_string(),
            per_venue,
            queue_depth: self.queue_depth,
            mid_by_venue,
            mid_diff_bps,
            score_0_1: score.clamp(0.0, 1.0),
            reason_codes: dedupe(reason_codes),
        }
    }

    /// Book + trade + feature events per second over the eps window.
    fn compute_eps(&mut self, venue: Venue, ref_ts: DateTime<Utc>) -> f64 {
        let window_ms = self.thresholds.health_eps_window_ms;
        if window_ms <= 0 {
            return 0.0;
        }
        let total = self.count_window(EventStore::Book, venue, ref_ts, window_ms)
            + self.count_window(EventStore::Trade, venue, ref_ts, window_ms)
            + self.count_window(EventStore::Feature, venue, ref_ts, window_ms);
        total as f64 / (window_ms as f64 / 1000.0)
    }

    fn compute_rate(&mut self, store: EventStore, venue: Venue, ref_ts: DateTime<Utc>) -> f64 {
        let window_ms = self.thresholds.health_rate_window_ms;
        if window_ms <= 0 {
            return 0.0;
        }
        let count = self.count_window(store, venue, ref_ts, window_ms);
        count as f64 / (window_ms as f64 / 60_000.0)
    }

    /// Count events inside `[ref_ts - window, ref_ts]`, evicting anything
    /// older than the window.
    fn count_window(
        &mut self,
        store: EventStore,
        venue: Venue,
        ref_ts: DateTime<Utc>,
        window_ms: i64,
    ) -> usize {
        let cutoff = ref_ts - Duration::milliseconds(window_ms);
        let deque = self.store_mut(store).entry(venue).or_default();
        while deque.front().is_some_and(|ts| *ts < cutoff) {
            deque.pop_front();
        }
        deque.iter().filter(|ts| **ts <= ref_ts).count()
    }

    fn store_mut(&mut self, store: EventStore) -> &mut HashMap<Venue, VecDeque<DateTime<Utc>>> {
        match store {
            EventStore::Book => &mut self.book_events,
            EventStore::Trade => &mut self.trade_events,
            EventStore::Feature => &mut self.feature_events,
            EventStore::Resync => &mut self.resync_events,
            EventStore::Desync => &mut self.desync_events,
            EventStore::Gap => &mut self.gap_events,
        }
    }
}

#[derive(Clone, Copy)]
enum EventStore {
    Book,
    Trade,
    Feature,
    Resync,
    Desync,
    Gap,
}

fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

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

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    /// Scenario: both venues last traded 1500ms before the snapshot with a
    /// 1000ms staleness bound.
    /// Expected: score 0 with stale reasons for both venues.
    #[test]
    fn test_stale_sets_score_zero() {
        let mut t = thresholds();
        t.max_stale_ms = 1000;
        t.health_min_eps = 0.0;
        t.max_mid_diff_bps = 10_000.0;
        let mut health = HealthMonitor::new(t);
        health.observe_trade(Venue::Bybit, ts(0), Some(100.0));
        health.observe_trade(Venue::Binance, ts(0), Some(100.1));

        let snap = health.snapshot("BTCUSDT", ts(1500));

        assert_eq!(snap.score_0_1, 0.0);
        assert!(snap.reason_codes.contains(&"stale_BYBIT".to_string()));
        assert!(snap.reason_codes.contains(&"stale_BINANCE".to_string()));
    }

    /// Scenario: queue depth above the bound with otherwise healthy feeds.
    /// Expected: hard fail with `queue_depth_high`.
    #[test]
    fn test_queue_depth_high_blocks() {
        let mut t = thresholds();
        t.health_max_queue_depth = 1;
        t.health_min_eps = 0.0;
        t.max_mid_diff_bps = 10_000.0;
        let mut health = HealthMonitor::new(t);
        health.observe_trade(Venue::Bybit, ts(0), Some(100.0));
        health.observe_trade(Venue::Binance, ts(0), Some(100.1));
        health.set_queue_depth(5);

        let snap = health.snapshot("BTCUSDT", ts(0));

        assert_eq!(snap.score_0_1, 0.0);
        assert!(snap.reason_codes.contains(&"queue_depth_high".to_string()));
    }

    /// Scenario: one venue with a single event in the eps window against a
    /// 5-events-per-second floor; the other venue healthy.
    /// Expected: a single ×0.5 soft penalty and `low_eps_BYBIT`.
    #[test]
    fn test_low_eps_penalty() {
        let mut t = thresholds();
        t.health_min_eps = 5.0;
        t.health_eps_window_ms = 1000;
        t.max_mid_diff_bps = 10_000.0;
        let mut health = HealthMonitor::new(t);
        health.observe_trade(Venue::Bybit, ts(0), Some(100.0));
        for i in 0..5 {
            health.observe_trade(Venue::Binance, ts(100 * i), Some(100.0));
        }

        let snap = health.snapshot("BTCUSDT", ts(900));

        assert_eq!(snap.score_0_1, 0.5);
        assert!(snap.reason_codes.contains(&"low_eps_BYBIT".to_string()));
        assert!(!snap.reason_codes.contains(&"low_eps_BINANCE".to_string()));
    }

    /// Scenario: two resyncs in the rate window against a 0.5/min bound.
    /// Expected: score 0.6 and `resync_rate_high_BYBIT`.
    #[test]
    fn test_resync_rate_penalty() {
        let mut t = thresholds();
        t.health_min_eps = 0.0;
        t.health_max_resync_per_min = 0.5;
        t.health_rate_window_ms = 60_000;
        t.max_mid_diff_bps = 10_000.0;
        let mut health = HealthMonitor::new(t);
        health.observe_trade(Venue::Bybit, ts(0), Some(100.0));
        health.observe_trade(Venue::Binance, ts(0), Some(100.0));
        health.observe_resync(Venue::Bybit, ts(0));
        health.observe_resync(Venue::Bybit, ts(1000));

        let snap = health.snapshot("BTCUSDT", ts(2000));

        assert!((snap.score_0_1 - 0.6).abs() < 1e-12);
        assert!(snap
            .reason_codes
            .contains(&"resync_rate_high_BYBIT".to_string()));
    }

    /// Scenario: mids 100.0 vs 110.0 (≈952 bps apart) with a 1 bps bound.
    /// Expected: hard fail with `mid_diff_high`, score 0.
    #[test]
    fn test_mid_diff_hard_fail() {
        let mut t = thresholds();
        t.health_min_eps = 0.0;
        t.max_mid_diff_bps = 1.0;
        let mut health = HealthMonitor::new(t);
        health.observe_trade(Venue::Bybit, ts(0), Some(100.0));
        health.observe_trade(Venue::Binance, ts(0), Some(110.0));

        let snap = health.snapshot("BTCUSDT", ts(0));

        assert_eq!(snap.score_0_1, 0.0);
        assert!(snap.reason_codes.contains(&"mid_diff_high".to_string()));
        let diff = snap.mid_diff_bps.unwrap();
        assert!((diff - 952.38).abs() < 0.01, "diff = {diff}");
    }

    /// Scenario: one venue has never produced any event.
    /// Expected: `missing_feed_BYBIT` hard fail and `mid_missing`.
    #[test]
    fn test_missing_feed_hard_fail() {
        let mut t = thresholds();
        t.health_min_eps = 0.0;
        let mut health = HealthMonitor::new(t);
        health.observe_trade(Venue::Binance, ts(0), Some(100.0));

        let snap = health.snapshot("BTCUSDT", ts(0));

        assert_eq!(snap.score_0_1, 0.0);
        assert!(snap.reason_codes.contains(&"missing_feed_BYBIT".to_string()));
        assert!(snap.reason_codes.contains(&"mid_missing".to_string()));
        assert_eq!(snap.mid_diff_bps, None);
    }

    /// Scenario: feature mids present alongside older trade prices.
    /// Expected: the feature mid wins over the trade-price fallback.
    #[test]
    fn test_feature_mid_preferred_over_trade_price() {
        let mut t = thresholds();
        t.health_min_eps = 0.0;
        t.max_mid_diff_bps = 10_000.0;
        let mut health = HealthMonitor::new(t);
        health.observe_trade(Venue::Bybit, ts(0), Some(99.0));
        health.observe_feature(Venue::Bybit, ts(10), 100.0);
        health.observe_trade(Venue::Binance, ts(0), Some(100.0));

        let snap = health.snapshot("BTCUSDT", ts(20));
        assert_eq!(snap.mid_by_venue[&Venue::Bybit], 100.0);
    }

    /// Scenario: duplicate reason codes from repeated penalties.
    /// Expected: reasons are deduplicated preserving first occurrence.
    #[test]
    fn test_reason_dedup() {
        assert_eq!(
            dedupe(vec!["a".into(), "b".into(), "a".into(), "c".into(), "b".into()]),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
