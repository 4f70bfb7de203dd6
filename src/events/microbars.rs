//! Fixed-interval OHLC+flow bars built from feature frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::FeatureFrame;

/// OHLC of mid over one time bucket, plus flow aggregates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MicroBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub n: u32,
    pub ofi_mean: f64,
    pub ofi_abs_mean: f64,
    pub replenishment_mean: f64,
}

#[derive(Clone, Debug)]
struct Bucket {
    index: i64,
    ts_start: DateTime<Utc>,
    ts_end: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    n: u32,
    ofi_sum: f64,
    ofi_abs_sum: f64,
    replen_sum: f64,
}

impl Bucket {
    fn start(index: i64, frame: &FeatureFrame) -> Self {
        Self {
            index,
            ts_start: frame.ts_utc,
            ts_end: frame.ts_utc,
            open: frame.mid,
            high: frame.mid,
            low: frame.mid,
            close: frame.mid,
            n: 1,
            ofi_sum: frame.ofi_z,
            ofi_abs_sum: frame.ofi_z.abs(),
            replen_sum: frame.replenishment,
        }
    }

    fn accumulate(&mut self, frame: &FeatureFrame) {
        self.ts_end = frame.ts_utc;
        self.high = self.high.max(frame.mid);
        self.low = self.low.min(frame.mid);
        self.close = frame.mid;
        self.n += 1;
        self.ofi_sum += frame.ofi_z;
        self.ofi_abs_sum += frame.ofi_z.abs();
        self.replen_sum += frame.replenishment;
    }

    fn finalize(self) -> MicroBar {
        let n = self.n.max(1) as f64;
        MicroBar {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            ts_start: self.ts_start,
            ts_end: self.ts_end,
            n: self.n,
            ofi_mean: self.ofi_sum / n,
            ofi_abs_mean: self.ofi_abs_sum / n,
            replenishment_mean: self.replen_sum / n,
        }
    }
}

/// Buckets frames on `floor(epoch_ms / interval)`; a completed bar is
/// returned exactly when a frame crosses the bucket boundary.
pub struct MicroBarBuilder {
    bar_interval_ms: i64,
    bucket: Option<Bucket>,
}

impl MicroBarBuilder {
    /// `bar_interval_ms` must be positive.
    pub fn new(bar_interval_ms: i64) -> Self {
        Self {
            bar_interval_ms: bar_interval_ms.max(1),
            bucket: None,
        }
    }

    pub fn update(&mut self, frame: &FeatureFrame) -> Option<MicroBar> {
        let index = frame.ts_utc.timestamp_millis().div_euclid(self.bar_interval_ms);

        match self.bucket.as_mut() {
            None => {
                self.bucket = Some(Bucket::start(index, frame));
                None
            }
            Some(bucket) if bucket.index == index => {
                bucket.accumulate(frame);
                None
            }
            Some(_) => {
                let completed = self.bucket.take().map(Bucket::finalize);
                self.bucket = Some(Bucket::start(index, frame));
                completed
            }
        }
    }
}
