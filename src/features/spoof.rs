//! Spoof pressure: fraction of delta levels that are removals.

use std::collections::VecDeque;

use crate::types::BookDelta;

#[derive(Clone, Debug)]
pub struct SpoofTracker {
    window: usize,
    scores: VecDeque<f64>,
}

impl SpoofTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            scores: VecDeque::with_capacity(window.max(1)),
        }
    }

    /// Feed one delta before it is applied to the book; returns the rolling
    /// removed-level ratio.
    pub fn update(&mut self, delta: &BookDelta) -> f64 {
        let total = delta.bids.len() + delta.asks.len();
        if total == 0 {
            return self.value();
        }
        let removed = delta
            .bids
            .iter()
            .chain(delta.asks.iter())
            .filter(|level| level.size == 0.0)
            .count();
        if self.scores.len() == self.window {
            self.scores.pop_front();
        }
        self.scores.push_back(removed as f64 / total as f64);
        self.value()
    }

    pub fn value(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }
}
