//! Replenishment tracking: how often the best levels refill in place.

use std::collections::VecDeque;

use crate::types::BookLevel;

/// Scores +1 per side whenever the best price is unchanged but its size
/// grew, then averages over the window. High values mean passive liquidity
/// keeps reloading at the touch.
#[derive(Clone, Debug)]
pub struct IcebergTracker {
    window: usize,
    last_bid: Option<BookLevel>,
    last_ask: Option<BookLevel>,
    scores: VecDeque<f64>,
}

impl IcebergTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            last_bid: None,
            last_ask: None,
            scores: VecDeque::with_capacity(window.max(1)),
        }
    }

    pub fn update(&mut self, best_bid: Option<BookLevel>, best_ask: Option<BookLevel>) -> f64 {
        let mut score = 0.0;
        if let (Some(prev), Some(curr)) = (self.last_bid, best_bid) {
            if curr.price == prev.price && curr.size > prev.size {
                score += 1.0;
            }
        }
        if let (Some(prev), Some(curr)) = (self.last_ask, best_ask) {
            if curr.price == prev.price && curr.size > prev.size {
                score += 1.0;
            }
        }
        if best_bid.is_some() || best_ask.is_some() {
            if self.scores.len() == self.window {
                self.scores.pop_front();
            }
            self.scores.push_back(score);
        }
        self.last_bid = best_bid;
        self.last_ask = best_ask;
        self.value()
    }

    pub fn value(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }
}
