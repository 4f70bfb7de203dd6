//! In-memory order book: two price→size maps trimmed to a fixed depth.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::types::{BookDelta, BookLevel, BookSnapshot, Side, Venue};

#[derive(Clone, Debug)]
pub struct OrderBook {
    pub symbol: String,
    pub venue: Venue,
    pub depth: usize,
    bids: BTreeMap<OrderedFloat<f64>, f64>,
    asks: BTreeMap<OrderedFloat<f64>, f64>,
}

impl OrderBook {
    pub fn empty(symbol: impl Into<String>, venue: Venue, depth: usize) -> Self {
        Self {
            symbol: symbol.into(),
            venue,
            depth,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    /// Replace both sides from the snapshot and trim to depth.
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot) {
        self.symbol = snapshot.symbol.clone();
        self.venue = snapshot.venue;
        self.depth = snapshot.depth;
        self.bids = snapshot
            .bids
            .iter()
            .filter(|level| level.size != 0.0)
            .map(|level| (OrderedFloat(level.price), level.size))
            .collect();
        self.asks = snapshot
            .asks
            .iter()
            .filter(|level| level.size != 0.0)
            .map(|level| (OrderedFloat(level.price), level.size))
            .collect();
        self.trim();
    }

    /// Merge a delta by price key: size > 0 inserts/updates, size == 0
    /// removes. A snapshot-flagged delta replaces the book instead.
    pub fn apply_delta(&mut self, delta: &BookDelta) {
        self.symbol = delta.symbol.clone();
        self.venue = delta.venue;
        if delta.is_snapshot {
            let snapshot = BookSnapshot {
                symbol: delta.symbol.clone(),
                venue: delta.venue,
                ts_utc: delta.ts_utc,
                bids: delta.bids.clone(),
                asks: delta.asks.clone(),
                depth: self.depth,
            };
            self.apply_snapshot(&snapshot);
            return;
        }
        Self::apply_levels(&mut self.bids, &delta.bids);
        Self::apply_levels(&mut self.asks, &delta.asks);
        self.trim();
    }

    fn apply_levels(book: &mut BTreeMap<OrderedFloat<f64>, f64>, levels: &[BookLevel]) {
        for level in levels {
            if level.size == 0.0 {
                book.remove(&OrderedFloat(level.price));
            } else {
                book.insert(OrderedFloat(level.price), level.size);
            }
        }
    }

    /// Keep the best `depth` prices per side: highest bids, lowest asks.
    fn trim(&mut self) {
        if self.depth == 0 {
            self.bids.clear();
            self.asks.clear();
            return;
        }
        while self.bids.len() > self.depth {
            self.bids.pop_first();
        }
        while self.asks.len() > self.depth {
            self.asks.pop_last();
        }
    }

    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids
            .last_key_value()
            .map(|(price, size)| BookLevel::new(price.into_inner(), *size))
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks
            .first_key_value()
            .map(|(price, size)| BookLevel::new(price.into_inner(), *size))
    }

    /// Top-n levels in canonical order: bids descending, asks ascending.
    pub fn top_n(&self, side: Side, n: usize) -> Vec<BookLevel> {
        match side {
            Side::Buy => self
                .bids
                .iter()
                .rev()
                .take(n)
                .map(|(price, size)| BookLevel::new(price.into_inner(), *size))
                .collect(),
            _ => self
                .asks
                .iter()
                .take(n)
                .map(|(price, size)| BookLevel::new(price.into_inner(), *size))
                .collect(),
        }
    }

    pub fn bid_len(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_len(&self) -> usize {
        self.asks.len()
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }
}
