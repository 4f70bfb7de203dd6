//! Static features of the current book image.

use chrono::{DateTime, Utc};

use crate::book::OrderBook;
use crate::types::{BookLevel, Side, Venue};

/// Per-update view of the book: prices, shape, and near-touch liquidity.
#[derive(Clone, Debug, PartialEq)]
pub struct BookFeatureSet {
    pub symbol: String,
    pub venue: Venue,
    pub ts_utc: DateTime<Utc>,
    pub mid: f64,
    pub spread: f64,
    pub microprice: f64,
    pub microprice_bias: f64,
    pub imbalance: f64,
    pub depth_near: f64,
    pub slope: f64,
    pub convexity: f64,
}

/// None until both sides of the book exist.
pub fn compute_book_features(
    book: &OrderBook,
    depth_k: usize,
    ts_utc: DateTime<Utc>,
) -> Option<BookFeatureSet> {
    let best_bid = book.best_bid()?;
    let best_ask = book.best_ask()?;

    let mid = (best_bid.price + best_ask.price) / 2.0;
    let spread = (best_ask.price - best_bid.price).max(0.0);
    let microprice = microprice(best_bid, best_ask);
    let microprice_bias = if spread > 0.0 {
        (microprice - mid) / spread
    } else {
        0.0
    };

    let bids = book.top_n(Side::Buy, depth_k);
    let asks = book.top_n(Side::Sell, depth_k);

    let bid_depth: f64 = bids.iter().map(|level| level.size).sum();
    let ask_depth: f64 = asks.iter().map(|level| level.size).sum();
    let depth_near = bid_depth + ask_depth;

    let imbalance = if depth_near > 0.0 {
        (bid_depth - ask_depth) / depth_near
    } else {
        0.0
    };

    let slope = liquidity_slope(mid, &bids, &asks);
    let convexity = liquidity_convexity(&bids, &asks);

    Some(BookFeatureSet {
        symbol: book.symbol.clone(),
        venue: book.venue,
        ts_utc,
        mid,
        spread,
        microprice,
        microprice_bias,
        imbalance,
        depth_near,
        slope,
        convexity,
    })
}

/// Size-weighted cross of the touch: leans toward the thinner side.
fn microprice(bid: BookLevel, ask: BookLevel) -> f64 {
    let denom = bid.size + ask.size;
    if denom == 0.0 {
        return (bid.price + ask.price) / 2.0;
    }
    (bid.price * ask.size + ask.price * bid.size) / denom
}

/// Inverse of the size-weighted average distance from mid.
fn liquidity_slope(mid: f64, bids: &[BookLevel], asks: &[BookLevel]) -> f64 {
    let mut weighted_dist = 0.0;
    let mut total_size = 0.0;
    for level in bids.iter().chain(asks.iter()) {
        weighted_dist += (level.price - mid).abs() * level.size;
        total_size += level.size;
    }
    if total_size == 0.0 {
        return 0.0;
    }
    1.0 / (weighted_dist / total_size + 1e-9)
}

/// Share of size concentrated at the touch and the ladder midpoint.
fn liquidity_convexity(bids: &[BookLevel], asks: &[BookLevel]) -> f64 {
    let sizes: Vec<f64> = bids.iter().chain(asks.iter()).map(|l| l.size).collect();
    if sizes.is_empty() {
        return 0.0;
    }
    let total: f64 = sizes.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let top = if sizes.len() > 1 {
        sizes[0] + sizes[sizes.len() / 2]
    } else {
        sizes[0]
    };
    top / total
}
