//! Order management: idempotent intent identity and risk-based sizing.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::types::{OrderRequest, TradeIntent, Venue};

const TINY: f64 = 1e-12;

/// Stable identity of an intent: a content hash, not a counter, so a
/// replayed session resolves to the same ids and duplicates collapse.
pub fn intent_id(intent: &TradeIntent) -> String {
    let raw = format!(
        "{}|{}|{}|{:.6}|{:.6}",
        intent.symbol,
        intent.direction,
        intent.ts_utc.to_rfc3339(),
        intent.score,
        intent.risk_frac,
    );
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Lots such that a stop-out loses `equity · risk_frac`, stepped down to
/// the venue's volume grid and floored at the minimum lot.
#[allow(clippy::too_many_arguments)]
pub fn size_lots(
    equity: f64,
    risk_frac: f64,
    entry_price: f64,
    stop_price: f64,
    tick_size: f64,
    tick_value_per_lot: f64,
    vol_min: f64,
    vol_step: f64,
) -> f64 {
    let risk_amount = equity * risk_frac;
    let stop_distance = (entry_price - stop_price).abs();
    let ticks = stop_distance / tick_size;
    let loss_per_lot = ticks * tick_value_per_lot;
    let mut lots = risk_amount / loss_per_lot.max(TINY);
    if vol_step > 0.0 {
        lots = (lots / vol_step).floor() * vol_step;
    }
    if lots < vol_min {
        lots = vol_min;
    }
    lots
}

/// Contract/volume parameters of the execution venue.
#[derive(Clone, Copy, Debug)]
pub struct ExecParams {
    pub equity: f64,
    pub tick_size: f64,
    pub tick_value_per_lot: f64,
    pub vol_min: f64,
    pub vol_step: f64,
}

impl Default for ExecParams {
    fn default() -> Self {
        Self {
            equity: 100_000.0,
            tick_size: 0.5,
            tick_value_per_lot: 0.5,
            vol_min: 0.01,
            vol_step: 0.01,
        }
    }
}

pub struct Oms {
    venue: Venue,
    params: ExecParams,
    requests: HashMap<String, OrderRequest>,
}

impl Oms {
    pub fn new(venue: Venue, params: ExecParams) -> Self {
        Self {
            venue,
            params,
            requests: HashMap::new(),
        }
    }

    /// Build the order request for an intent, or None when an identical
    /// intent was already routed (duplicate suppression).
    pub fn build_request(&mut self, intent: &TradeIntent) -> Option<OrderRequest> {
        let intent_key = intent_id(intent);
        if self.requests.contains_key(&intent_key) {
            return None;
        }

        let price = intent.entry_plan.price;
        let stop_price = intent.stop_plan.stop_price;

        let qty = match (price, stop_price) {
            (Some(price), Some(stop_price)) => size_lots(
                self.params.equity,
                intent.risk_frac,
                price,
                stop_price,
                self.params.tick_size,
                self.params.tick_value_per_lot,
                self.params.vol_min,
                self.params.vol_step,
            ),
            _ => 0.0,
        };

        let request = OrderRequest {
            id: format!("{intent_key}-1"),
            symbol: intent.symbol.clone(),
            venue: self.venue,
            ts_utc: intent.ts_utc,
            side: intent.direction,
            order_type: intent.entry_plan.order_type,
            price,
            qty,
            intent_id: intent_key.clone(),
        };
        self.requests.insert(intent_key, request.clone());
        Some(request)
    }
}
