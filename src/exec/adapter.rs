//! The execution-venue boundary. Everything beyond this trait is another
//! system; the engine only models acks and fills coming back.

use crate::ids::IdGenerator;
use crate::types::{AckStatus, OrderAck, OrderFill, OrderRequest};

pub trait ExecAdapter {
    fn submit(&mut self, request: &OrderRequest) -> (OrderAck, OrderFill);
}

/// Paper execution: accepts everything and fills at the requested price.
pub struct PaperAdapter {
    order_ids: IdGenerator,
}

impl PaperAdapter {
    pub fn new() -> Self {
        Self {
            order_ids: IdGenerator::new("ord_"),
        }
    }
}

impl Default for PaperAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecAdapter for PaperAdapter {
    fn submit(&mut self, request: &OrderRequest) -> (OrderAck, OrderFill) {
        // Request time, not wall time: paper fills must replay identically.
        let ts_utc = request.ts_utc;
        let ack = OrderAck {
            request_id: request.id.clone(),
            ts_utc,
            status: AckStatus::Accepted,
            reason: None,
            order_id: self.order_ids.next_id(),
        };
        let fill = OrderFill {
            request_id: request.id.clone(),
            ts_utc,
            price: request.price.unwrap_or(0.0),
            qty: request.qty,
            fee: 0.0,
        };
        (ack, fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderType, Side, Venue};
    use chrono::TimeZone;

    fn request(qty: f64, price: Option<f64>) -> OrderRequest {
        OrderRequest {
            id: "abc-1".into(),
            symbol: "BTCUSD_CFD".into(),
            venue: Venue::Mt5,
            ts_utc: chrono::Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price,
            qty,
            intent_id: "abc".into(),
        }
    }

    /// Scenario: a priced paper submission.
    /// Expected: accepted ack with a deterministic order id and a fill at
    /// the requested price and quantity.
    #[test]
    fn test_paper_fill_at_request_price() {
        let mut adapter = PaperAdapter::new();
        let (ack, fill) = adapter.submit(&request(2.0, Some(100.5)));
        assert_eq!(ack.status, AckStatus::Accepted);
        assert_eq!(ack.order_id, "ord_000001");
        assert_eq!(fill.price, 100.5);
        assert_eq!(fill.qty, 2.0);

        let (ack, _) = adapter.submit(&request(1.0, Some(100.0)));
        assert_eq!(ack.order_id, "ord_000002");
    }
}
