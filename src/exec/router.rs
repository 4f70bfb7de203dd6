//! Order routing: shadow records requests only; paper mode drives the
//! adapter and keeps position snapshots current.

use std::collections::HashMap;

use crate::bus::Event;
use crate::exec::adapter::ExecAdapter;
use crate::exec::oms::Oms;
use crate::types::{OrderFill, PositionSnapshot, Side, TradeIntent};

pub struct OrderRouter {
    oms: Oms,
    adapter: Box<dyn ExecAdapter>,
    shadow: bool,
    positions: HashMap<String, (f64, f64)>, // symbol → (qty, avg_price)
}

impl OrderRouter {
    pub fn new(oms: Oms, adapter: Box<dyn ExecAdapter>, shadow: bool) -> Self {
        Self {
            oms,
            adapter,
            shadow,
            positions: HashMap::new(),
        }
    }

    /// Route one intent. Emits ORDER_REQUEST (always), and in paper mode
    /// ORDER_ACK / ORDER_FILL / POSITION_SNAPSHOT. Returns the request id,
    /// or None when the OMS suppressed a duplicate.
    pub fn submit(&mut self, intent: &TradeIntent, out: &mut Vec<Event>) -> Option<String> {
        let request = self.oms.build_request(intent)?;
        let request_id = request.id.clone();
        out.push(Event::OrderRequest(request.clone()));

        if self.shadow {
            return Some(request_id);
        }

        let (ack, fill) = self.adapter.submit(&request);
        out.push(Event::OrderAck(ack));
        out.push(Event::OrderFill(fill.clone()));
        if let Some(snapshot) = self.apply_fill(&intent.symbol, intent.direction, &fill) {
            out.push(Event::Position(snapshot));
        }
        Some(request_id)
    }

    /// Average-price position accounting: adds extend the average,
    /// reductions keep it, and a flip restarts it at the fill price.
    fn apply_fill(&mut self, symbol: &str, side: Side, fill: &OrderFill) -> Option<PositionSnapshot> {
        if fill.qty <= 0.0 {
            return None;
        }

        let (pos_qty, pos_avg) = self.positions.get(symbol).copied().unwrap_or((0.0, 0.0));
        let signed_qty = if side == Side::Buy { fill.qty } else { -fill.qty };
        let new_qty = pos_qty + signed_qty;

        let new_avg = if pos_qty == 0.0
            || (pos_qty > 0.0 && signed_qty > 0.0)
            || (pos_qty < 0.0 && signed_qty < 0.0)
        {
            let total = pos_qty.abs() + signed_qty.abs();
            (pos_qty.abs() * pos_avg + signed_qty.abs() * fill.price) / total.max(1e-12)
        } else if signed_qty.abs() >= pos_qty.abs() {
            if new_qty != 0.0 {
                fill.price
            } else {
                0.0
            }
        } else {
            pos_avg
        };

        self.positions.insert(symbol.to_string(), (new_qty, new_avg));
        Some(PositionSnapshot {
            symbol: symbol.to_string(),
            ts_utc: fill.ts_utc,
            qty: new_qty,
            avg_price: new_avg,
            unrealized_pnl: (fill.price - new_avg) * new_qty,
            mark_price: fill.price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventKind;
    use crate::exec::adapter::PaperAdapter;
    use crate::exec::oms::ExecParams;
    use crate::types::{
        EntryPlan, EventName, IntentMeta, OrderType, PlanMode, StopPlan, TakePlan, Venue,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn priced_intent(direction: Side, price: f64, offset_ms: i64) -> TradeIntent {
        TradeIntent {
            symbol: "BTCUSD_CFD".into(),
            direction,
            score: 0.8,
            risk_frac: 0.002,
            entry_plan: EntryPlan {
                mode: PlanMode::Paper,
                order_type: OrderType::Limit,
                price: Some(price),
            },
            stop_plan: StopPlan {
                mode: PlanMode::Paper,
                stop_price: Some(price - 1.0),
            },
            take_plan: TakePlan::default(),
            ts_utc: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
                + Duration::milliseconds(offset_ms),
            reason_codes: vec![],
            meta: IntentMeta {
                event: Some(EventName::E1),
                ..IntentMeta::default()
            },
        }
    }

    fn shadow_router() -> OrderRouter {
        OrderRouter::new(
            Oms::new(Venue::Mt5, ExecParams::default()),
            Box::new(PaperAdapter::new()),
            true,
        )
    }

    fn paper_router() -> OrderRouter {
        OrderRouter::new(
            Oms::new(Venue::Mt5, ExecParams::default()),
            Box::new(PaperAdapter::new()),
            false,
        )
    }

    /// Scenario: a shadow submission.
    /// Expected: only an ORDER_REQUEST event; no acks, fills or positions.
    #[test]
    fn test_shadow_records_request_only() {
        let mut router = shadow_router();
        let mut out = Vec::new();
        let id = router.submit(&priced_intent(Side::Buy, 100.0, 0), &mut out);
        assert!(id.is_some());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), EventKind::OrderRequest);
    }

    /// Scenario: a paper submission of a priced intent.
    /// Expected: request, accepted ack, fill at the limit price, and a
    /// long position snapshot.
    #[test]
    fn test_paper_executes_and_tracks_position() {
        let mut router = paper_router();
        let mut out = Vec::new();
        router.submit(&priced_intent(Side::Buy, 100.0, 0), &mut out);

        let kinds: Vec<EventKind> = out.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::OrderRequest,
                EventKind::OrderAck,
                EventKind::OrderFill,
                EventKind::PositionSnapshot,
            ]
        );
        let Some(Event::Position(position)) = out.last() else {
            panic!("expected position snapshot");
        };
        assert!(position.qty > 0.0);
        assert_eq!(position.avg_price, 100.0);
        assert_eq!(position.unrealized_pnl, 0.0);
    }

    /// Scenario: two buys at different prices, then a flip through zero.
    /// Expected: averaged entry on the adds; a flip restarts the average
    /// at the flip fill price with the residual signed quantity.
    #[test]
    fn test_position_average_and_flip() {
        let mut router = paper_router();

        let mut out = Vec::new();
        router.submit(&priced_intent(Side::Buy, 100.0, 0), &mut out);
        router.submit(&priced_intent(Side::Buy, 102.0, 500), &mut out);

        let (qty_after_adds, avg_after_adds) = router.positions["BTCUSD_CFD"];
        assert!(qty_after_adds > 0.0);
        assert!((avg_after_adds - 101.0).abs() < 1e-9, "avg = {avg_after_adds}");

        // Sell three times the current position to flip short.
        let mut flip = priced_intent(Side::Sell, 99.0, 1000);
        flip.risk_frac = 0.018; // 3x the per-trade risk → 3x the lots
        router.submit(&flip, &mut out);

        let (qty_after_flip, avg_after_flip) = router.positions["BTCUSD_CFD"];
        assert!(qty_after_flip < 0.0, "qty = {qty_after_flip}");
        assert_eq!(avg_after_flip, 99.0);
    }

    /// Scenario: the same intent submitted twice in paper mode.
    /// Expected: the duplicate produces no events at all.
    #[test]
    fn test_duplicate_suppressed_by_oms() {
        let mut router = paper_router();
        let mut out = Vec::new();
        let intent = priced_intent(Side::Buy, 100.0, 0);
        assert!(router.submit(&intent, &mut out).is_some());
        let events_before = out.len();
        assert!(router.submit(&intent, &mut out).is_none());
        assert_eq!(out.len(), events_before);
    }

    /// Scenario: an unpriced shadow-plan intent in paper mode.
    /// Expected: zero-qty fill yields no position snapshot.
    #[test]
    fn test_zero_qty_fill_no_position() {
        let mut router = paper_router();
        let mut out = Vec::new();
        let mut intent = priced_intent(Side::Buy, 100.0, 0);
        intent.entry_plan = EntryPlan::shadow(EventName::E1);
        intent.stop_plan = StopPlan::shadow();
        router.submit(&intent, &mut out);
        assert!(!out.iter().any(|e| e.kind() == EventKind::PositionSnapshot));
    }
}
