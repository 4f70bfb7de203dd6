//! Maps confirmed signals onto trade intents for the execution symbol.

use crate::types::{
    EntryPlan, EventName, IntentMeta, Side, SignalEvent, SignalMeta, StopPlan, TakePlan,
    TradeIntent,
};

pub struct Playbook {
    pub exec_symbol: String,
}

impl Playbook {
    pub fn new(exec_symbol: impl Into<String>) -> Self {
        Self {
            exec_symbol: exec_symbol.into(),
        }
    }

    /// Build an intent from an actionable signal. Direction comes from the
    /// signal meta; without a usable one the intent defaults to BUY.
    pub fn on_signal(&self, signal: &SignalEvent, risk_frac: f64) -> Option<TradeIntent> {
        if !signal.meta.actionable() {
            return None;
        }

        let direction = match signal.meta.direction() {
            Some(Side::Sell) => Side::Sell,
            _ => Side::Buy,
        };

        let (venues, health_scale) = match &signal.meta {
            SignalMeta::Consensus { venues, .. } => (Some(*venues), None),
            _ => (None, None),
        };

        Some(TradeIntent {
            symbol: self.exec_symbol.clone(),
            direction,
            score: signal.score_0_1,
            risk_frac,
            entry_plan: EntryPlan::shadow(signal.event_name),
            stop_plan: StopPlan::shadow(),
            take_plan: TakePlan::default(),
            ts_utc: signal.ts_utc,
            reason_codes: signal.reason_codes.clone(),
            meta: IntentMeta {
                event: Some(signal.event_name),
                setup: signal.meta.setup(),
                venues,
                health_scale,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Setup, Venue};
    use chrono::{TimeZone, Utc};

    fn consensus_signal(direction: Side) -> SignalEvent {
        SignalEvent {
            event_name: EventName::E1,
            symbol: "BTCUSDT".into(),
            venue: Venue::Bybit,
            ts_utc: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            score_0_1: 0.8,
            reason_codes: vec!["consensus_confirmed".into()],
            meta: SignalMeta::Consensus {
                direction,
                setup: Some(Setup::Dlv),
                venues: (Venue::Bybit, Venue::Binance),
                scores: (0.9, 0.7),
                mid_diff_bps: Some(2.0),
                rlb_boost: false,
            },
        }
    }

    /// Scenario: a SELL consensus signal.
    /// Expected: intent routed to the exec symbol with direction SELL,
    /// carrying the signal's score, setup and venues.
    #[test]
    fn test_direction_routed_from_meta() {
        let playbook = Playbook::new("BTCUSD_CFD");
        let intent = playbook
            .on_signal(&consensus_signal(Side::Sell), 0.002)
            .unwrap();

        assert_eq!(intent.symbol, "BTCUSD_CFD");
        assert_eq!(intent.direction, Side::Sell);
        assert_eq!(intent.score, 0.8);
        assert_eq!(intent.risk_frac, 0.002);
        assert_eq!(intent.meta.setup, Some(Setup::Dlv));
        assert_eq!(intent.meta.venues, Some((Venue::Bybit, Venue::Binance)));
    }

    /// Scenario: a signal whose meta has no usable direction (UNKNOWN).
    /// Expected: BUY by default.
    #[test]
    fn test_unknown_direction_defaults_buy() {
        let playbook = Playbook::new("BTCUSD_CFD");
        let intent = playbook
            .on_signal(&consensus_signal(Side::Unknown), 0.002)
            .unwrap();
        assert_eq!(intent.direction, Side::Buy);
    }

    /// Scenario: a non-actionable detector signal.
    /// Expected: no intent.
    #[test]
    fn test_non_actionable_rejected() {
        let playbook = Playbook::new("BTCUSD_CFD");
        let mut signal = consensus_signal(Side::Buy);
        signal.meta = SignalMeta::Detector {
            values: Default::default(),
        };
        assert!(playbook.on_signal(&signal, 0.002).is_none());
    }

    /// Scenario: reason codes on the signal.
    /// Expected: carried onto the intent unchanged.
    #[test]
    fn test_reason_codes_carried() {
        let playbook = Playbook::new("BTCUSD_CFD");
        let intent = playbook
            .on_signal(&consensus_signal(Side::Buy), 0.002)
            .unwrap();
        assert_eq!(intent.reason_codes, vec!["consensus_confirmed".to_string()]);
        assert_eq!(intent.meta.event, Some(EventName::E1));
    }
}
