use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Venues & sides ───

/// Origin exchange of a market-data event or execution leg.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Venue {
    Bybit,
    Binance,
    Mt5,
    Ibkr,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Bybit => "BYBIT",
            Venue::Binance => "BINANCE",
            Venue::Mt5 => "MT5",
            Venue::Ibkr => "IBKR",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
    Unknown,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
            Side::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ─── Book events ───

/// One price level. `size == 0` on a delta means "remove this level".
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// Full book image. Bids descending by price, asks ascending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub venue: Venue,
    pub ts_utc: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub depth: usize,
}

/// Incremental book update, merged by price key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookDelta {
    pub symbol: String,
    pub venue: Venue,
    pub ts_utc: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Some feeds flag a delta that must be treated as a full replace.
    pub is_snapshot: bool,
    pub update_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    pub symbol: String,
    pub venue: Venue,
    pub ts_utc: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub aggressor_side: Side,
}

/// Generic top-of-book tick carried by the journal for non-book venues.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteTick {
    pub symbol: String,
    pub venue: Venue,
    pub ts_utc: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

// ─── Signals ───

/// Low-level event family. E1–E3 are per-venue microstructure events,
/// E4 is the cross-venue basis event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    E1,
    E2,
    E3,
    E4,
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventName::E1 => write!(f, "E1"),
            EventName::E2 => write!(f, "E2"),
            EventName::E3 => write!(f, "E3"),
            EventName::E4 => write!(f, "E4"),
        }
    }
}

/// Structured setup family behind an actionable signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Setup {
    Dlv,
    Saf,
    Afs,
    Per,
}

impl std::fmt::Display for Setup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Setup::Dlv => write!(f, "DLV"),
            Setup::Saf => write!(f, "SAF"),
            Setup::Afs => write!(f, "AFS"),
            Setup::Per => write!(f, "PER"),
        }
    }
}

/// Engine trading state derived from data quality. KILL is latched: once
/// entered there is no transition out for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineState {
    Run,
    Degraded,
    Freeze,
    Kill,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Run => write!(f, "RUN"),
            EngineState::Degraded => write!(f, "DEGRADED"),
            EngineState::Freeze => write!(f, "FREEZE"),
            EngineState::Kill => write!(f, "KILL"),
        }
    }
}

/// Signal payload, tagged by producer. Setup variants are actionable;
/// detector primitives and guard-blocked signals are not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum SignalMeta {
    /// Primitive detector output: the gating feature values, keyed by name.
    Detector { values: BTreeMap<String, f64> },
    Dlv {
        direction: Side,
        pre_range_high: f64,
        pre_range_low: f64,
        pause_high: f64,
        pause_low: f64,
        peak_high: f64,
        peak_low: f64,
    },
    Saf {
        direction: Side,
        level: f64,
        reach_bps: f64,
        prev_high: f64,
        prev_low: f64,
    },
    Afs {
        direction: Side,
        pre_range_high: f64,
        pre_range_low: f64,
        sweep_high: f64,
        sweep_low: f64,
        acceptance_high: f64,
        acceptance_low: f64,
        acceptance_range: f64,
    },
    Per {
        direction: Side,
        old_range_high: f64,
        old_range_low: f64,
        peak: f64,
        pullback: Option<f64>,
        depth_bps: f64,
    },
    /// Cross-venue agreement produced by the consensus gate.
    Consensus {
        direction: Side,
        setup: Option<Setup>,
        venues: (Venue, Venue),
        scores: (f64, f64),
        mid_diff_bps: Option<f64>,
        rlb_boost: bool,
    },
    /// A would-be consensus signal stopped by the engine guard.
    Blocked {
        state: EngineState,
        reasons: Vec<String>,
    },
}

impl SignalMeta {
    /// Whether the signal may produce a trade intent downstream.
    pub fn actionable(&self) -> bool {
        !matches!(self, SignalMeta::Detector { .. } | SignalMeta::Blocked { .. })
    }

    pub fn setup(&self) -> Option<Setup> {
        match self {
            SignalMeta::Dlv { .. } => Some(Setup::Dlv),
            SignalMeta::Saf { .. } => Some(Setup::Saf),
            SignalMeta::Afs { .. } => Some(Setup::Afs),
            SignalMeta::Per { .. } => Some(Setup::Per),
            SignalMeta::Consensus { setup, .. } => *setup,
            _ => None,
        }
    }

    pub fn direction(&self) -> Option<Side> {
        match self {
            SignalMeta::Dlv { direction, .. }
            | SignalMeta::Saf { direction, .. }
            | SignalMeta::Afs { direction, .. }
            | SignalMeta::Per { direction, .. }
            | SignalMeta::Consensus { direction, .. } => Some(*direction),
            _ => None,
        }
    }

    pub fn is_consensus(&self) -> bool {
        matches!(self, SignalMeta::Consensus { .. })
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, SignalMeta::Blocked { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub event_name: EventName,
    pub symbol: String,
    pub venue: Venue,
    pub ts_utc: DateTime<Utc>,
    pub score_0_1: f64,
    pub reason_codes: Vec<String>,
    pub meta: SignalMeta,
}

// ─── Intents & orders ───

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub mode: PlanMode,
    pub order_type: OrderType,
    pub price: Option<f64>,
}

impl EntryPlan {
    pub fn shadow(event: EventName) -> Self {
        let _ = event;
        Self {
            mode: PlanMode::Shadow,
            order_type: OrderType::Market,
            price: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopPlan {
    pub mode: PlanMode,
    pub stop_price: Option<f64>,
}

impl StopPlan {
    pub fn shadow() -> Self {
        Self {
            mode: PlanMode::Shadow,
            stop_price: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TakePlan {
    pub take_price: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    Shadow,
    Paper,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentMeta {
    pub event: Option<EventName>,
    pub setup: Option<Setup>,
    pub venues: Option<(Venue, Venue)>,
    /// Risk multiplier applied when the guard was DEGRADED at decision time.
    pub health_scale: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub symbol: String,
    pub direction: Side,
    pub score: f64,
    pub risk_frac: f64,
    pub entry_plan: EntryPlan,
    pub stop_plan: StopPlan,
    pub take_plan: TakePlan,
    pub ts_utc: DateTime<Utc>,
    pub reason_codes: Vec<String>,
    pub meta: IntentMeta,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: String,
    pub symbol: String,
    pub venue: Venue,
    pub ts_utc: DateTime<Utc>,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub qty: f64,
    pub intent_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckStatus {
    Accepted,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub request_id: String,
    pub ts_utc: DateTime<Utc>,
    pub status: AckStatus,
    pub reason: Option<String>,
    pub order_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub request_id: String,
    pub ts_utc: DateTime<Utc>,
    pub price: f64,
    pub qty: f64,
    pub fee: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub ts_utc: DateTime<Utc>,
    pub qty: f64,
    pub avg_price: f64,
    pub unrealized_pnl: f64,
    pub mark_price: f64,
}
