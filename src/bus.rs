//! Synchronous publish/subscribe dispatch.
//!
//! The core pipeline is single-threaded and cooperative: `publish` fans an
//! event out to every subscribed handler before returning. Handlers never
//! call back into the bus; follow-on events are returned through the `out`
//! vector and drained FIFO by the dispatch loop, so causal order is
//! preserved without re-entrancy.

use std::collections::VecDeque;

use crate::features::FeatureFrame;
use crate::health::guard::EngineStateEvent;
use crate::health::monitor::DataQualitySnapshot;
use crate::types::{
    BookDelta, BookSnapshot, OrderAck, OrderFill, OrderRequest, PositionSnapshot, QuoteTick,
    SignalEvent, TradeIntent, TradePrint,
};

/// Journal tag / subscription key for each event family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Quote,
    BookSnapshot,
    BookDelta,
    Trade,
    Feature,
    EventSignal,
    TradeIntent,
    OrderRequest,
    OrderAck,
    OrderFill,
    PositionSnapshot,
    DataQuality,
    EngineState,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Quote => "QUOTE",
            EventKind::BookSnapshot => "BOOK_SNAPSHOT",
            EventKind::BookDelta => "BOOK_DELTA",
            EventKind::Trade => "TRADE",
            EventKind::Feature => "FEATURE",
            EventKind::EventSignal => "EVENT_SIGNAL",
            EventKind::TradeIntent => "TRADE_INTENT",
            EventKind::OrderRequest => "ORDER_REQUEST",
            EventKind::OrderAck => "ORDER_ACK",
            EventKind::OrderFill => "ORDER_FILL",
            EventKind::PositionSnapshot => "POSITION_SNAPSHOT",
            EventKind::DataQuality => "DATA_QUALITY",
            EventKind::EngineState => "ENGINE_STATE",
        }
    }

    pub fn from_str(tag: &str) -> Option<Self> {
        Some(match tag {
            "QUOTE" => EventKind::Quote,
            "BOOK_SNAPSHOT" => EventKind::BookSnapshot,
            "BOOK_DELTA" => EventKind::BookDelta,
            "TRADE" => EventKind::Trade,
            "FEATURE" => EventKind::Feature,
            "EVENT_SIGNAL" => EventKind::EventSignal,
            "TRADE_INTENT" => EventKind::TradeIntent,
            "ORDER_REQUEST" => EventKind::OrderRequest,
            "ORDER_ACK" => EventKind::OrderAck,
            "ORDER_FILL" => EventKind::OrderFill,
            "POSITION_SNAPSHOT" => EventKind::PositionSnapshot,
            "DATA_QUALITY" => EventKind::DataQuality,
            "ENGINE_STATE" => EventKind::EngineState,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bus message. Payloads are immutable value records created by the
/// producing component and consumed by downstream subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Quote(QuoteTick),
    BookSnapshot(BookSnapshot),
    BookDelta(BookDelta),
    Trade(TradePrint),
    Feature(FeatureFrame),
    Signal(SignalEvent),
    Intent(TradeIntent),
    OrderRequest(OrderRequest),
    OrderAck(OrderAck),
    OrderFill(OrderFill),
    Position(PositionSnapshot),
    DataQuality(DataQualitySnapshot),
    EngineState(EngineStateEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Quote(_) => EventKind::Quote,
            Event::BookSnapshot(_) => EventKind::BookSnapshot,
            Event::BookDelta(_) => EventKind::BookDelta,
            Event::Trade(_) => EventKind::Trade,
            Event::Feature(_) => EventKind::Feature,
            Event::Signal(_) => EventKind::EventSignal,
            Event::Intent(_) => EventKind::TradeIntent,
            Event::OrderRequest(_) => EventKind::OrderRequest,
            Event::OrderAck(_) => EventKind::OrderAck,
            Event::OrderFill(_) => EventKind::OrderFill,
            Event::Position(_) => EventKind::PositionSnapshot,
            Event::DataQuality(_) => EventKind::DataQuality,
            Event::EngineState(_) => EventKind::EngineState,
        }
    }
}

/// A bus subscriber. Follow-on events go into `out`; they are dispatched
/// after the current event has been seen by every handler.
pub trait Handler {
    fn on_event(&mut self, event: &Event, out: &mut Vec<Event>);
}

/// Keeps a handler reachable after it is boxed into the bus, so the owner
/// can read results (intents, state) once dispatch is done.
pub struct Shared<H: Handler>(pub std::rc::Rc<std::cell::RefCell<H>>);

impl<H: Handler> Handler for Shared<H> {
    fn on_event(&mut self, event: &Event, out: &mut Vec<Event>) {
        self.0.borrow_mut().on_event(event, out);
    }
}

#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Box<dyn Handler>>,
    queue: VecDeque<Event>,
    scratch: Vec<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Box<dyn Handler>) {
        self.handlers.push(handler);
    }

    /// Dispatch `event` and everything it causes, in FIFO order.
    pub fn publish(&mut self, event: Event) {
        self.queue.push_back(event);
        while let Some(current) = self.queue.pop_front() {
            for handler in &mut self.handlers {
                handler.on_event(&current, &mut self.scratch);
            }
            self.queue.extend(self.scratch.drain(..));
        }
    }
}
