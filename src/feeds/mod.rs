//! Venue connectors: websocket transports feeding the live runner's queue.

pub mod binance;
pub mod bybit;
pub mod reconnect;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::bus::Event;
use crate::types::Venue;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("snapshot fetch: {0}")]
    Http(#[from] reqwest::Error),
}

/// Desync/resync timestamps accumulated on the connector side, drained
/// periodically by the runner into the health monitor.
#[derive(Clone, Debug, Default)]
pub struct HealthEvents {
    pub resyncs: Vec<DateTime<Utc>>,
    pub desyncs: Vec<DateTime<Utc>>,
}

/// A live transport. `start` spawns the transport task(s); `stop` tears
/// them down. Events cross into the runner through the provided sender.
pub trait Connector {
    fn venue(&self) -> Venue;
    fn start(&mut self, tx: mpsc::Sender<Event>);
    fn stop(&mut self);
    fn drain_health_events(&mut self) -> HealthEvents;
}
