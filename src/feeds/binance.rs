//! Binance diff-depth feed: wire parsing, the REST snapshot splice
//! protocol, and the live connector with single-flight resync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::book::OrderBook;
use crate::bus::Event;
use crate::feeds::reconnect::ReconnectPolicy;
use crate::feeds::{Connector, FeedError, HealthEvents};
use crate::types::{BookDelta, BookLevel, BookSnapshot, Side, TradePrint, Venue};

fn ts_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_levels(raw: Option<&Value>) -> Vec<BookLevel> {
    let Some(Value::Array(rows)) = raw else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let price: f64 = row.get(0)?.as_str()?.parse().ok()?;
            let size: f64 = row.get(1)?.as_str()?.parse().ok()?;
            Some(BookLevel::new(price, size))
        })
        .collect()
}

/// One `depthUpdate` with its `[first_update_id, final_update_id]` range.
#[derive(Clone, Debug)]
pub struct BinanceDiffEvent {
    pub symbol: String,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub ts_utc: DateTime<Utc>,
    pub delta: BookDelta,
}

pub fn parse_diff_event(msg: &Value) -> Option<BinanceDiffEvent> {
    if msg.get("e")?.as_str()? != "depthUpdate" {
        return None;
    }
    let symbol = msg.get("s")?.as_str()?.to_string();
    let first_update_id = msg.get("U")?.as_u64()?;
    let final_update_id = msg.get("u")?.as_u64()?;
    let ts_utc = msg
        .get("E")
        .and_then(Value::as_i64)
        .map(ts_from_ms)
        .unwrap_or_default();

    let delta = BookDelta {
        symbol: symbol.clone(),
        venue: Venue::Binance,
        ts_utc,
        bids: parse_levels(msg.get("b")),
        asks: parse_levels(msg.get("a")),
        is_snapshot: false,
        update_id: Some(final_update_id),
    };

    Some(BinanceDiffEvent {
        symbol,
        first_update_id,
        final_update_id,
        ts_utc,
        delta,
    })
}

/// Maker-buy means the aggressor sold.
pub fn parse_trade_message(msg: &Value) -> Option<TradePrint> {
    if msg.get("e")?.as_str()? != "trade" {
        return None;
    }
    let symbol = msg.get("s")?.as_str()?.to_string();
    let price: f64 = msg.get("p")?.as_str()?.parse().ok()?;
    let size: f64 = msg.get("q")?.as_str()?.parse().ok()?;
    let ts_ms = msg
        .get("T")
        .and_then(Value::as_i64)
        .or_else(|| msg.get("E").and_then(Value::as_i64))?;
    let buyer_is_maker = msg.get("m")?.as_bool()?;
    Some(TradePrint {
        symbol,
        venue: Venue::Binance,
        ts_utc: ts_from_ms(ts_ms),
        price,
        size,
        aggressor_side: if buyer_is_maker { Side::Sell } else { Side::Buy },
    })
}

#[derive(Deserialize)]
struct DepthSnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

fn response_levels(rows: &[[String; 2]]) -> Vec<BookLevel> {
    rows.iter()
        .filter_map(|row| {
            let price: f64 = row[0].parse().ok()?;
            let size: f64 = row[1].parse().ok()?;
            Some(BookLevel::new(price, size))
        })
        .collect()
}

/// Fetch the REST depth snapshot and its `lastUpdateId`.
pub async fn fetch_snapshot(
    client: &reqwest::Client,
    symbol: &str,
    depth: usize,
    rest_url: &str,
) -> Result<(BookSnapshot, u64), FeedError> {
    let limit = depth.to_string();
    let response: DepthSnapshotResponse = client
        .get(rest_url)
        .query(&[("symbol", symbol), ("limit", limit.as_str())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let snapshot = BookSnapshot {
        symbol: symbol.to_string(),
        venue: Venue::Binance,
        ts_utc: Utc::now(),
        bids: response_levels(&response.bids),
        asks: response_levels(&response.asks),
        depth,
    };
    Ok((snapshot, response.last_update_id))
}

/// Splices a REST snapshot with the buffered diff stream.
///
/// Diffs seen before a snapshot are buffered. After `apply_snapshot(L)`,
/// buffered diffs replay in `final_update_id` order: anything ending at or
/// before `L` is discarded, the first live diff must straddle `L`, and
/// every one after must start exactly at `last_update_id + 1`. Any other
/// shape flags `desynced` and the connector re-fetches the snapshot.
pub struct BinanceBookSynchronizer {
    book: OrderBook,
    last_update_id: Option<u64>,
    buffer: Vec<BinanceDiffEvent>,
    synced: bool,
    pub desynced: bool,
}

impl BinanceBookSynchronizer {
    pub fn new(symbol: impl Into<String>, depth: usize) -> Self {
        Self {
            book: OrderBook::empty(symbol, Venue::Binance, depth),
            last_update_id: None,
            buffer: Vec::new(),
            synced: false,
            desynced: false,
        }
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    /// Install the snapshot, then replay the buffer in ascending
    /// `final_update_id` order. Returns the deltas actually applied so the
    /// connector can publish them after the snapshot event.
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot, last_update_id: u64) -> Vec<BookDelta> {
        self.book.apply_snapshot(snapshot);
        self.last_update_id = Some(last_update_id);
        self.synced = false;

        let mut buffered = std::mem::take(&mut self.buffer);
        buffered.sort_by_key(|event| event.final_update_id);

        let mut applied = Vec::new();
        for event in buffered {
            if self.desynced {
                break;
            }
            if self.on_diff_event(&event) {
                applied.push(event.delta);
            }
        }
        applied
    }

    /// Apply one diff if it is in sequence; returns whether it was applied.
    pub fn on_diff_event(&mut self, event: &BinanceDiffEvent) -> bool {
        let Some(last_update_id) = self.last_update_id else {
            self.buffer.push(event.clone());
            return false;
        };

        if event.final_update_id < last_update_id {
            return false;
        }

        if !self.synced {
            if !(event.first_update_id <= last_update_id
                && last_update_id <= event.final_update_id)
            {
                self.desynced = true;
                return false;
            }
            self.synced = true;
        } else if event.first_update_id != last_update_id + 1 {
            self.desynced = true;
            return false;
        }

        self.book.apply_delta(&event.delta);
        self.last_update_id = Some(event.final_update_id);
        true
    }

    pub fn needs_resync(&self) -> bool {
        self.desynced
    }

    pub fn reset_for_resync(&mut self) {
        self.buffer.clear();
        self.last_update_id = None;
        self.synced = false;
        self.desynced = false;
    }
}

#[derive(Default)]
struct HealthCounters {
    resyncs: Vec<DateTime<Utc>>,
    desyncs: Vec<DateTime<Utc>>,
    desync_reported: bool,
}

pub struct BinanceConnector {
    pub symbol: String,
    pub depth: usize,
    pub depth_interval_ms: u64,
    pub ws_url: String,
    pub rest_url: String,
    sync: Arc<Mutex<BinanceBookSynchronizer>>,
    resync_gate: Arc<tokio::sync::Mutex<()>>,
    health: Arc<Mutex<HealthCounters>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BinanceConnector {
    pub fn new(
        symbol: impl Into<String>,
        depth: usize,
        depth_interval_ms: u64,
        ws_url: impl Into<String>,
        rest_url: impl Into<String>,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            sync: Arc::new(Mutex::new(BinanceBookSynchronizer::new(
                symbol.clone(),
                depth,
            ))),
            symbol,
            depth,
            depth_interval_ms,
            ws_url: ws_url.into(),
            rest_url: rest_url.into(),
            resync_gate: Arc::new(tokio::sync::Mutex::new(())),
            health: Arc::new(Mutex::new(HealthCounters::default())),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Connector for BinanceConnector {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn start(&mut self, tx: mpsc::Sender<Event>) {
        let shared = TransportShared {
            symbol: self.symbol.clone(),
            depth: self.depth,
            depth_interval_ms: self.depth_interval_ms,
            ws_url: self.ws_url.clone(),
            rest_url: self.rest_url.clone(),
            sync: self.sync.clone(),
            resync_gate: self.resync_gate.clone(),
            health: self.health.clone(),
            stop: self.stop.clone(),
            tx,
        };
        self.handle = Some(tokio::spawn(async move { run_transport(shared).await }));
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    fn drain_health_events(&mut self) -> HealthEvents {
        let mut counters = self.health.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        HealthEvents {
            resyncs: std::mem::take(&mut counters.resyncs),
            desyncs: std::mem::take(&mut counters.desyncs),
        }
    }
}

#[derive(Clone)]
struct TransportShared {
    symbol: String,
    depth: usize,
    depth_interval_ms: u64,
    ws_url: String,
    rest_url: String,
    sync: Arc<Mutex<BinanceBookSynchronizer>>,
    resync_gate: Arc<tokio::sync::Mutex<()>>,
    health: Arc<Mutex<HealthCounters>>,
    stop: Arc<AtomicBool>,
    tx: mpsc::Sender<Event>,
}

async fn run_transport(shared: TransportShared) {
    let mut reconnect = ReconnectPolicy::default();

    while !shared.stop.load(Ordering::SeqCst) {
        let ws = match connect_async(&shared.ws_url).await {
            Ok((ws, _)) => {
                info!(symbol = %shared.symbol, "binance connected");
                reconnect.reset();
                ws
            }
            Err(error) => {
                let delay = reconnect.next_delay();
                warn!(%error, delay, "binance connect failed");
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                continue;
            }
        };

        let (mut write, mut read) = ws.split();
        let subscribe = serde_json::json!({
            "method": "SUBSCRIBE",
            "params": [
                format!(
                    "{}@depth@{}ms",
                    shared.symbol.to_lowercase(),
                    shared.depth_interval_ms
                ),
                format!("{}@trade", shared.symbol.to_lowercase()),
            ],
            "id": 1,
        });
        if write
            .send(Message::Text(subscribe.to_string()))
            .await
            .is_err()
        {
            warn!("binance subscribe failed, reconnecting");
            continue;
        }

        // The diff stream is useless until a snapshot is spliced in.
        request_resync(shared.clone());

        while let Some(message) = read.next().await {
            if shared.stop.load(Ordering::SeqCst) {
                return;
            }
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(_) => continue,
                Err(error) => {
                    warn!(%error, "binance stream error, reconnecting");
                    break;
                }
            };
            let Ok(payload) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            // Combined streams wrap the payload under "data".
            let payload = payload.get("data").unwrap_or(&payload);

            if let Some(diff) = parse_diff_event(payload) {
                if !handle_diff(&shared, diff).await {
                    return;
                }
                continue;
            }
            if let Some(trade) = parse_trade_message(payload) {
                if shared.tx.send(Event::Trade(trade)).await.is_err() {
                    return;
                }
            }
        }

        let delay = reconnect.next_delay();
        warn!(delay, "binance disconnected, reconnecting");
        tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
    }
}

/// Returns false when the runner side of the queue is gone.
async fn handle_diff(shared: &TransportShared, diff: BinanceDiffEvent) -> bool {
    let (applied, needs_resync) = {
        let mut sync = shared.sync.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let applied = sync.on_diff_event(&diff);
        (applied, sync.needs_resync())
    };

    if applied && shared.tx.send(Event::BookDelta(diff.delta)).await.is_err() {
        return false;
    }

    if needs_resync {
        record_desync(shared, diff.ts_utc);
        request_resync(shared.clone());
    }
    true
}

fn record_desync(shared: &TransportShared, ts_utc: DateTime<Utc>) {
    let mut counters = shared.health.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if counters.desync_reported {
        return;
    }
    counters.desync_reported = true;
    counters.desyncs.push(ts_utc);
    counters.resyncs.push(ts_utc);
}

/// At most one resync may be in flight per connector; the non-blocking
/// gate drops redundant requests while one runs.
fn request_resync(shared: TransportShared) {
    if shared.stop.load(Ordering::SeqCst) {
        return;
    }
    let Ok(permit) = shared.resync_gate.clone().try_lock_owned() else {
        return;
    };
    tokio::spawn(async move {
        let _permit = permit;
        resync(&shared).await;
        let mut counters = shared.health.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        counters.desync_reported = false;
    });
}

async fn resync(shared: &TransportShared) {
    {
        let mut sync = shared.sync.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sync.reset_for_resync();
    }

    let client = reqwest::Client::new();
    let mut backoff = ReconnectPolicy::default();
    let (snapshot, last_update_id) = loop {
        if shared.stop.load(Ordering::SeqCst) {
            return;
        }
        match fetch_snapshot(&client, &shared.symbol, shared.depth, &shared.rest_url).await {
            Ok(result) => break result,
            Err(error) => {
                let delay = backoff.next_delay();
                warn!(%error, delay, "binance snapshot fetch failed");
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
            }
        }
    };

    let buffered = {
        let mut sync = shared.sync.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sync.apply_snapshot(&snapshot, last_update_id)
    };

    if shared
        .tx
        .send(Event::BookSnapshot(snapshot))
        .await
        .is_err()
    {
        return;
    }
    for delta in buffered {
        if shared.tx.send(Event::BookDelta(delta)).await.is_err() {
            return;
        }
    }
    info!(symbol = %shared.symbol, last_update_id, "binance book resynced");
}
