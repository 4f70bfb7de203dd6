//! Bybit snapshot+delta feed: topic parsing and the live connector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::bus::Event;
use crate::feeds::reconnect::ReconnectPolicy;
use crate::feeds::{Connector, HealthEvents};
use crate::types::{BookDelta, BookLevel, BookSnapshot, Side, TradePrint, Venue};

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

fn ts_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Clone, Debug)]
pub enum BybitBookEvent {
    Snapshot(BookSnapshot),
    Delta(BookDelta),
}

/// Parse an `orderbook.<depth>.<symbol>` message. A delta carrying
/// `u == 1` is a venue-side replace and is flagged as a snapshot.
pub fn parse_book_message(msg: &Value) -> Option<BybitBookEvent> {
    let topic = msg.get("topic")?.as_str()?;
    if !topic.starts_with("orderbook.") {
        return None;
    }
    let msg_type = msg.get("type")?.as_str()?;
    if msg_type != "snapshot" && msg_type != "delta" {
        return None;
    }
    let data = msg.get("data")?;
    let symbol = data.get("s")?.as_str()?.to_string();
    let ts_ms = msg.get("ts")?.as_i64()?;

    let bids = parse_levels(data.get("b"));
    let asks = parse_levels(data.get("a"));
    let update_id = data.get("u").and_then(Value::as_u64);

    if msg_type == "snapshot" {
        let depth = data
            .get("depth")
            .and_then(Value::as_u64)
            .map(|d| d as usize)
            .unwrap_or_else(|| bids.len().max(asks.len()));
        return Some(BybitBookEvent::Snapshot(BookSnapshot {
            symbol,
            venue: Venue::Bybit,
            ts_utc: ts_from_ms(ts_ms),
            bids,
            asks,
            depth,
        }));
    }

    Some(BybitBookEvent::Delta(BookDelta {
        symbol,
        venue: Venue::Bybit,
        ts_utc: ts_from_ms(ts_ms),
        bids,
        asks,
        is_snapshot: update_id == Some(1),
        update_id,
    }))
}

/// Parse a `publicTrade.<symbol>` message into its trade prints.
pub fn parse_trade_message(msg: &Value) -> Option<Vec<TradePrint>> {
    let topic = msg.get("topic")?.as_str()?;
    if !topic.starts_with("publicTrade.") {
        return None;
    }
    let raw = msg.get("data")?;
    let rows: Vec<&Value> = match raw {
        Value::Array(rows) => rows.iter().collect(),
        Value::Object(_) => vec![raw],
        _ => return Some(Vec::new()),
    };

    let fallback_ts = msg.get("ts").and_then(Value::as_i64);
    let mut trades = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(symbol) = row.get("s").and_then(Value::as_str) else {
            continue;
        };
        let Some(ts_ms) = row.get("T").and_then(Value::as_i64).or(fallback_ts) else {
            continue;
        };
        let Some(price) = row.get("p").and_then(parse_number) else {
            continue;
        };
        let Some(size) = row
            .get("v")
            .and_then(parse_number)
            .or_else(|| row.get("q").and_then(parse_number))
        else {
            continue;
        };
        let side = match row.get("S").and_then(Value::as_str) {
            Some(s) if s.eq_ignore_ascii_case("buy") => Side::Buy,
            Some(s) if s.eq_ignore_ascii_case("sell") => Side::Sell,
            _ => Side::Unknown,
        };
        trades.push(TradePrint {
            symbol: symbol.to_string(),
            venue: Venue::Bybit,
            ts_utc: ts_from_ms(ts_ms),
            price,
            size,
            aggressor_side: side,
        });
    }
    Some(trades)
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub struct BybitConnector {
    pub symbol: String,
    pub depth: usize,
    pub ws_url: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BybitConnector {
    pub fn new(symbol: impl Into<String>, depth: usize, ws_url: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            depth,
            ws_url: ws_url.into(),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Connector for BybitConnector {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn start(&mut self, tx: mpsc::Sender<Event>) {
        let symbol = self.symbol.clone();
        let depth = self.depth;
        let ws_url = self.ws_url.clone();
        let stop = self.stop.clone();
        self.handle = Some(tokio::spawn(async move {
            run_transport(symbol, depth, ws_url, stop, tx).await;
        }));
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    fn drain_health_events(&mut self) -> HealthEvents {
        // The snapshot+delta feed resynchronises implicitly on reconnect.
        HealthEvents::default()
    }
}

async fn run_transport(
    symbol: String,
    depth: usize,
    ws_url: String,
    stop: Arc<AtomicBool>,
    tx: mpsc::Sender<Event>,
) {
    let mut reconnect = ReconnectPolicy::default();

    while !stop.load(Ordering::SeqCst) {
        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                info!(%symbol, "bybit connected");
                reconnect.reset();
                ws
            }
            Err(error) => {
                let delay = reconnect.next_delay();
                warn!(%error, delay, "bybit connect failed");
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                continue;
            }
        };

        let (mut write, mut read) = ws.split();
        let subscribe = serde_json::json!({
            "op": "subscribe",
            "args": [
                format!("orderbook.{depth}.{symbol}"),
                format!("publicTrade.{symbol}"),
            ],
        });
        if write
            .send(Message::Text(subscribe.to_string()))
            .await
            .is_err()
        {
            warn!("bybit subscribe failed, reconnecting");
            continue;
        }

        while let Some(message) = read.next().await {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(_) => continue,
                Err(error) => {
                    warn!(%error, "bybit stream error, reconnecting");
                    break;
                }
            };
            let Ok(payload) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if !dispatch(&payload, depth, &tx).await {
                return;
            }
        }

        let delay = reconnect.next_delay();
        warn!(delay, "bybit disconnected, reconnecting");
        tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
    }
}

/// Returns false when the runner side of the queue is gone.
async fn dispatch(payload: &Value, depth: usize, tx: &mpsc::Sender<Event>) -> bool {
    match parse_book_message(payload) {
        Some(BybitBookEvent::Snapshot(snapshot)) => {
            return tx.send(Event::BookSnapshot(snapshot)).await.is_ok();
        }
        Some(BybitBookEvent::Delta(delta)) => {
            // A replace-flagged delta is published as a full snapshot so
            // downstream books rebuild instead of merging.
            let event = if delta.is_snapshot {
                Event::BookSnapshot(BookSnapshot {
                    symbol: delta.symbol,
                    venue: delta.venue,
                    ts_utc: delta.ts_utc,
                    bids: delta.bids,
                    asks: delta.asks,
                    depth,
                })
            } else {
                Event::BookDelta(delta)
            };
            return tx.send(event).await.is_ok();
        }
        None => {}
    }

    if let Some(trades) = parse_trade_message(payload) {
        for trade in trades {
            if tx.send(Event::Trade(trade)).await.is_err() {
                return false;
            }
        }
    }
    true
}
