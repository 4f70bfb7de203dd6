//! Newline-delimited JSON journal for deterministic replay.
//!
//! Each line is `{"event_type": <TAG>, "data": <payload>}`. Enums encode
//! as their tag strings and timestamps as RFC 3339 with offset; the
//! decoder rebuilds the typed payload for every known tag and passes
//! unknown tags through as raw JSON.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::bus::{Event, EventKind, Handler};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalRecord {
    pub event_type: String,
    pub data: Value,
}

pub fn encode_event(event: &Event) -> Result<JournalRecord, JournalError> {
    let data = match event {
        Event::Quote(payload) => serde_json::to_value(payload)?,
        Event::BookSnapshot(payload) => serde_json::to_value(payload)?,
        Event::BookDelta(payload) => serde_json::to_value(payload)?,
        Event::Trade(payload) => serde_json::to_value(payload)?,
        Event::Feature(payload) => serde_json::to_value(payload)?,
        Event::Signal(payload) => serde_json::to_value(payload)?,
        Event::Intent(payload) => serde_json::to_value(payload)?,
        Event::OrderRequest(payload) => serde_json::to_value(payload)?,
        Event::OrderAck(payload) => serde_json::to_value(payload)?,
        Event::OrderFill(payload) => serde_json::to_value(payload)?,
        Event::Position(payload) => serde_json::to_value(payload)?,
        Event::DataQuality(payload) => serde_json::to_value(payload)?,
        Event::EngineState(payload) => serde_json::to_value(payload)?,
    };
    Ok(JournalRecord {
        event_type: event.kind().as_str().to_string(),
        data,
    })
}

/// A decoded journal line: typed when the tag is known, raw otherwise.
#[derive(Clone, Debug)]
pub enum DecodedEvent {
    Known(Event),
    Raw { event_type: String, data: Value },
}

pub fn decode_record(record: JournalRecord) -> Result<DecodedEvent, JournalError> {
    let Some(kind) = EventKind::from_str(&record.event_type) else {
        return Ok(DecodedEvent::Raw {
            event_type: record.event_type,
            data: record.data,
        });
    };
    let event = match kind {
        EventKind::Quote => Event::Quote(serde_json::from_value(record.data)?),
        EventKind::BookSnapshot => Event::BookSnapshot(serde_json::from_value(record.data)?),
        EventKind::BookDelta => Event::BookDelta(serde_json::from_value(record.data)?),
        EventKind::Trade => Event::Trade(serde_json::from_value(record.data)?),
        EventKind::Feature => Event::Feature(serde_json::from_value(record.data)?),
        EventKind::EventSignal => Event::Signal(serde_json::from_value(record.data)?),
        EventKind::TradeIntent => Event::Intent(serde_json::from_value(record.data)?),
        EventKind::OrderRequest => Event::OrderRequest(serde_json::from_value(record.data)?),
        EventKind::OrderAck => Event::OrderAck(serde_json::from_value(record.data)?),
        EventKind::OrderFill => Event::OrderFill(serde_json::from_value(record.data)?),
        EventKind::PositionSnapshot => Event::Position(serde_json::from_value(record.data)?),
        EventKind::DataQuality => Event::DataQuality(serde_json::from_value(record.data)?),
        EventKind::EngineState => Event::EngineState(serde_json::from_value(record.data)?),
    };
    Ok(DecodedEvent::Known(event))
}

/// Append-only journal file, flushed per record so a crash loses at most
/// the line being written.
pub struct JournalWriter {
    writer: BufWriter<File>,
}

impl JournalWriter {
    pub fn create(path: &Path) -> Result<Self, JournalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, event: &Event) -> Result<(), JournalError> {
        let record = encode_event(event)?;
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

pub fn read_records(path: &Path) -> Result<Vec<JournalRecord>, JournalError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

pub fn read_events(path: &Path) -> Result<Vec<DecodedEvent>, JournalError> {
    read_records(path)?.into_iter().map(decode_record).collect()
}

/// Bus subscriber that records every event it sees.
pub struct JournalTap {
    writer: JournalWriter,
}

impl JournalTap {
    pub fn new(writer: JournalWriter) -> Self {
        Self { writer }
    }
}

impl Handler for JournalTap {
    fn on_event(&mut self, event: &Event, _out: &mut Vec<Event>) {
        if let Err(error) = self.writer.append(event) {
            warn!(%error, kind = %event.kind(), "journal append failed, record dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureFrame;
    use crate::health::guard::EngineStateEvent;
    use crate::types::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 12, 30, 45).unwrap()
    }

    fn sample_events() -> Vec<Event> {
        vec![
            Event::Quote(QuoteTick {
                symbol: "BTCUSD_CFD".into(),
                venue: Venue::Mt5,
                ts_utc: ts(),
                bid: 100.0,
                ask: 100.2,
                last: 100.1,
            }),
            Event::BookSnapshot(BookSnapshot {
                symbol: "BTCUSDT".into(),
                venue: Venue::Bybit,
                ts_utc: ts(),
                bids: vec![BookLevel::new(100.0, 1.0)],
                asks: vec![BookLevel::new(101.0, 2.0)],
                depth: 50,
            }),
            Event::BookDelta(BookDelta {
                symbol: "BTCUSDT".into(),
                venue: Venue::Binance,
                ts_utc: ts(),
                bids: vec![BookLevel::new(100.5, 0.0)],
                asks: vec![],
                is_snapshot: false,
                update_id: Some(105),
            }),
            Event::Trade(TradePrint {
                symbol: "BTCUSDT".into(),
                venue: Venue::Binance,
                ts_utc: ts(),
                price: 100.25,
                size: 0.5,
                aggressor_side: Side::Sell,
            }),
            Event::Feature(FeatureFrame {
                symbol: "BTCUSDT".into(),
                venue: Venue::Bybit,
                ts_utc: ts(),
                depth_near: 12.0,
                microprice_bias: -0.25,
                ofi_z: 1.5,
                delta_size: 3.0,
                price_progress: 0.5,
                replenishment: 0.4,
                sweep_distance: 0.5,
                return_speed: 2.0,
                post_sweep_absorption: 0.4,
                basis_z: 0.0,
                lead_lag: 0.0,
                microprice: 100.4,
                mid: 100.5,
            }),
            Event::Signal(SignalEvent {
                event_name: EventName::E2,
                symbol: "BTCUSDT".into(),
                venue: Venue::Bybit,
                ts_utc: ts(),
                score_0_1: 0.8,
                reason_codes: vec!["SAF".into(), "saf_confirmed".into()],
                meta: SignalMeta::Saf {
                    direction: Side::Sell,
                    level: 110.0,
                    reach_bps: 18.0,
                    prev_high: 109.8,
                    prev_low: 109.6,
                },
            }),
            Event::Intent(TradeIntent {
                symbol: "BTCUSD_CFD".into(),
                direction: Side::Buy,
                score: 0.7,
                risk_frac: 0.002,
                entry_plan: EntryPlan::shadow(EventName::E1),
                stop_plan: StopPlan::shadow(),
                take_plan: TakePlan::default(),
                ts_utc: ts(),
                reason_codes: vec!["consensus_confirmed".into()],
                meta: IntentMeta {
                    event: Some(EventName::E1),
                    setup: Some(Setup::Dlv),
                    venues: Some((Venue::Bybit, Venue::Binance)),
                    health_scale: None,
                },
            }),
            Event::OrderRequest(OrderRequest {
                id: "abc123def456-1".into(),
                symbol: "BTCUSD_CFD".into(),
                venue: Venue::Mt5,
                ts_utc: ts(),
                side: Side::Buy,
                order_type: OrderType::Market,
                price: None,
                qty: 0.01,
                intent_id: "abc123def456".into(),
            }),
            Event::OrderAck(OrderAck {
                request_id: "abc123def456-1".into(),
                ts_utc: ts(),
                status: AckStatus::Accepted,
                reason: None,
                order_id: "ord_000001".into(),
            }),
            Event::OrderFill(OrderFill {
                request_id: "abc123def456-1".into(),
                ts_utc: ts(),
                price: 100.5,
                qty: 0.01,
                fee: 0.0,
            }),
            Event::Position(PositionSnapshot {
                symbol: "BTCUSD_CFD".into(),
                ts_utc: ts(),
                qty: 0.01,
                avg_price: 100.5,
                unrealized_pnl: 0.0,
                mark_price: 100.5,
            }),
            Event::DataQuality(crate::health::monitor::DataQualitySnapshot {
                ts_utc: ts(),
                symbol: "BTCUSDT".into(),
                per_venue: BTreeMap::new(),
                queue_depth: 3,
                mid_by_venue: BTreeMap::from([(Venue::Bybit, 100.5)]),
                mid_diff_bps: Some(1.2),
                score_0_1: 1.0,
                reason_codes: vec![],
            }),
            Event::EngineState(EngineStateEvent {
                ts_utc: ts(),
                state: EngineState::Freeze,
                prev_state: EngineState::Run,
                score_0_1: 0.3,
                reason_codes: vec!["stale_BYBIT".into()],
                kill_latched: false,
            }),
        ]
    }

    /// Scenario: every typed event is encoded and decoded again.
    /// Expected: the decoder is the exact inverse for all thirteen tags.
    #[test]
    fn test_typed_round_trip_all_tags() {
        for event in sample_events() {
            let record = encode_event(&event).unwrap();
            assert_eq!(record.event_type, event.kind().as_str());
            match decode_record(record).unwrap() {
                DecodedEvent::Known(decoded) => assert_eq!(decoded, event),
                DecodedEvent::Raw { event_type, .. } => {
                    panic!("{event_type} decoded as raw")
                }
            }
        }
    }

    /// Scenario: timestamps in the encoded payload.
    /// Expected: RFC 3339 with an explicit offset.
    #[test]
    fn test_timestamps_are_rfc3339() {
        let record = encode_event(&sample_events()[1]).unwrap();
        let raw = record.data.get("ts_utc").unwrap().as_str().unwrap();
        assert!(raw.starts_with("2023-01-01T12:30:45"), "raw = {raw}");
        assert!(raw.ends_with('Z') || raw.contains('+'), "raw = {raw}");
    }

    /// Scenario: a record with an unrecognised tag.
    /// Expected: passed through as a raw value, not an error.
    #[test]
    fn test_unknown_tag_passes_through() {
        let record = JournalRecord {
            event_type: "CUSTOM_MARKER".into(),
            data: serde_json::json!({"note": "hello"}),
        };
        match decode_record(record).unwrap() {
            DecodedEvent::Raw { event_type, data } => {
                assert_eq!(event_type, "CUSTOM_MARKER");
                assert_eq!(data["note"], "hello");
            }
            DecodedEvent::Known(event) => panic!("unexpected typed decode: {event:?}"),
        }
    }

    /// Scenario: write three events through a JournalWriter, then read the
    /// file back, with a blank line in between.
    /// Expected: the same events in order; blank lines are skipped.
    #[test]
    fn test_writer_reader_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");

        let events = sample_events();
        {
            let mut writer = JournalWriter::create(&path).unwrap();
            for event in &events[..3] {
                writer.append(event).unwrap();
            }
        }
        // Simulate an injected blank line between sessions.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file).unwrap();
            let mut writer = JournalWriter::create(&path).unwrap();
            writer.append(&events[3]).unwrap();
        }

        let decoded = read_events(&path).unwrap();
        assert_eq!(decoded.len(), 4);
        for (decoded, original) in decoded.iter().zip(events.iter()) {
            match decoded {
                DecodedEvent::Known(event) => assert_eq!(event, original),
                DecodedEvent::Raw { event_type, .. } => panic!("raw {event_type}"),
            }
        }
    }
}
