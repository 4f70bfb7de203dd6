//! The core event pipeline: one handler owning every downstream component.
//!
//! Per-venue lanes derive features from book events, bucket frames into
//! micro-bars, and run the detector and setup engines. Signals flow into
//! the consensus gate, which consults the health monitor and engine guard
//! before an intent is built, risk-gated, and routed. All state mutation
//! happens on the dispatching thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info, trace};

use crate::bus::{Event, EventBus, Handler, Shared};
use crate::config::EngineConfig;
use crate::consensus::ConsensusGate;
use crate::events::detectors::{DetectorConfig, DetectorEngine};
use crate::events::microbars::MicroBarBuilder;
use crate::events::setups::SetupEngine;
use crate::exec::adapter::PaperAdapter;
use crate::exec::oms::{ExecParams, Oms};
use crate::exec::router::OrderRouter;
use crate::features::{FeatureEngine, FeatureFrame};
use crate::health::guard::EngineGuard;
use crate::health::monitor::HealthMonitor;
use crate::playbook::Playbook;
use crate::risk::RiskGates;
use crate::types::{EngineState, SignalEvent, TradeIntent, Venue};

struct VenueLane {
    features: FeatureEngine,
    detector: DetectorEngine,
    bars: MicroBarBuilder,
    setups: SetupEngine,
}

pub struct Pipeline {
    config: EngineConfig,
    lanes: HashMap<Venue, VenueLane>,
    last_mid: HashMap<Venue, f64>,
    consensus: ConsensusGate,
    health: HealthMonitor,
    guard: EngineGuard,
    playbook: Playbook,
    risk_gates: RiskGates,
    router: OrderRouter,
    pub intents: Vec<TradeIntent>,
}

impl Pipeline {
    /// Shadow pipeline: order requests are recorded, never executed.
    pub fn shadow(config: EngineConfig) -> Self {
        Self::with_router(config, true)
    }

    /// Paper pipeline: the paper adapter acks and fills every request.
    pub fn paper_exec(config: EngineConfig) -> Self {
        Self::with_router(config, false)
    }

    fn with_router(config: EngineConfig, shadow: bool) -> Self {
        let router = OrderRouter::new(
            Oms::new(Venue::Mt5, ExecParams::default()),
            Box::new(PaperAdapter::new()),
            shadow,
        );
        Self {
            consensus: ConsensusGate::new(config.thresholds.clone()),
            health: HealthMonitor::new(config.thresholds.clone()),
            guard: EngineGuard::new(config.thresholds.clone()),
            playbook: Playbook::new(config.symbols.exec.clone()),
            risk_gates: RiskGates::default(),
            router,
            lanes: HashMap::new(),
            last_mid: HashMap::new(),
            intents: Vec::new(),
            config,
        }
    }

    /// Build a pipeline, subscribe it to the bus, and keep a shared handle
    /// for reading results after dispatch.
    pub fn attach(bus: &mut EventBus, pipeline: Pipeline) -> Rc<RefCell<Pipeline>> {
        let shared = Rc::new(RefCell::new(pipeline));
        bus.subscribe(Box::new(Shared(shared.clone())));
        shared
    }

    pub fn health_mut(&mut self) -> &mut HealthMonitor {
        &mut self.health
    }

    pub fn engine_state(&self) -> EngineState {
        self.guard.current_state
    }

    fn lane(&mut self, venue: Venue) -> &mut VenueLane {
        let config = &self.config;
        let peer_mid = peer_of(venue).and_then(|peer| self.last_mid.get(&peer).copied());
        self.lanes.entry(venue).or_insert_with(|| {
            let thresholds = &config.thresholds;
            let mut features = FeatureEngine::new(
                config.symbols.leader.clone(),
                venue,
                thresholds.depth_k,
                thresholds.window,
            );
            features.set_peer_mid(peer_mid);
            VenueLane {
                features,
                detector: DetectorEngine::new(DetectorConfig {
                    window: thresholds.window,
                    quantile_high: thresholds.quantile_high,
                    quantile_low: thresholds.quantile_low,
                    min_samples: thresholds.min_samples,
                }),
                bars: MicroBarBuilder::new(thresholds.bar_interval_ms),
                setups: SetupEngine::new(
                    config.symbols.leader.clone(),
                    venue,
                    thresholds.clone(),
                ),
            }
        })
    }

    fn after_frame(&mut self, frame: FeatureFrame, out: &mut Vec<Event>) {
        self.last_mid.insert(frame.venue, frame.mid);
        // Keep the peer lane's basis tracker fed with this venue's mid.
        for (venue, lane) in self.lanes.iter_mut() {
            if *venue != frame.venue && peer_of(*venue) == Some(frame.venue) {
                lane.features.set_peer_mid(Some(frame.mid));
            }
        }
        out.push(Event::Feature(frame));
    }

    fn on_feature(&mut self, frame: &FeatureFrame, out: &mut Vec<Event>) {
        self.health.observe_feature(frame.venue, frame.ts_utc, frame.mid);

        let lane = self.lane(frame.venue);
        for signal in lane.detector.evaluate(frame) {
            out.push(Event::Signal(signal));
        }
        if let Some(bar) = lane.bars.update(frame) {
            trace!(
                venue = %frame.venue,
                close = bar.close,
                n = bar.n,
                vpin = lane.features.vpin(),
                spoof = lane.features.spoof_ratio(),
                "bar closed"
            );
            for signal in lane.setups.on_bar(&bar) {
                out.push(Event::Signal(signal));
            }
        }
    }

    fn on_signal(&mut self, signal: &SignalEvent, out: &mut Vec<Event>) {
        let Some(outcome) =
            self.consensus
                .on_signal(signal, &mut self.health, &mut self.guard, out)
        else {
            return;
        };

        out.push(Event::Signal(outcome.signal.clone()));

        let risk_frac = self.config.active_risk_frac() * outcome.risk_scale;
        let Some(mut intent) = self.playbook.on_signal(&outcome.signal, risk_frac) else {
            return;
        };
        if outcome.risk_scale != 1.0 {
            intent.meta.health_scale = Some(outcome.risk_scale);
        }

        if !self.risk_gates.allow_trade(intent.ts_utc) {
            debug!(symbol = %intent.symbol, "daily trade gate closed, intent dropped");
            return;
        }
        self.risk_gates.record_trade(intent.ts_utc);

        self.router.submit(&intent, out);

        info!(
            symbol = %intent.symbol,
            direction = %intent.direction,
            score = intent.score,
            risk_frac = intent.risk_frac,
            "trade intent emitted"
        );
        self.intents.push(intent.clone());
        out.push(Event::Intent(intent));
    }
}

/// The other required venue, for basis wiring.
fn peer_of(venue: Venue) -> Option<Venue> {
    match venue {
        Venue::Bybit => Some(Venue::Binance),
        Venue::Binance => Some(Venue::Bybit),
        _ => None,
    }
}

impl Handler for Pipeline {
    fn on_event(&mut self, event: &Event, out: &mut Vec<Event>) {
        match event {
            Event::BookSnapshot(snapshot) => {
                self.health.observe_book(snapshot.venue, snapshot.ts_utc);
                if let Some(frame) = self.lane(snapshot.venue).features.on_book_snapshot(snapshot) {
                    self.after_frame(frame, out);
                }
            }
            Event::BookDelta(delta) => {
                self.health.observe_book(delta.venue, delta.ts_utc);
                if let Some(frame) = self.lane(delta.venue).features.on_book_delta(delta) {
                    self.after_frame(frame, out);
                }
            }
            Event::Trade(trade) => {
                self.health
                    .observe_trade(trade.venue, trade.ts_utc, Some(trade.price));
                self.lane(trade.venue).features.on_trade(trade);
            }
            Event::Feature(frame) => self.on_feature(frame, out),
            Event::Signal(signal) => self.on_signal(signal, out),
            _ => {}
        }
    }
}
