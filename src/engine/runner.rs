//! Live fan-in: connector tasks feed one bounded queue; this runner drains
//! it on the pipeline thread and keeps the health monitor's queue-depth
//! and connector counters current.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::bus::EventBus;
use crate::engine::pipeline::Pipeline;
use crate::feeds::Connector;

/// Bound on the connector → runner queue; beyond this the health monitor
/// flags `queue_depth_high` long before the channel itself fills.
const QUEUE_CAPACITY: usize = 65_536;

const HEALTH_TICK_MS: u64 = 500;

pub struct LiveRunner {
    connectors: Vec<Box<dyn Connector>>,
}

impl LiveRunner {
    pub fn new(connectors: Vec<Box<dyn Connector>>) -> Self {
        Self { connectors }
    }

    /// Drain events into the bus until ctrl-c or every connector is gone.
    /// Pending queue items are dropped on shutdown.
    pub async fn run(mut self, bus: &mut EventBus, pipeline: &Rc<RefCell<Pipeline>>) {
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
        for connector in &mut self.connectors {
            connector.start(tx.clone());
        }
        drop(tx);

        let mut tick = tokio::time::interval(Duration::from_millis(HEALTH_TICK_MS));
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                received = rx.recv() => match received {
                    Some(event) => bus.publish(event),
                    None => {
                        info!("all connectors finished");
                        break;
                    }
                },
                _ = tick.tick() => {
                    self.health_tick(rx.len(), pipeline);
                }
            }
        }

        for connector in &mut self.connectors {
            connector.stop();
        }
    }

    fn health_tick(&mut self, queue_depth: usize, pipeline: &Rc<RefCell<Pipeline>>) {
        let mut pipeline = pipeline.borrow_mut();
        let health = pipeline.health_mut();
        health.set_queue_depth(queue_depth);
        for connector in &mut self.connectors {
            let venue = connector.venue();
            let events = connector.drain_health_events();
            for ts_utc in events.resyncs {
                health.observe_resync(venue, ts_utc);
            }
            for ts_utc in events.desyncs {
                health.observe_desync(venue, ts_utc);
            }
        }
    }
}
