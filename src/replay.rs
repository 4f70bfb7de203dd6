//! Deterministic replay: drive a journal file back through the bus.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::bus::{Event, EventBus, EventKind};
use crate::journal::{read_events, DecodedEvent, JournalError};

pub struct ReplayEngine {
    filter: Option<HashSet<EventKind>>,
}

impl ReplayEngine {
    /// Replay only raw market data; derived events are recomputed by the
    /// pipeline, which keeps replays comparable across engine versions.
    pub fn market_data() -> Self {
        Self {
            filter: Some(HashSet::from([
                EventKind::BookSnapshot,
                EventKind::BookDelta,
                EventKind::Trade,
                EventKind::Quote,
            ])),
        }
    }

    pub fn unfiltered() -> Self {
        Self { filter: None }
    }

    /// Publish the journal's events in order; returns how many were fed
    /// into the bus. Unknown tags are skipped.
    pub fn run(&self, bus: &mut EventBus, path: &Path) -> Result<usize, JournalError> {
        let mut published = 0usize;
        for decoded in read_events(path)? {
            match decoded {
                DecodedEvent::Known(event) => {
                    if self.passes(&event) {
                        bus.publish(event);
                        published += 1;
                    }
                }
                DecodedEvent::Raw { event_type, .. } => {
                    debug!(event_type, "skipping unknown journal tag");
                }
            }
        }
        Ok(published)
    }

    fn passes(&self, event: &Event) -> bool {
        match &self.filter {
            None => true,
            Some(kinds) => kinds.contains(&event.kind()),
        }
    }
}
