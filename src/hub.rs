//! Fans lines out to every subscriber.
//!
//! The hub is the single consumer of the bounded channel all device readers feed.
//! Lines of one device therefore reach subscribers in the order they were read.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{actions::LineEvent, log_sink::LogLine, registry::Registry};

/// The outcome of a single [`Hub::publish`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers which took the line.
    pub delivered: usize,

    /// Subscribers which failed and were removed by this pass.
    pub pruned: usize,
}

/// The broadcast hub.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: Arc<Registry>,
}

impl Hub {
    /// Create a hub delivering to the members of `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Hand the line to every current subscriber.
    ///
    /// Never waits on a subscriber. Those which can't take the line are
    /// removed from the registry once the pass is done.
    pub fn publish(&self, line: &LogLine) -> Delivery {
        let event = Arc::new(LineEvent::from(line));

        let mut delivery = Delivery::default();
        let mut failed = vec![];

        for (id, subscriber) in self.registry.snapshot() {
            match subscriber.send(&event) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    debug!(%id, %e, "Dropping subscriber");
                    failed.push(id);
                }
            }
        }

        delivery.pruned = failed
            .into_iter()
            .filter(|id| self.registry.remove(*id))
            .count();

        trace!(device = %line.device, ?delivery, "Published");

        delivery
    }

    /// Publish lines until every sender is gone.
    pub async fn run(self, mut lines: mpsc::Receiver<LogLine>) {
        while let Some(line) = lines.recv().await {
            self.publish(&line);
        }

        debug!("No more device readers, hub done");
    }
}
