//! Publisher that keeps every event in memory, for tests and local inspection.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{DomainEvent, EventPublisher};
use crate::core::error::{ObservationsError, ObservationsResult};

/// An event as it would have gone over the wire
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub name: &'static str,
    pub routing_key: &'static str,
    pub body: Value,
}

#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    failing: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later publish fail, to exercise broker outages
    pub fn fail_publishes(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }

    /// Names of the recorded events in publication order
    pub fn event_names(&self) -> Vec<&'static str> {
        self.messages.lock().iter().map(|message| message.name).collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> ObservationsResult<()> {
        if *self.failing.lock() {
            return Err(ObservationsError::messaging("broker unavailable"));
        }
        self.messages.lock().push(PublishedMessage {
            name: event.name(),
            routing_key: event.routing_key(),
            body: event.body(),
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
