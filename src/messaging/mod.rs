//! # Domain Event Publishing
//!
//! After a write commits the service announces it on the message broker. Consumers bind to
//! routing keys, which double as NATS subjects.
//!
//! ## Key Features
//! - [`DomainEvent`] owns the event names, routing keys and wire bodies
//! - [`EventPublisher`] is the seam between the service and a broker
//! - Publishers: NATS for deployments, logging-only for local runs, recording for tests
//!
//! ## Rust Concepts Used
//! - `#[async_trait]` for an object-safe async trait used as `Arc<dyn EventPublisher>`
//! - Enum variants carrying their own payloads instead of stringly-typed maps

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::core::error::ObservationsResult;

pub mod nats;
pub mod recording;

pub use nats::NatsPublisher;
pub use recording::RecordingPublisher;

pub const OBSERVATION_SET_UPDATED_ROUTING_KEY: &str = "dhos.DM000004";
pub const ENCOUNTER_UPDATED_ROUTING_KEY: &str = "dhos.DM000007";
pub const AUDIT_ROUTING_KEY: &str = "dhos.34837004";

/// Who did what, for the audit trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEventData {
    pub device_id: Option<String>,
    pub clinician_id: Option<String>,
    pub encounter_id: Option<String>,
    pub patient_id: Option<String>,
    pub obs_set_id: String,
}

/// Events the service publishes
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// An observation set was created; carries its full rendering
    ObservationSetUpdated { observation_set: Value },
    /// An encounter gained a new observation set
    EncounterUpdated { encounter_id: String },
    /// Audit record of an observation set being created
    ObservationSetCreatedAudit(AuditEventData),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::ObservationSetUpdated { .. } => "OBSERVATION_SET_UPDATED",
            DomainEvent::EncounterUpdated { .. } => "ENCOUNTER_UPDATED",
            DomainEvent::ObservationSetCreatedAudit(_) => "AUDIT_MESSAGE",
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            DomainEvent::ObservationSetUpdated { .. } => OBSERVATION_SET_UPDATED_ROUTING_KEY,
            DomainEvent::EncounterUpdated { .. } => ENCOUNTER_UPDATED_ROUTING_KEY,
            DomainEvent::ObservationSetCreatedAudit(_) => AUDIT_ROUTING_KEY,
        }
    }

    /// Message body as consumers expect it
    pub fn body(&self) -> Value {
        match self {
            DomainEvent::ObservationSetUpdated { observation_set } => json!({
                "actions": [{
                    "name": "process_observation_set",
                    "data": {"observation_set": observation_set},
                }]
            }),
            DomainEvent::EncounterUpdated { encounter_id } => json!({
                "encounter_id": encounter_id,
            }),
            DomainEvent::ObservationSetCreatedAudit(data) => json!({
                "event_type": "create observation set",
                "event_data": data,
            }),
        }
    }
}

/// Sends domain events to a broker
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> ObservationsResult<()>;

    /// Short name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Writes events to the log instead of a broker
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &DomainEvent) -> ObservationsResult<()> {
        info!(
            event = event.name(),
            routing_key = event.routing_key(),
            body = %event.body(),
            "event not sent, broker disabled"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_set_updated_body() {
        let event = DomainEvent::ObservationSetUpdated {
            observation_set: json!({"uuid": "set-1"}),
        };
        assert_eq!(event.name(), "OBSERVATION_SET_UPDATED");
        assert_eq!(event.routing_key(), "dhos.DM000004");
        assert_eq!(
            event.body(),
            json!({"actions": [{"name": "process_observation_set", "data": {"observation_set": {"uuid": "set-1"}}}]})
        );
    }

    #[test]
    fn test_encounter_updated_body() {
        let event = DomainEvent::EncounterUpdated {
            encounter_id: "encounter-1".to_string(),
        };
        assert_eq!(event.routing_key(), "dhos.DM000007");
        assert_eq!(event.body(), json!({"encounter_id": "encounter-1"}));
    }

    #[test]
    fn test_audit_body() {
        let event = DomainEvent::ObservationSetCreatedAudit(AuditEventData {
            device_id: None,
            clinician_id: Some("clinician-1".to_string()),
            encounter_id: Some("encounter-1".to_string()),
            patient_id: None,
            obs_set_id: "set-1".to_string(),
        });
        let body = event.body();
        assert_eq!(body["event_type"], "create observation set");
        assert_eq!(body["event_data"]["clinician_id"], "clinician-1");
        assert_eq!(body["event_data"]["obs_set_id"], "set-1");
    }

    #[tokio::test]
    async fn test_log_publisher_never_fails() {
        let event = DomainEvent::EncounterUpdated {
            encounter_id: "encounter-1".to_string(),
        };
        LogPublisher.publish(&event).await.unwrap();
    }
}
