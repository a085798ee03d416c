//! NATS-backed event publisher.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{DomainEvent, EventPublisher};
use crate::core::config::MessagingConfig;
use crate::core::error::{ObservationsError, ObservationsResult};

pub struct NatsPublisher {
    client: async_nats::Client,
    subject_prefix: Option<String>,
}

impl NatsPublisher {
    /// Connect to the broker described by `config`
    pub async fn connect(config: &MessagingConfig) -> ObservationsResult<Self> {
        let address = config.server_address();
        let options = match (&config.username, &config.password) {
            (Some(user), Some(password)) => {
                async_nats::ConnectOptions::with_user_and_password(user.clone(), password.clone())
            }
            _ => async_nats::ConnectOptions::new(),
        };

        let client = options
            .name("observations-api")
            .connect(address.as_str())
            .await
            .map_err(|e| ObservationsError::messaging(format!("Failed to connect to NATS: {}", e)))?;

        info!(server = %address, "connected to NATS");
        Ok(Self {
            client,
            subject_prefix: config.subject_prefix.clone(),
        })
    }

    pub fn subject_for(&self, event: &DomainEvent) -> String {
        subject(self.subject_prefix.as_deref(), event.routing_key())
    }

    /// Flush buffered messages, used on shutdown
    pub async fn flush(&self) -> ObservationsResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| ObservationsError::messaging(format!("Failed to flush NATS client: {}", e)))
    }
}

fn subject(prefix: Option<&str>, routing_key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}.{}", prefix.trim_end_matches('.'), routing_key),
        None => routing_key.to_string(),
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) -> ObservationsResult<()> {
        let subject = self.subject_for(event);
        let payload = serde_json::to_vec(&event.body())?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| {
                ObservationsError::messaging(format!(
                    "Failed to publish {} to {}: {}",
                    event.name(),
                    subject,
                    e
                ))
            })?;

        debug!(event = event.name(), subject = %subject, "event published");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}
