//! # Observation Service
//!
//! The operations behind the HTTP API. Handlers parse and authorise; everything that touches
//! the store or the broker goes through [`ObservationService`].
//!
//! ## Key Features
//! - Create: validate, persist, recompute lateness for the encounter, publish events
//! - Patch: apply score updates coming back from the scoring adapter
//! - Queries by encounter, patient, location and modification time
//! - Aggregate refresh and the report builders over the refreshed aggregate
//!
//! ## Rust Concepts Used
//! - `Arc<dyn Trait>` for the store and publisher so backends are chosen at startup
//! - Events are published after the write has committed; broker failures are logged, never
//!   propagated, because the data change cannot be rolled back at that point

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::auth::AuthContext;
use crate::core::config::Environment;
use crate::core::error::{ObservationsError, ObservationsResult};
use crate::messaging::{AuditEventData, DomainEvent, EventPublisher};
use crate::observability::metrics;
use crate::observations::aggregation::{
    interval_report, missing_report, monthly_by_location_report, monthly_report, on_time_report,
    IntervalReport, MissingReport, MonthlyStats, OnTimeReport,
};
use crate::observations::model::{ObservationSet, ObservationSetRequest, ObservationSetUpdate};
use crate::observations::store::{AggregateFilter, LocationSearch, ObservationStore};

pub struct ObservationService {
    store: Arc<dyn ObservationStore>,
    publisher: Arc<dyn EventPublisher>,
    environment: Environment,
}

impl ObservationService {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        publisher: Arc<dyn EventPublisher>,
        environment: Environment,
    ) -> Self {
        Self {
            store,
            publisher,
            environment,
        }
    }

    pub fn store(&self) -> Arc<dyn ObservationStore> {
        Arc::clone(&self.store)
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Store a new observation set and announce it
    ///
    /// `suppress_publish` skips the domain events but never the audit event, and is ignored
    /// in production.
    pub async fn create_observation_set(
        &self,
        request: ObservationSetRequest,
        caller: &AuthContext,
        suppress_publish: bool,
    ) -> ObservationsResult<ObservationSet> {
        request.validate()?;

        let set = ObservationSet::from_request(request, &caller.user_id, Utc::now());
        self.store.insert_observation_set(&set).await?;
        metrics::record_set_created();

        if let Some(encounter_id) = &set.encounter_id {
            self.store.refresh_mins_late(encounter_id).await?;
        }

        info!(
            uuid = %set.uuid,
            encounter_id = ?set.encounter_id,
            patient_id = ?set.patient_id,
            "observation set created"
        );

        self.publish(DomainEvent::ObservationSetCreatedAudit(AuditEventData {
            device_id: caller.referring_device_id.clone(),
            clinician_id: Some(caller.user_id.clone()),
            encounter_id: set.encounter_id.clone(),
            patient_id: set.patient_id.clone(),
            obs_set_id: set.uuid.clone(),
        }))
        .await;

        let stored = self
            .store
            .get_observation_set(&set.uuid)
            .await?
            .ok_or_else(|| ObservationsError::internal("Created observation set vanished"))?;

        if suppress_publish && !self.environment.is_production() {
            debug!(uuid = %stored.uuid, "event publication suppressed by request");
            return Ok(stored);
        }

        self.publish(DomainEvent::ObservationSetUpdated {
            observation_set: stored.render(false)?,
        })
        .await;

        match &stored.encounter_id {
            Some(encounter_id) => {
                self.publish(DomainEvent::EncounterUpdated {
                    encounter_id: encounter_id.clone(),
                })
                .await
            }
            None => debug!(uuid = %stored.uuid, "set has no encounter, skipping encounter update"),
        }

        Ok(stored)
    }

    async fn publish(&self, event: DomainEvent) {
        match self.publisher.publish(&event).await {
            Ok(()) => metrics::record_event_published(event.name()),
            Err(err) => {
                metrics::record_event_failed(event.name());
                error!(
                    event = event.name(),
                    publisher = self.publisher.name(),
                    "Failed to publish event: {}",
                    err
                );
            }
        }
    }

    pub async fn update_observation_set(
        &self,
        uuid: &str,
        update: &ObservationSetUpdate,
        caller: &AuthContext,
    ) -> ObservationsResult<ObservationSet> {
        let updated = self
            .store
            .update_observation_set(uuid, update, &caller.user_id, Utc::now())
            .await?
            .ok_or_else(|| not_found_set(uuid))?;

        metrics::record_set_updated();
        info!(uuid = %uuid, by = %caller.user_id, "observation set updated");
        Ok(updated)
    }

    pub async fn get_observation_set(&self, uuid: &str) -> ObservationsResult<ObservationSet> {
        self.store
            .get_observation_set(uuid)
            .await?
            .ok_or_else(|| not_found_set(uuid))
    }

    pub async fn list_for_encounters(
        &self,
        encounter_ids: &[String],
        limit: Option<u32>,
    ) -> ObservationsResult<Vec<ObservationSet>> {
        self.store.list_for_encounters(encounter_ids, limit).await
    }

    /// The most recently created set across all of `encounter_ids`
    pub async fn latest_for_encounter(&self, encounter_ids: &[String]) -> ObservationsResult<ObservationSet> {
        self.store
            .latest_for_encounters(encounter_ids)
            .await?
            .into_values()
            .max_by(|a, b| {
                a.created
                    .cmp(&b.created)
                    .then_with(|| a.record_time.cmp(&b.record_time))
            })
            .ok_or_else(|| {
                ObservationsError::not_found(format!(
                    "Encounter {} has no observation sets",
                    encounter_ids.join(", ")
                ))
            })
    }

    pub async fn latest_for_encounters(
        &self,
        encounter_ids: &[String],
    ) -> ObservationsResult<HashMap<String, ObservationSet>> {
        self.store.latest_for_encounters(encounter_ids).await
    }

    /// Count per requested encounter, zero for encounters without sets
    pub async fn count_for_encounters(
        &self,
        encounter_ids: &[String],
    ) -> ObservationsResult<HashMap<String, i64>> {
        let mut found = self.store.count_for_encounters(encounter_ids).await?;
        Ok(encounter_ids
            .iter()
            .map(|id| (id.clone(), found.remove(id).unwrap_or(0)))
            .collect())
    }

    pub async fn search_by_locations(&self, search: &LocationSearch) -> ObservationsResult<Vec<ObservationSet>> {
        self.store.search_by_locations(search).await
    }

    pub async fn list_for_patient(
        &self,
        patient_id: &str,
        limit: Option<u32>,
    ) -> ObservationsResult<Vec<ObservationSet>> {
        self.store.list_for_patient(patient_id, limit).await
    }

    pub async fn modified_since(&self, since: DateTime<Utc>) -> ObservationsResult<Vec<ObservationSet>> {
        self.store.modified_since(since).await
    }

    /// Rebuild the daily aggregate, returning how long it took
    pub async fn refresh_aggregates(&self) -> ObservationsResult<Duration> {
        let started = Instant::now();
        self.store.refresh_aggregates().await?;
        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "aggregate refreshed");
        Ok(elapsed)
    }

    pub async fn on_time_report(&self, filter: &AggregateFilter) -> ObservationsResult<OnTimeReport> {
        let rows = self.store.aggregate_rows(filter).await?;
        Ok(on_time_report(&rows))
    }

    pub async fn missing_report(&self, filter: &AggregateFilter) -> ObservationsResult<MissingReport> {
        let rows = self.store.aggregate_rows(filter).await?;
        Ok(missing_report(&rows))
    }

    pub async fn interval_report(&self, filter: &AggregateFilter) -> ObservationsResult<IntervalReport> {
        let rows = self.store.aggregate_rows(filter).await?;
        Ok(interval_report(&rows))
    }

    pub async fn monthly_report(
        &self,
        filter: &AggregateFilter,
    ) -> ObservationsResult<BTreeMap<String, MonthlyStats>> {
        let rows = self.store.aggregate_rows(filter).await?;
        Ok(monthly_report(&rows))
    }

    pub async fn monthly_by_location_report(
        &self,
        filter: &AggregateFilter,
    ) -> ObservationsResult<BTreeMap<String, BTreeMap<String, MonthlyStats>>> {
        let rows = self.store.aggregate_rows(filter).await?;
        Ok(monthly_by_location_report(&rows))
    }

    /// Remove all stored data; refused in production
    pub async fn drop_data(&self) -> ObservationsResult<()> {
        if self.environment.is_production() {
            return Err(ObservationsError::authz("Dropping data is not allowed in production"));
        }
        self.store.delete_all().await?;
        info!("all observation data dropped");
        Ok(())
    }
}

fn not_found_set(uuid: &str) -> ObservationsError {
    ObservationsError::not_found(format!("Observation set {} not found", uuid))
}

/// `"x.xxx seconds"` as reported by the aggregate refresh endpoint
pub fn format_time_taken(elapsed: Duration) -> String {
    format!("{:.3} seconds", elapsed.as_secs_f64())
}
