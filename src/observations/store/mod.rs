//! # Observation Stores
//!
//! [`ObservationStore`] is the persistence seam of the service. Two implementations exist:
//!
//! - [`postgres::PostgresObservationStore`]: the production store, built on a `sqlx` pool,
//!   with the daily aggregate kept in a materialized view
//! - [`memory::InMemoryObservationStore`]: a lock-protected in-process store used for local
//!   development and the integration tests
//!
//! Both honour the same ordering rules, expressed by the comparators in this module.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::core::error::ObservationsResult;
use crate::observations::aggregation::AggregateRow;
use crate::observations::model::{ObservationSet, ObservationSetUpdate};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryObservationStore;
pub use postgres::PostgresObservationStore;

/// Sets recorded at `locations` with `start < record_time <= end`
#[derive(Debug, Clone)]
pub struct LocationSearch {
    pub locations: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<u32>,
}

/// Aggregate rows with `start <= record_day <= end`, optionally limited to some locations
#[derive(Debug, Clone)]
pub struct AggregateFilter {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub locations: Option<Vec<String>>,
}

impl AggregateFilter {
    pub fn matches(&self, row: &AggregateRow) -> bool {
        if row.record_day < self.start || row.record_day > self.end {
            return false;
        }
        match &self.locations {
            Some(locations) => row
                .location_id
                .as_ref()
                .map_or(false, |location| locations.contains(location)),
            None => true,
        }
    }
}

/// Persistence operations needed by the observation service
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Persist a new set with its observations and metadata atomically
    async fn insert_observation_set(&self, set: &ObservationSet) -> ObservationsResult<()>;

    async fn get_observation_set(&self, uuid: &str) -> ObservationsResult<Option<ObservationSet>>;

    /// Apply a patch to a stored set; `Ok(None)` when the set does not exist
    async fn update_observation_set(
        &self,
        uuid: &str,
        update: &ObservationSetUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> ObservationsResult<Option<ObservationSet>>;

    /// Recompute `mins_late` for every set of an encounter
    async fn refresh_mins_late(&self, encounter_id: &str) -> ObservationsResult<()>;

    /// Sets for any of the encounters, newest record first
    async fn list_for_encounters(
        &self,
        encounter_ids: &[String],
        limit: Option<u32>,
    ) -> ObservationsResult<Vec<ObservationSet>>;

    /// The most recently created set of each encounter that has one
    async fn latest_for_encounters(
        &self,
        encounter_ids: &[String],
    ) -> ObservationsResult<HashMap<String, ObservationSet>>;

    /// Number of sets per encounter, only for encounters that have any
    async fn count_for_encounters(
        &self,
        encounter_ids: &[String],
    ) -> ObservationsResult<HashMap<String, i64>>;

    async fn search_by_locations(&self, search: &LocationSearch) -> ObservationsResult<Vec<ObservationSet>>;

    async fn list_for_patient(
        &self,
        patient_id: &str,
        limit: Option<u32>,
    ) -> ObservationsResult<Vec<ObservationSet>>;

    /// Sets modified strictly after `since`, most recently modified first
    async fn modified_since(&self, since: DateTime<Utc>) -> ObservationsResult<Vec<ObservationSet>>;

    /// Rebuild the daily aggregate from the current sets
    async fn refresh_aggregates(&self) -> ObservationsResult<()>;

    /// Rows of the last refreshed aggregate
    async fn aggregate_rows(&self, filter: &AggregateFilter) -> ObservationsResult<Vec<AggregateRow>>;

    /// Remove every set, observation and metadata row
    async fn delete_all(&self) -> ObservationsResult<()>;

    /// Cheap connectivity check
    async fn ping(&self) -> ObservationsResult<()>;
}

/// Newest `record_time` first, then newest `created`
pub fn newest_recorded_first(a: &ObservationSet, b: &ObservationSet) -> Ordering {
    b.record_time
        .cmp(&a.record_time)
        .then_with(|| b.created.cmp(&a.created))
}

/// Newest `created` first, then newest `record_time`; modification never affects this order
pub fn newest_created_first(a: &ObservationSet, b: &ObservationSet) -> Ordering {
    b.created
        .cmp(&a.created)
        .then_with(|| b.record_time.cmp(&a.record_time))
}

/// Most recently modified first
pub fn newest_modified_first(a: &ObservationSet, b: &ObservationSet) -> Ordering {
    b.modified.cmp(&a.modified)
}
