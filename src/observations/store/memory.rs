//! In-process observation store.
//!
//! Sets are kept in insertion order behind a `parking_lot::RwLock`; every query sorts a
//! snapshot of the newest-first sequence, so ties on timestamps resolve to the set stored last.
//! The aggregate is a snapshot taken on [`ObservationStore::refresh_aggregates`], mirroring
//! the materialized view of the PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{
    newest_created_first, newest_modified_first, newest_recorded_first, AggregateFilter,
    LocationSearch, ObservationStore,
};
use crate::core::error::ObservationsResult;
use crate::observations::aggregation::{summarise, AggregateRow};
use crate::observations::model::{ObservationSet, ObservationSetUpdate};
use crate::observations::timing::{compute_mins_late, SetTiming};

#[derive(Default)]
struct MemoryState {
    sets: Vec<ObservationSet>,
    index: HashMap<String, usize>,
    aggregates: Vec<AggregateRow>,
}

impl MemoryState {
    /// Sets matching `predicate`, most recently inserted first
    fn select<F>(&self, predicate: F) -> Vec<ObservationSet>
    where
        F: Fn(&ObservationSet) -> bool,
    {
        self.sets
            .iter()
            .rev()
            .filter(|set| predicate(set))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryObservationStore {
    state: RwLock<MemoryState>,
}

impl InMemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply_limit(mut sets: Vec<ObservationSet>, limit: Option<u32>) -> Vec<ObservationSet> {
    if let Some(limit) = limit {
        sets.truncate(limit as usize);
    }
    sets
}

#[async_trait]
impl ObservationStore for InMemoryObservationStore {
    async fn insert_observation_set(&self, set: &ObservationSet) -> ObservationsResult<()> {
        let mut state = self.state.write();
        let position = state.sets.len();
        state.index.insert(set.uuid.clone(), position);
        state.sets.push(set.clone());
        Ok(())
    }

    async fn get_observation_set(&self, uuid: &str) -> ObservationsResult<Option<ObservationSet>> {
        let state = self.state.read();
        Ok(state.index.get(uuid).map(|&position| state.sets[position].clone()))
    }

    async fn update_observation_set(
        &self,
        uuid: &str,
        update: &ObservationSetUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> ObservationsResult<Option<ObservationSet>> {
        let mut state = self.state.write();
        let Some(&position) = state.index.get(uuid) else {
            return Ok(None);
        };

        // Patch a copy so a rejected update leaves the stored set untouched
        let mut updated = state.sets[position].clone();
        updated.apply_update(update, actor, now)?;
        state.sets[position] = updated.clone();
        Ok(Some(updated))
    }

    async fn refresh_mins_late(&self, encounter_id: &str) -> ObservationsResult<()> {
        let mut state = self.state.write();
        let timings: Vec<SetTiming> = state
            .sets
            .iter()
            .filter(|set| set.encounter_id.as_deref() == Some(encounter_id))
            .map(|set| SetTiming {
                uuid: set.uuid.clone(),
                record_time: set.record_time,
                time_next_obs_set_due: set.time_next_obs_set_due,
                created: set.created,
            })
            .collect();

        for (uuid, mins_late) in compute_mins_late(timings) {
            if let Some(&position) = state.index.get(&uuid) {
                state.sets[position].mins_late = Some(mins_late);
            }
        }
        Ok(())
    }

    async fn list_for_encounters(
        &self,
        encounter_ids: &[String],
        limit: Option<u32>,
    ) -> ObservationsResult<Vec<ObservationSet>> {
        let mut sets = self.state.read().select(|set| {
            set.encounter_id
                .as_ref()
                .map_or(false, |id| encounter_ids.contains(id))
        });
        sets.sort_by(newest_recorded_first);
        Ok(apply_limit(sets, limit))
    }

    async fn latest_for_encounters(
        &self,
        encounter_ids: &[String],
    ) -> ObservationsResult<HashMap<String, ObservationSet>> {
        let mut sets = self.state.read().select(|set| {
            set.encounter_id
                .as_ref()
                .map_or(false, |id| encounter_ids.contains(id))
        });
        sets.sort_by(newest_created_first);

        let mut latest = HashMap::new();
        for set in sets {
            if let Some(encounter_id) = set.encounter_id.clone() {
                latest.entry(encounter_id).or_insert(set);
            }
        }
        Ok(latest)
    }

    async fn count_for_encounters(
        &self,
        encounter_ids: &[String],
    ) -> ObservationsResult<HashMap<String, i64>> {
        let state = self.state.read();
        let mut counts = HashMap::new();
        for set in &state.sets {
            if let Some(encounter_id) = &set.encounter_id {
                if encounter_ids.contains(encounter_id) {
                    *counts.entry(encounter_id.clone()).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn search_by_locations(&self, search: &LocationSearch) -> ObservationsResult<Vec<ObservationSet>> {
        let mut sets = self.state.read().select(|set| {
            set.location
                .as_ref()
                .map_or(false, |location| search.locations.contains(location))
                && set.record_time > search.start
                && set.record_time <= search.end
        });
        sets.sort_by(newest_recorded_first);
        Ok(apply_limit(sets, search.limit))
    }

    async fn list_for_patient(
        &self,
        patient_id: &str,
        limit: Option<u32>,
    ) -> ObservationsResult<Vec<ObservationSet>> {
        let mut sets = self
            .state
            .read()
            .select(|set| set.patient_id.as_deref() == Some(patient_id));
        sets.sort_by(newest_recorded_first);
        Ok(apply_limit(sets, limit))
    }

    async fn modified_since(&self, since: DateTime<Utc>) -> ObservationsResult<Vec<ObservationSet>> {
        let mut sets = self.state.read().select(|set| set.modified > since);
        sets.sort_by(newest_modified_first);
        Ok(sets)
    }

    async fn refresh_aggregates(&self) -> ObservationsResult<()> {
        let mut state = self.state.write();
        state.aggregates = summarise(&state.sets);
        Ok(())
    }

    async fn aggregate_rows(&self, filter: &AggregateFilter) -> ObservationsResult<Vec<AggregateRow>> {
        Ok(self
            .state
            .read()
            .aggregates
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn delete_all(&self) -> ObservationsResult<()> {
        let mut state = self.state.write();
        state.sets.clear();
        state.index.clear();
        state.aggregates.clear();
        Ok(())
    }

    async fn ping(&self) -> ObservationsResult<()> {
        Ok(())
    }
}
