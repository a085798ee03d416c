//! # Observation Data Model
//!
//! Request payloads, the stored representation of observation sets, and the validation and
//! patch rules that apply to them.
//!
//! ## Key Features
//! - Incoming payloads are deserialized into dedicated request types, so unknown fields are
//!   ignored and required fields are enforced by serde
//! - An observation must carry exactly one of a numeric or string value unless the patient refused
//! - Patches distinguish "field absent" from "field explicitly null" for nullable columns
//! - The compact rendering drops the HL7 OBX fields
//!
//! ## Rust Concepts Used
//! - `Option<Option<T>>` with a custom deserializer to model tri-state patch fields
//! - Builder-style conversion from request to stored entity via associated functions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::core::error::{ObservationsError, ObservationsResult};

/// Observation types counted by the aggregation reports, excluding nurse concern
pub const CORE_OBSERVATION_TYPES: [&str; 8] = [
    "o2_therapy_status",
    "heart_rate",
    "spo2",
    "temperature",
    "diastolic_blood_pressure",
    "respiratory_rate",
    "consciousness_acvpu",
    "systolic_blood_pressure",
];

pub const NURSE_CONCERN: &str = "nurse_concern";

/// Keys only present in the full rendering of an observation set
const OBX_FIELDS: [&str; 2] = ["obx_reference_range", "obx_abnormal_flags"];

/// A stored observation set with its observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet {
    pub uuid: String,
    pub created: DateTime<Utc>,
    pub created_by: String,
    pub modified: DateTime<Utc>,
    pub modified_by: String,
    pub encounter_id: Option<String>,
    pub patient_id: Option<String>,
    pub record_time: DateTime<Utc>,
    pub score_system: String,
    pub score_string: Option<String>,
    pub score_value: Option<i32>,
    pub score_severity: Option<String>,
    pub spo2_scale: Option<i32>,
    pub is_partial: Option<bool>,
    pub empty_set: Option<bool>,
    pub ranking: Option<String>,
    pub obx_reference_range: Option<String>,
    pub obx_abnormal_flags: Option<String>,
    pub time_next_obs_set_due: Option<DateTime<Utc>>,
    pub monitoring_instruction: Option<String>,
    pub location: Option<String>,
    /// Minutes between `record_time` and when the previous set said this one was due
    pub mins_late: Option<i32>,
    pub observations: Vec<Observation>,
}

/// A single clinical measurement within a set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub uuid: String,
    pub created: DateTime<Utc>,
    pub created_by: String,
    pub modified: DateTime<Utc>,
    pub modified_by: String,
    pub observation_type: String,
    pub measured_time: DateTime<Utc>,
    pub patient_refused: Option<bool>,
    pub score_value: Option<i32>,
    pub observation_value: Option<f64>,
    pub observation_string: Option<String>,
    pub observation_unit: Option<String>,
    pub observation_metadata: Option<ObservationMetadata>,
}

/// Extra context about how an observation was taken (oxygen mask, GCS breakdown, posture)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationMetadata {
    pub uuid: String,
    pub mask: Option<String>,
    pub mask_percent: Option<i32>,
    pub gcs_eyes: Option<i32>,
    pub gcs_eyes_description: Option<String>,
    pub gcs_verbal: Option<i32>,
    pub gcs_verbal_description: Option<String>,
    pub gcs_motor: Option<i32>,
    pub gcs_motor_description: Option<String>,
    pub patient_position: Option<String>,
}

/// Body of `POST /dhos/v2/observation_set`
#[derive(Debug, Clone, Deserialize)]
pub struct ObservationSetRequest {
    #[serde(default, deserialize_with = "non_empty")]
    pub encounter_id: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub patient_id: Option<String>,
    pub record_time: DateTime<Utc>,
    pub score_system: String,
    pub score_string: Option<String>,
    pub score_value: Option<i32>,
    pub score_severity: Option<String>,
    pub spo2_scale: Option<i32>,
    pub is_partial: Option<bool>,
    pub empty_set: Option<bool>,
    pub ranking: Option<String>,
    pub obx_reference_range: Option<String>,
    pub obx_abnormal_flags: Option<String>,
    pub time_next_obs_set_due: Option<DateTime<Utc>>,
    pub monitoring_instruction: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub observations: Vec<ObservationRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservationRequest {
    pub observation_type: String,
    pub measured_time: DateTime<Utc>,
    pub patient_refused: Option<bool>,
    pub score_value: Option<i32>,
    pub observation_value: Option<f64>,
    pub observation_string: Option<String>,
    pub observation_unit: Option<String>,
    pub observation_metadata: Option<ObservationMetadataRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservationMetadataRequest {
    pub mask: Option<String>,
    pub mask_percent: Option<i32>,
    pub gcs_eyes: Option<i32>,
    pub gcs_eyes_description: Option<String>,
    pub gcs_verbal: Option<i32>,
    pub gcs_verbal_description: Option<String>,
    pub gcs_motor: Option<i32>,
    pub gcs_motor_description: Option<String>,
    pub patient_position: Option<String>,
}

/// Body of `PATCH /dhos/v2/observation_set/{id}`
///
/// Fields wrapped in `Option<Option<_>>` may be explicitly cleared with `null`; a plain
/// `Option` field is left untouched when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservationSetUpdate {
    pub score_value: i32,
    pub observations: Vec<ObservationUpdate>,
    #[serde(default, deserialize_with = "present")]
    pub score_string: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub score_severity: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub spo2_scale: Option<Option<i32>>,
    #[serde(default, deserialize_with = "present")]
    pub obx_reference_range: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub obx_abnormal_flags: Option<Option<String>>,
    pub is_partial: Option<bool>,
    pub empty_set: Option<bool>,
    pub ranking: Option<String>,
    pub time_next_obs_set_due: Option<DateTime<Utc>>,
    pub monitoring_instruction: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservationUpdate {
    pub observation_type: Option<String>,
    pub score_value: Option<i32>,
}

/// Blank identifiers are treated as absent
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|id| !id.trim().is_empty()))
}

/// Marks a field as present so that `null` becomes `Some(None)` instead of `None`
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ObservationRequest {
    pub fn validate(&self) -> ObservationsResult<()> {
        if self.observation_type.trim().is_empty() {
            return Err(ObservationsError::invalid_field(
                "observation_type",
                "Observation type must not be empty",
            ));
        }

        match (self.observation_value.is_some(), self.observation_string.is_some()) {
            (true, true) => Err(ObservationsError::invalid_field(
                "observation_value",
                "Observation cannot have both observation_value and observation_string",
            )),
            (false, false) if !self.patient_refused.unwrap_or(false) => {
                Err(ObservationsError::invalid_field(
                    "observation_value",
                    "Observation requires observation_value or observation_string unless the patient refused",
                ))
            }
            _ => Ok(()),
        }
    }
}

impl ObservationSetRequest {
    /// Check the request before anything is persisted
    pub fn validate(&self) -> ObservationsResult<()> {
        if self.observations.is_empty() {
            return Err(ObservationsError::invalid_field(
                "observations",
                "Observations should not be empty",
            ));
        }

        if self.encounter_id.is_none() && self.patient_id.is_none() {
            return Err(ObservationsError::validation(
                "Observation set requires an encounter_id or a patient_id",
            ));
        }

        for observation in &self.observations {
            observation.validate()?;
        }

        Ok(())
    }
}

impl ObservationSet {
    /// Build a new set from a validated request
    pub fn from_request(request: ObservationSetRequest, actor: &str, now: DateTime<Utc>) -> Self {
        let observations = request
            .observations
            .into_iter()
            .map(|obs| Observation::from_request(obs, actor, now))
            .collect();

        Self {
            uuid: Uuid::new_v4().to_string(),
            created: now,
            created_by: actor.to_string(),
            modified: now,
            modified_by: actor.to_string(),
            encounter_id: request.encounter_id,
            patient_id: request.patient_id,
            record_time: request.record_time,
            score_system: request.score_system,
            score_string: request.score_string,
            score_value: request.score_value,
            score_severity: request.score_severity,
            spo2_scale: Some(request.spo2_scale.unwrap_or(1)),
            is_partial: request.is_partial,
            empty_set: request.empty_set,
            ranking: request.ranking,
            obx_reference_range: request.obx_reference_range,
            obx_abnormal_flags: request.obx_abnormal_flags,
            time_next_obs_set_due: request.time_next_obs_set_due,
            monitoring_instruction: request.monitoring_instruction,
            location: request.location,
            mins_late: None,
            observations,
        }
    }

    /// Apply a patch in place and return the uuids of the observations it touched
    ///
    /// Every observation update is checked before anything changes, so a rejected patch
    /// leaves the set untouched.
    pub fn apply_update(
        &mut self,
        update: &ObservationSetUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> ObservationsResult<Vec<String>> {
        let mut targets = Vec::with_capacity(update.observations.len());
        for obs_update in &update.observations {
            let (observation_type, score_value) =
                match (&obs_update.observation_type, obs_update.score_value) {
                    (Some(observation_type), Some(score_value)) => (observation_type, score_value),
                    _ => {
                        return Err(ObservationsError::invalid_field(
                            "observations",
                            "Observation object must contain both 'observation_type' and 'score_value'",
                        ))
                    }
                };

            let index = self
                .observations
                .iter()
                .position(|obs| &obs.observation_type == observation_type)
                .ok_or_else(|| {
                    ObservationsError::not_found(format!(
                        "Observation of type '{}' not found in set",
                        observation_type
                    ))
                })?;
            targets.push((index, score_value));
        }

        self.score_value = Some(update.score_value);
        if let Some(score_string) = &update.score_string {
            self.score_string = score_string.clone();
        }
        if let Some(score_severity) = &update.score_severity {
            self.score_severity = score_severity.clone();
        }
        if let Some(spo2_scale) = update.spo2_scale {
            self.spo2_scale = spo2_scale;
        }
        if let Some(range) = &update.obx_reference_range {
            self.obx_reference_range = range.clone();
        }
        if let Some(flags) = &update.obx_abnormal_flags {
            self.obx_abnormal_flags = flags.clone();
        }
        if let Some(is_partial) = update.is_partial {
            self.is_partial = Some(is_partial);
        }
        if let Some(empty_set) = update.empty_set {
            self.empty_set = Some(empty_set);
        }
        if let Some(ranking) = &update.ranking {
            self.ranking = Some(ranking.clone());
        }
        if let Some(due) = update.time_next_obs_set_due {
            self.time_next_obs_set_due = Some(due);
        }
        if let Some(instruction) = &update.monitoring_instruction {
            self.monitoring_instruction = Some(instruction.clone());
        }
        self.modified = now;
        self.modified_by = actor.to_string();

        let mut touched = Vec::with_capacity(targets.len());
        for (index, score_value) in targets {
            let observation = &mut self.observations[index];
            observation.score_value = Some(score_value);
            observation.modified = now;
            observation.modified_by = actor.to_string();
            touched.push(observation.uuid.clone());
        }

        Ok(touched)
    }

    /// Distinct observation types present in this set
    pub fn observation_types(&self) -> HashSet<&str> {
        self.observations
            .iter()
            .map(|obs| obs.observation_type.as_str())
            .collect()
    }

    /// JSON rendering, optionally without the OBX fields
    pub fn render(&self, compact: bool) -> ObservationsResult<Value> {
        let mut value = serde_json::to_value(self)?;
        if compact {
            if let Value::Object(map) = &mut value {
                for key in OBX_FIELDS {
                    map.remove(key);
                }
            }
        }
        Ok(value)
    }
}

impl Observation {
    fn from_request(request: ObservationRequest, actor: &str, now: DateTime<Utc>) -> Self {
        let observation_metadata = request.observation_metadata.map(|meta| ObservationMetadata {
            uuid: Uuid::new_v4().to_string(),
            mask: meta.mask,
            mask_percent: meta.mask_percent,
            gcs_eyes: meta.gcs_eyes,
            gcs_eyes_description: meta.gcs_eyes_description,
            gcs_verbal: meta.gcs_verbal,
            gcs_verbal_description: meta.gcs_verbal_description,
            gcs_motor: meta.gcs_motor,
            gcs_motor_description: meta.gcs_motor_description,
            patient_position: meta.patient_position,
        });

        Self {
            uuid: Uuid::new_v4().to_string(),
            created: now,
            created_by: actor.to_string(),
            modified: now,
            modified_by: actor.to_string(),
            observation_type: request.observation_type,
            measured_time: request.measured_time,
            patient_refused: request.patient_refused,
            score_value: request.score_value,
            observation_value: request.observation_value,
            observation_string: request.observation_string,
            observation_unit: request.observation_unit,
            observation_metadata,
        }
    }
}

/// Render a list of sets with the same compact flag
pub fn render_all(sets: &[ObservationSet], compact: bool) -> ObservationsResult<Vec<Value>> {
    sets.iter().map(|set| set.render(compact)).collect()
}
