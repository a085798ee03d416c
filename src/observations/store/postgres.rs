//! # PostgreSQL Observation Store
//!
//! Runtime-checked `sqlx` queries against the schema in `migrations/`. Observation sets are
//! loaded in two steps: the set rows first, then all observations (with their metadata) for
//! those sets in one `ANY($1)` query.
//!
//! ## Key Features
//! - Create and patch run inside a single transaction
//! - Patches lock the set row (`FOR UPDATE`) and reuse the domain patch rules
//! - Lateness is computed in Rust and written back per encounter
//! - The daily aggregate is the `agg_observation_sets` materialized view

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Row};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{AggregateFilter, LocationSearch, ObservationStore};
use crate::core::config::DatabaseConfig;
use crate::core::error::{ObservationsError, ObservationsResult};
use crate::observations::aggregation::{AggregateRow, IntervalBuckets, ObservationPresence};
use crate::observations::model::{
    Observation, ObservationMetadata, ObservationSet, ObservationSetUpdate,
};
use crate::observations::timing::{compute_mins_late, SetTiming};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const SET_COLUMNS: &str = "uuid, created, created_by, modified, modified_by, encounter_id, \
    patient_id, record_time, score_system, score_string, score_value, score_severity, \
    spo2_scale, is_partial, empty_set, ranking, obx_reference_range, obx_abnormal_flags, \
    time_next_obs_set_due, monitoring_instruction, location, mins_late";

const OBSERVATION_QUERY: &str = "SELECT o.uuid, o.observation_set_uuid, o.created, o.created_by, \
    o.modified, o.modified_by, o.observation_type, o.measured_time, o.patient_refused, \
    o.score_value, o.observation_value, o.observation_string, o.observation_unit, \
    m.uuid AS metadata_uuid, m.mask, m.mask_percent, m.gcs_eyes, m.gcs_eyes_description, \
    m.gcs_verbal, m.gcs_verbal_description, m.gcs_motor, m.gcs_motor_description, \
    m.patient_position \
    FROM observation o \
    LEFT JOIN observation_metadata m ON m.observation_uuid = o.uuid \
    WHERE o.observation_set_uuid = ANY($1) \
    ORDER BY o.created, o.uuid";

#[derive(Clone)]
pub struct PostgresObservationStore {
    pool: PgPool,
}

impl PostgresObservationStore {
    /// Open a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> ObservationsResult<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            "connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations from `migrations/`
    pub async fn run_migrations(&self) -> ObservationsResult<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn fetch_sets(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> ObservationsResult<Vec<ObservationSet>> {
        let mut conn = self.pool.acquire().await?;
        let rows = query.fetch_all(&mut *conn).await?;
        let sets = rows.iter().map(set_from_row).collect::<Result<Vec<_>, _>>()?;
        attach_observations(&mut conn, sets).await
    }
}

fn set_from_row(row: &PgRow) -> Result<ObservationSet, sqlx::Error> {
    Ok(ObservationSet {
        uuid: row.try_get("uuid")?,
        created: row.try_get("created")?,
        created_by: row.try_get("created_by")?,
        modified: row.try_get("modified")?,
        modified_by: row.try_get("modified_by")?,
        encounter_id: row.try_get("encounter_id")?,
        patient_id: row.try_get("patient_id")?,
        record_time: row.try_get("record_time")?,
        score_system: row.try_get("score_system")?,
        score_string: row.try_get("score_string")?,
        score_value: row.try_get("score_value")?,
        score_severity: row.try_get("score_severity")?,
        spo2_scale: row.try_get("spo2_scale")?,
        is_partial: row.try_get("is_partial")?,
        empty_set: row.try_get("empty_set")?,
        ranking: row.try_get("ranking")?,
        obx_reference_range: row.try_get("obx_reference_range")?,
        obx_abnormal_flags: row.try_get("obx_abnormal_flags")?,
        time_next_obs_set_due: row.try_get("time_next_obs_set_due")?,
        monitoring_instruction: row.try_get("monitoring_instruction")?,
        location: row.try_get("location")?,
        mins_late: row.try_get("mins_late")?,
        observations: Vec::new(),
    })
}

fn observation_from_row(row: &PgRow) -> Result<Observation, sqlx::Error> {
    let metadata_uuid: Option<String> = row.try_get("metadata_uuid")?;
    let observation_metadata = match metadata_uuid {
        Some(uuid) => Some(ObservationMetadata {
            uuid,
            mask: row.try_get("mask")?,
            mask_percent: row.try_get("mask_percent")?,
            gcs_eyes: row.try_get("gcs_eyes")?,
            gcs_eyes_description: row.try_get("gcs_eyes_description")?,
            gcs_verbal: row.try_get("gcs_verbal")?,
            gcs_verbal_description: row.try_get("gcs_verbal_description")?,
            gcs_motor: row.try_get("gcs_motor")?,
            gcs_motor_description: row.try_get("gcs_motor_description")?,
            patient_position: row.try_get("patient_position")?,
        }),
        None => None,
    };

    Ok(Observation {
        uuid: row.try_get("uuid")?,
        created: row.try_get("created")?,
        created_by: row.try_get("created_by")?,
        modified: row.try_get("modified")?,
        modified_by: row.try_get("modified_by")?,
        observation_type: row.try_get("observation_type")?,
        measured_time: row.try_get("measured_time")?,
        patient_refused: row.try_get("patient_refused")?,
        score_value: row.try_get("score_value")?,
        observation_value: row.try_get("observation_value")?,
        observation_string: row.try_get("observation_string")?,
        observation_unit: row.try_get("observation_unit")?,
        observation_metadata,
    })
}

fn aggregate_from_row(row: &PgRow) -> Result<AggregateRow, sqlx::Error> {
    let mut intervals = IntervalBuckets::default();
    for (index, column) in IntervalBuckets::COLUMNS.iter().enumerate() {
        intervals.set(index, row.try_get(*column)?);
    }

    Ok(AggregateRow {
        record_day: row.try_get::<NaiveDate, _>("record_day")?,
        location_id: row.try_get("location_id")?,
        score_severity: row.try_get("score_severity")?,
        all_obs_sets: row.try_get("all_obs_sets")?,
        late_obs_sets: row.try_get("late_obs_sets")?,
        missing_obs: row.try_get("missing_obs")?,
        presence: ObservationPresence {
            o2_therapy_status: row.try_get("o2_therapy_status")?,
            heart_rate: row.try_get("heart_rate")?,
            spo2: row.try_get("spo2")?,
            temperature: row.try_get("temperature")?,
            diastolic_blood_pressure: row.try_get("diastolic_blood_pressure")?,
            respiratory_rate: row.try_get("respiratory_rate")?,
            consciousness_acvpu: row.try_get("consciousness_acvpu")?,
            systolic_blood_pressure: row.try_get("systolic_blood_pressure")?,
            nurse_concern: row.try_get("nurse_concern")?,
        },
        intervals,
    })
}

/// Load observations for `sets` and attach them, keeping the order of `sets`
async fn attach_observations(
    conn: &mut PgConnection,
    mut sets: Vec<ObservationSet>,
) -> ObservationsResult<Vec<ObservationSet>> {
    if sets.is_empty() {
        return Ok(sets);
    }

    let uuids: Vec<String> = sets.iter().map(|set| set.uuid.clone()).collect();
    let rows = sqlx::query(OBSERVATION_QUERY)
        .bind(&uuids)
        .fetch_all(&mut *conn)
        .await?;

    let mut by_set: HashMap<String, Vec<Observation>> = HashMap::new();
    for row in &rows {
        let set_uuid: String = row.try_get("observation_set_uuid")?;
        by_set.entry(set_uuid).or_default().push(observation_from_row(row)?);
    }

    for set in &mut sets {
        if let Some(observations) = by_set.remove(&set.uuid) {
            set.observations = observations;
        }
    }
    Ok(sets)
}

async fn insert_observation(
    conn: &mut PgConnection,
    set_uuid: &str,
    observation: &Observation,
) -> ObservationsResult<()> {
    sqlx::query(
        "INSERT INTO observation (uuid, observation_set_uuid, created, created_by, modified, \
         modified_by, observation_type, measured_time, patient_refused, score_value, \
         observation_value, observation_string, observation_unit) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(&observation.uuid)
    .bind(set_uuid)
    .bind(observation.created)
    .bind(&observation.created_by)
    .bind(observation.modified)
    .bind(&observation.modified_by)
    .bind(&observation.observation_type)
    .bind(observation.measured_time)
    .bind(observation.patient_refused)
    .bind(observation.score_value)
    .bind(observation.observation_value)
    .bind(&observation.observation_string)
    .bind(&observation.observation_unit)
    .execute(&mut *conn)
    .await?;

    if let Some(metadata) = &observation.observation_metadata {
        sqlx::query(
            "INSERT INTO observation_metadata (uuid, observation_uuid, created, created_by, \
             modified, modified_by, mask, mask_percent, gcs_eyes, gcs_eyes_description, \
             gcs_verbal, gcs_verbal_description, gcs_motor, gcs_motor_description, \
             patient_position) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(&metadata.uuid)
        .bind(&observation.uuid)
        .bind(observation.created)
        .bind(&observation.created_by)
        .bind(observation.modified)
        .bind(&observation.modified_by)
        .bind(&metadata.mask)
        .bind(metadata.mask_percent)
        .bind(metadata.gcs_eyes)
        .bind(&metadata.gcs_eyes_description)
        .bind(metadata.gcs_verbal)
        .bind(&metadata.gcs_verbal_description)
        .bind(metadata.gcs_motor)
        .bind(&metadata.gcs_motor_description)
        .bind(&metadata.patient_position)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl ObservationStore for PostgresObservationStore {
    async fn insert_observation_set(&self, set: &ObservationSet) -> ObservationsResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO observation_set ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
             $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)",
            SET_COLUMNS
        ))
        .bind(&set.uuid)
        .bind(set.created)
        .bind(&set.created_by)
        .bind(set.modified)
        .bind(&set.modified_by)
        .bind(&set.encounter_id)
        .bind(&set.patient_id)
        .bind(set.record_time)
        .bind(&set.score_system)
        .bind(&set.score_string)
        .bind(set.score_value)
        .bind(&set.score_severity)
        .bind(set.spo2_scale)
        .bind(set.is_partial)
        .bind(set.empty_set)
        .bind(&set.ranking)
        .bind(&set.obx_reference_range)
        .bind(&set.obx_abnormal_flags)
        .bind(set.time_next_obs_set_due)
        .bind(&set.monitoring_instruction)
        .bind(&set.location)
        .bind(set.mins_late)
        .execute(&mut *tx)
        .await?;

        for observation in &set.observations {
            insert_observation(&mut tx, &set.uuid, observation).await?;
        }

        tx.commit().await?;
        debug!(uuid = %set.uuid, observations = set.observations.len(), "observation set stored");
        Ok(())
    }

    async fn get_observation_set(&self, uuid: &str) -> ObservationsResult<Option<ObservationSet>> {
        let sql = format!("SELECT {} FROM observation_set WHERE uuid = $1", SET_COLUMNS);
        let sets = self.fetch_sets(sqlx::query(&sql).bind(uuid)).await?;
        Ok(sets.into_iter().next())
    }

    async fn update_observation_set(
        &self,
        uuid: &str,
        update: &ObservationSetUpdate,
        actor: &str,
        now: DateTime<Utc>,
    ) -> ObservationsResult<Option<ObservationSet>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM observation_set WHERE uuid = $1 FOR UPDATE",
            SET_COLUMNS
        );
        let Some(row) = sqlx::query(&sql).bind(uuid).fetch_optional(&mut *tx).await? else {
            return Ok(None);
        };
        let set = set_from_row(&row)?;
        let mut set = attach_observations(&mut tx, vec![set])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ObservationsError::internal("observation set vanished during update"))?;

        let touched = set.apply_update(update, actor, now)?;

        sqlx::query(
            "UPDATE observation_set SET modified = $2, modified_by = $3, score_value = $4, \
             score_string = $5, score_severity = $6, spo2_scale = $7, is_partial = $8, \
             empty_set = $9, ranking = $10, obx_reference_range = $11, obx_abnormal_flags = $12, \
             time_next_obs_set_due = $13, monitoring_instruction = $14 \
             WHERE uuid = $1",
        )
        .bind(&set.uuid)
        .bind(set.modified)
        .bind(&set.modified_by)
        .bind(set.score_value)
        .bind(&set.score_string)
        .bind(&set.score_severity)
        .bind(set.spo2_scale)
        .bind(set.is_partial)
        .bind(set.empty_set)
        .bind(&set.ranking)
        .bind(&set.obx_reference_range)
        .bind(&set.obx_abnormal_flags)
        .bind(set.time_next_obs_set_due)
        .bind(&set.monitoring_instruction)
        .execute(&mut *tx)
        .await?;

        for observation in set.observations.iter().filter(|obs| touched.contains(&obs.uuid)) {
            sqlx::query(
                "UPDATE observation SET score_value = $2, modified = $3, modified_by = $4 \
                 WHERE uuid = $1",
            )
            .bind(&observation.uuid)
            .bind(observation.score_value)
            .bind(observation.modified)
            .bind(&observation.modified_by)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(set))
    }

    async fn refresh_mins_late(&self, encounter_id: &str) -> ObservationsResult<()> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT uuid, record_time, time_next_obs_set_due, created FROM observation_set \
             WHERE encounter_id = $1 ORDER BY record_time, created FOR UPDATE",
        )
        .bind(encounter_id)
        .fetch_all(&mut *tx)
        .await?;

        let timings = rows
            .iter()
            .map(|row| {
                Ok(SetTiming {
                    uuid: row.try_get("uuid")?,
                    record_time: row.try_get("record_time")?,
                    time_next_obs_set_due: row.try_get("time_next_obs_set_due")?,
                    created: row.try_get("created")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        for (uuid, mins_late) in compute_mins_late(timings) {
            sqlx::query("UPDATE observation_set SET mins_late = $2 WHERE uuid = $1")
                .bind(&uuid)
                .bind(mins_late)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_for_encounters(
        &self,
        encounter_ids: &[String],
        limit: Option<u32>,
    ) -> ObservationsResult<Vec<ObservationSet>> {
        let sql = format!(
            "SELECT {} FROM observation_set WHERE encounter_id = ANY($1) \
             ORDER BY record_time DESC, created DESC LIMIT $2",
            SET_COLUMNS
        );
        self.fetch_sets(
            sqlx::query(&sql)
                .bind(encounter_ids)
                .bind(limit.map(i64::from)),
        )
        .await
    }

    async fn latest_for_encounters(
        &self,
        encounter_ids: &[String],
    ) -> ObservationsResult<HashMap<String, ObservationSet>> {
        let sql = format!(
            "SELECT DISTINCT ON (encounter_id) {} FROM observation_set \
             WHERE encounter_id = ANY($1) \
             ORDER BY encounter_id, created DESC, record_time DESC",
            SET_COLUMNS
        );
        let sets = self.fetch_sets(sqlx::query(&sql).bind(encounter_ids)).await?;
        Ok(sets
            .into_iter()
            .filter_map(|set| set.encounter_id.clone().map(|id| (id, set)))
            .collect())
    }

    async fn count_for_encounters(
        &self,
        encounter_ids: &[String],
    ) -> ObservationsResult<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT encounter_id, COUNT(*) AS total FROM observation_set \
             WHERE encounter_id = ANY($1) GROUP BY encounter_id",
        )
        .bind(encounter_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("encounter_id")?, row.try_get("total")?)))
            .collect::<Result<HashMap<String, i64>, sqlx::Error>>()
            .map_err(Into::into)
    }

    async fn search_by_locations(&self, search: &LocationSearch) -> ObservationsResult<Vec<ObservationSet>> {
        let sql = format!(
            "SELECT {} FROM observation_set \
             WHERE location = ANY($1) AND record_time > $2 AND record_time <= $3 \
             ORDER BY record_time DESC, created DESC LIMIT $4",
            SET_COLUMNS
        );
        self.fetch_sets(
            sqlx::query(&sql)
                .bind(&search.locations)
                .bind(search.start)
                .bind(search.end)
                .bind(search.limit.map(i64::from)),
        )
        .await
    }

    async fn list_for_patient(
        &self,
        patient_id: &str,
        limit: Option<u32>,
    ) -> ObservationsResult<Vec<ObservationSet>> {
        let sql = format!(
            "SELECT {} FROM observation_set WHERE patient_id = $1 \
             ORDER BY record_time DESC, created DESC LIMIT $2",
            SET_COLUMNS
        );
        self.fetch_sets(sqlx::query(&sql).bind(patient_id).bind(limit.map(i64::from)))
            .await
    }

    async fn modified_since(&self, since: DateTime<Utc>) -> ObservationsResult<Vec<ObservationSet>> {
        let sql = format!(
            "SELECT {} FROM observation_set WHERE modified > $1 ORDER BY modified DESC",
            SET_COLUMNS
        );
        self.fetch_sets(sqlx::query(&sql).bind(since)).await
    }

    async fn refresh_aggregates(&self) -> ObservationsResult<()> {
        sqlx::query("REFRESH MATERIALIZED VIEW agg_observation_sets")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn aggregate_rows(&self, filter: &AggregateFilter) -> ObservationsResult<Vec<AggregateRow>> {
        let rows = sqlx::query(
            "SELECT * FROM agg_observation_sets \
             WHERE record_day BETWEEN $1 AND $2 \
             AND ($3::text[] IS NULL OR location_id = ANY($3)) \
             ORDER BY record_day, location_id, score_severity",
        )
        .bind(filter.start)
        .bind(filter.end)
        .bind(&filter.locations)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(aggregate_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn delete_all(&self) -> ObservationsResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM observation_metadata").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM observation").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM observation_set").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> ObservationsResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
