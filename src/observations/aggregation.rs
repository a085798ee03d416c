//! # Aggregation Reports
//!
//! Observation sets are rolled up into one [`AggregateRow`] per
//! `(record day, location, score severity)`. The PostgreSQL store keeps these rows in a
//! materialized view, the in-memory store builds them with [`summarise`]. Every report
//! endpoint is a pure fold over those rows.
//!
//! ## Reports
//! - on-time stats: on time vs late counts, by risk, by location and by day
//! - missing stats: how many sets lacked each core observation type
//! - on-time intervals: distribution of lateness in 15 minute buckets by risk
//! - monthly: counts per `YYYY-MM`, optionally per location
//!
//! Rows without a location count towards totals only.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::observations::model::{ObservationSet, NURSE_CONCERN};

/// How many sets in a group contained each tracked observation type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationPresence {
    pub o2_therapy_status: i64,
    pub heart_rate: i64,
    pub spo2: i64,
    pub temperature: i64,
    pub diastolic_blood_pressure: i64,
    pub respiratory_rate: i64,
    pub consciousness_acvpu: i64,
    pub systolic_blood_pressure: i64,
    pub nurse_concern: i64,
}

impl ObservationPresence {
    pub fn record(&mut self, observation_type: &str) {
        if let Some(slot) = self.slot_mut(observation_type) {
            *slot += 1;
        }
    }

    fn slot_mut(&mut self, observation_type: &str) -> Option<&mut i64> {
        match observation_type {
            "o2_therapy_status" => Some(&mut self.o2_therapy_status),
            "heart_rate" => Some(&mut self.heart_rate),
            "spo2" => Some(&mut self.spo2),
            "temperature" => Some(&mut self.temperature),
            "diastolic_blood_pressure" => Some(&mut self.diastolic_blood_pressure),
            "respiratory_rate" => Some(&mut self.respiratory_rate),
            "consciousness_acvpu" => Some(&mut self.consciousness_acvpu),
            "systolic_blood_pressure" => Some(&mut self.systolic_blood_pressure),
            NURSE_CONCERN => Some(&mut self.nurse_concern),
            _ => None,
        }
    }
}

/// Lateness distribution in 15 minute buckets, from an hour early to three hours late
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalBuckets {
    pub minus60: i64,
    pub minus45_59: i64,
    pub minus30_44: i64,
    pub minus15_29: i64,
    pub minus0_14: i64,
    pub plus1_15: i64,
    pub plus16_30: i64,
    pub plus31_45: i64,
    pub plus46_60: i64,
    pub plus61_75: i64,
    pub plus76_90: i64,
    pub plus91_105: i64,
    pub plus106_120: i64,
    pub plus121_135: i64,
    pub plus136_150: i64,
    pub plus151_165: i64,
    pub plus166_180: i64,
    pub plus180: i64,
}

impl IntervalBuckets {
    /// Column names in bucket order, shared with the SQL view
    pub const COLUMNS: [&'static str; 18] = [
        "minus60",
        "minus45_59",
        "minus30_44",
        "minus15_29",
        "minus0_14",
        "plus1_15",
        "plus16_30",
        "plus31_45",
        "plus46_60",
        "plus61_75",
        "plus76_90",
        "plus91_105",
        "plus106_120",
        "plus121_135",
        "plus136_150",
        "plus151_165",
        "plus166_180",
        "plus180",
    ];

    /// Index into [`Self::COLUMNS`] for a lateness value
    pub fn bucket_index(mins_late: i32) -> usize {
        if mins_late <= -60 {
            0
        } else if mins_late <= 0 {
            // (-60, -45] -> 1 ... (-15, 0] -> 4
            (4 - ((-mins_late) / 15).min(3)) as usize
        } else if mins_late > 180 {
            17
        } else {
            // (0, 15] -> 5 ... (165, 180] -> 16
            5 + ((mins_late - 1) / 15) as usize
        }
    }

    pub fn record(&mut self, mins_late: i32) {
        *self.slot_mut(Self::bucket_index(mins_late)) += 1;
    }

    pub fn set(&mut self, index: usize, count: i64) {
        *self.slot_mut(index) = count;
    }

    pub fn total(&self) -> i64 {
        self.as_array().iter().sum()
    }

    fn as_array(&self) -> [i64; 18] {
        [
            self.minus60,
            self.minus45_59,
            self.minus30_44,
            self.minus15_29,
            self.minus0_14,
            self.plus1_15,
            self.plus16_30,
            self.plus31_45,
            self.plus46_60,
            self.plus61_75,
            self.plus76_90,
            self.plus91_105,
            self.plus106_120,
            self.plus121_135,
            self.plus136_150,
            self.plus151_165,
            self.plus166_180,
            self.plus180,
        ]
    }

    fn slot_mut(&mut self, index: usize) -> &mut i64 {
        match index {
            0 => &mut self.minus60,
            1 => &mut self.minus45_59,
            2 => &mut self.minus30_44,
            3 => &mut self.minus15_29,
            4 => &mut self.minus0_14,
            5 => &mut self.plus1_15,
            6 => &mut self.plus16_30,
            7 => &mut self.plus31_45,
            8 => &mut self.plus46_60,
            9 => &mut self.plus61_75,
            10 => &mut self.plus76_90,
            11 => &mut self.plus91_105,
            12 => &mut self.plus106_120,
            13 => &mut self.plus121_135,
            14 => &mut self.plus136_150,
            15 => &mut self.plus151_165,
            16 => &mut self.plus166_180,
            _ => &mut self.plus180,
        }
    }

    fn add(&mut self, other: &Self) {
        for (index, count) in other.as_array().iter().enumerate() {
            *self.slot_mut(index) += count;
        }
    }
}

/// Daily roll-up of observation sets for one location and severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub record_day: NaiveDate,
    pub location_id: Option<String>,
    pub score_severity: Option<String>,
    pub all_obs_sets: i64,
    /// Sets with `mins_late > 0`
    pub late_obs_sets: i64,
    /// Partial sets
    pub missing_obs: i64,
    pub presence: ObservationPresence,
    pub intervals: IntervalBuckets,
}

impl AggregateRow {
    fn empty(record_day: NaiveDate, location_id: Option<String>, score_severity: Option<String>) -> Self {
        Self {
            record_day,
            location_id,
            score_severity,
            all_obs_sets: 0,
            late_obs_sets: 0,
            missing_obs: 0,
            presence: ObservationPresence::default(),
            intervals: IntervalBuckets::default(),
        }
    }

    fn on_time_obs_sets(&self) -> i64 {
        self.all_obs_sets - self.late_obs_sets
    }
}

/// Roll observation sets up into daily rows, ordered by day, location and severity
pub fn summarise<'a, I>(sets: I) -> Vec<AggregateRow>
where
    I: IntoIterator<Item = &'a ObservationSet>,
{
    let mut groups: BTreeMap<(NaiveDate, Option<String>, Option<String>), AggregateRow> =
        BTreeMap::new();

    for set in sets {
        let key = (
            set.record_time.date_naive(),
            set.location.clone(),
            set.score_severity.clone(),
        );
        let row = groups
            .entry(key)
            .or_insert_with_key(|(day, location, severity)| {
                AggregateRow::empty(*day, location.clone(), severity.clone())
            });

        row.all_obs_sets += 1;
        if set.mins_late.map_or(false, |late| late > 0) {
            row.late_obs_sets += 1;
        }
        if set.is_partial == Some(true) {
            row.missing_obs += 1;
        }
        for observation_type in set.observation_types() {
            row.presence.record(observation_type);
        }
        if let Some(mins_late) = set.mins_late {
            row.intervals.record(mins_late);
        }
    }

    groups.into_values().collect()
}

/// Report key for a severity; sets without one are grouped under `unknown`
pub fn severity_key(severity: Option<&str>) -> String {
    severity.unwrap_or("unknown").to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnTimeCounts {
    pub on_time: i64,
    pub late: i64,
}

impl OnTimeCounts {
    fn add_row(&mut self, row: &AggregateRow) {
        self.on_time += row.on_time_obs_sets();
        self.late += row.late_obs_sets;
    }
}

/// On time / late counters broken down by risk
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OnTimeByRisk {
    pub on_time: i64,
    pub late: i64,
    pub risk: BTreeMap<String, OnTimeCounts>,
}

impl OnTimeByRisk {
    fn add_row(&mut self, row: &AggregateRow) {
        self.on_time += row.on_time_obs_sets();
        self.late += row.late_obs_sets;
        self.risk
            .entry(severity_key(row.score_severity.as_deref()))
            .or_default()
            .add_row(row);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationOnTime {
    #[serde(flatten)]
    pub counts: OnTimeByRisk,
    /// Keyed by `YYYY-MM-DD`
    pub date: BTreeMap<String, OnTimeByRisk>,
}

/// Totals at the top level, one entry per location alongside them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OnTimeReport {
    #[serde(flatten)]
    pub totals: OnTimeByRisk,
    #[serde(flatten)]
    pub locations: BTreeMap<String, LocationOnTime>,
}

pub fn on_time_report(rows: &[AggregateRow]) -> OnTimeReport {
    let mut report = OnTimeReport::default();
    for row in rows {
        report.totals.add_row(row);
        if let Some(location) = &row.location_id {
            let entry = report.locations.entry(location.clone()).or_default();
            entry.counts.add_row(row);
            entry
                .date
                .entry(row.record_day.format("%Y-%m-%d").to_string())
                .or_default()
                .add_row(row);
        }
    }
    report
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingCounts {
    pub total_obs_sets: i64,
    pub num_obs_missing: i64,
    pub o2_therapy_status_missing: i64,
    pub heart_rate_missing: i64,
    pub spo2_missing: i64,
    pub temperature_missing: i64,
    pub diastolic_blood_pressure_missing: i64,
    pub respiratory_rate_missing: i64,
    pub consciousness_acvpu_missing: i64,
    pub systolic_blood_pressure_missing: i64,
}

impl MissingCounts {
    fn add_row(&mut self, row: &AggregateRow) {
        let all = row.all_obs_sets;
        let present = &row.presence;
        self.total_obs_sets += all;
        self.num_obs_missing += row.missing_obs;
        self.o2_therapy_status_missing += all - present.o2_therapy_status;
        self.heart_rate_missing += all - present.heart_rate;
        self.spo2_missing += all - present.spo2;
        self.temperature_missing += all - present.temperature;
        self.diastolic_blood_pressure_missing += all - present.diastolic_blood_pressure;
        self.respiratory_rate_missing += all - present.respiratory_rate;
        self.consciousness_acvpu_missing += all - present.consciousness_acvpu;
        self.systolic_blood_pressure_missing += all - present.systolic_blood_pressure;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissingReport {
    #[serde(flatten)]
    pub totals: MissingCounts,
    #[serde(flatten)]
    pub locations: BTreeMap<String, MissingCounts>,
}

pub fn missing_report(rows: &[AggregateRow]) -> MissingReport {
    let mut report = MissingReport::default();
    for row in rows {
        report.totals.add_row(row);
        if let Some(location) = &row.location_id {
            report.locations.entry(location.clone()).or_default().add_row(row);
        }
    }
    report
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntervalsByRisk {
    pub risk: BTreeMap<String, IntervalBuckets>,
}

impl IntervalsByRisk {
    fn add_row(&mut self, row: &AggregateRow) {
        self.risk
            .entry(severity_key(row.score_severity.as_deref()))
            .or_default()
            .add(&row.intervals);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntervalReport {
    #[serde(flatten)]
    pub totals: IntervalsByRisk,
    #[serde(flatten)]
    pub locations: BTreeMap<String, IntervalsByRisk>,
}

pub fn interval_report(rows: &[AggregateRow]) -> IntervalReport {
    let mut report = IntervalReport::default();
    for row in rows {
        report.totals.add_row(row);
        if let Some(location) = &row.location_id {
            report.locations.entry(location.clone()).or_default().add_row(row);
        }
    }
    report
}

/// Counters for one month; per-type fields count the sets that lacked that type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyStats {
    pub all_obs_sets: i64,
    pub on_time: i64,
    pub low: i64,
    pub low_medium: i64,
    pub medium: i64,
    pub high: i64,
    pub missing_obs: i64,
    pub o2_therapy_status: i64,
    pub heart_rate: i64,
    pub spo2: i64,
    pub temperature: i64,
    pub diastolic_blood_pressure: i64,
    pub respiratory_rate: i64,
    pub consciousness_acvpu: i64,
    pub systolic_blood_pressure: i64,
    pub nurse_concern: i64,
}

impl MonthlyStats {
    fn add_row(&mut self, row: &AggregateRow) {
        let all = row.all_obs_sets;
        self.all_obs_sets += all;
        self.on_time += row.on_time_obs_sets();
        self.missing_obs += row.missing_obs;

        let severity = row.score_severity.as_deref().map(str::to_ascii_lowercase);
        match severity.as_deref() {
            Some("low") => self.low += all,
            Some("low-medium") | Some("low_medium") => self.low_medium += all,
            Some("medium") => self.medium += all,
            Some("high") => self.high += all,
            _ => {}
        }

        let present = &row.presence;
        self.o2_therapy_status += all - present.o2_therapy_status;
        self.heart_rate += all - present.heart_rate;
        self.spo2 += all - present.spo2;
        self.temperature += all - present.temperature;
        self.diastolic_blood_pressure += all - present.diastolic_blood_pressure;
        self.respiratory_rate += all - present.respiratory_rate;
        self.consciousness_acvpu += all - present.consciousness_acvpu;
        self.systolic_blood_pressure += all - present.systolic_blood_pressure;
        self.nurse_concern += all - present.nurse_concern;
    }
}

fn year_month(day: NaiveDate) -> String {
    day.format("%Y-%m").to_string()
}

/// `YYYY-MM` to counters
pub fn monthly_report(rows: &[AggregateRow]) -> BTreeMap<String, MonthlyStats> {
    let mut report: BTreeMap<String, MonthlyStats> = BTreeMap::new();
    for row in rows {
        report.entry(year_month(row.record_day)).or_default().add_row(row);
    }
    report
}

/// Location to `YYYY-MM` to counters
pub fn monthly_by_location_report(
    rows: &[AggregateRow],
) -> BTreeMap<String, BTreeMap<String, MonthlyStats>> {
    let mut report: BTreeMap<String, BTreeMap<String, MonthlyStats>> = BTreeMap::new();
    for row in rows {
        if let Some(location) = &row.location_id {
            report
                .entry(location.clone())
                .or_default()
                .entry(year_month(row.record_day))
                .or_default()
                .add_row(row);
        }
    }
    report
}
