//! Lateness of observation sets within an encounter.
//!
//! Each set records when the next one is due. A set's `mins_late` is how far its
//! `record_time` lies past the due time announced by the set recorded before it.

use chrono::{DateTime, Utc};

/// The columns needed to compute lateness for one set
#[derive(Debug, Clone, PartialEq)]
pub struct SetTiming {
    pub uuid: String,
    pub record_time: DateTime<Utc>,
    pub time_next_obs_set_due: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

/// Compute `(uuid, mins_late)` for every set of one encounter.
///
/// The first set by record time is never late. A set following one with no due time is
/// also never late. Early sets get negative values.
pub fn compute_mins_late(mut timings: Vec<SetTiming>) -> Vec<(String, i32)> {
    timings.sort_by(|a, b| {
        a.record_time
            .cmp(&b.record_time)
            .then_with(|| a.created.cmp(&b.created))
    });

    let mut result = Vec::with_capacity(timings.len());
    let mut previous_due: Option<Option<DateTime<Utc>>> = None;

    for timing in timings {
        let mins_late = match previous_due {
            Some(Some(due)) => minutes_between(due, timing.record_time),
            _ => 0,
        };
        previous_due = Some(timing.time_next_obs_set_due);
        result.push((timing.uuid, mins_late));
    }

    result
}

fn minutes_between(due: DateTime<Utc>, recorded: DateTime<Utc>) -> i32 {
    let seconds = (recorded - due).num_milliseconds() as f64 / 1000.0;
    (seconds / 60.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, hour, minute, 0).unwrap()
    }

    fn timing(uuid: &str, record: DateTime<Utc>, due: Option<DateTime<Utc>>) -> SetTiming {
        SetTiming {
            uuid: uuid.to_string(),
            record_time: record,
            time_next_obs_set_due: due,
            created: record,
        }
    }

    #[test]
    fn test_single_late_set() {
        let result = compute_mins_late(vec![
            timing("first", at(9, 10), Some(at(10, 0))),
            timing("second", at(11, 20), None),
        ]);
        assert_eq!(
            result,
            vec![("first".to_string(), 0), ("second".to_string(), 80)]
        );
    }

    #[test]
    fn test_hourly_sets_due_every_two_hours_are_early() {
        let timings: Vec<SetTiming> = (0..10)
            .map(|i| {
                let record = at(11, 0) + Duration::hours(i);
                timing(&format!("set-{}", i), record, Some(record + Duration::hours(2)))
            })
            .collect();

        let minutes: Vec<i32> = compute_mins_late(timings).into_iter().map(|(_, m)| m).collect();
        let mut expected = vec![-60; 10];
        expected[0] = 0;
        assert_eq!(minutes, expected);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let result = compute_mins_late(vec![
            timing("second", at(11, 20), None),
            timing("first", at(9, 10), Some(at(10, 0))),
        ]);
        assert_eq!(result[0].0, "first");
        assert_eq!(result[1], ("second".to_string(), 80));
    }

    #[test]
    fn test_missing_due_time_resets_lateness() {
        let result = compute_mins_late(vec![
            timing("a", at(8, 0), None),
            timing("b", at(12, 0), Some(at(13, 0))),
            timing("c", at(14, 0), None),
        ]);
        let minutes: Vec<i32> = result.into_iter().map(|(_, m)| m).collect();
        assert_eq!(minutes, vec![0, 0, 60]);
    }

    #[test]
    fn test_lateness_spanning_days_counts_whole_duration() {
        let due = at(10, 0);
        let record = due + Duration::days(1) + Duration::minutes(5);
        let result = compute_mins_late(vec![
            timing("a", at(9, 0), Some(due)),
            timing("b", record, None),
        ]);
        assert_eq!(result[1].1, 24 * 60 + 5);
    }
}
