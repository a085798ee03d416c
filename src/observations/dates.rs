//! Parsing of the date and timestamp query parameters.
//!
//! Clients send anything from a plain `2020-01-31` to a full RFC 3339 timestamp. Plain dates
//! are widened to the start or the end of the day, naive timestamps are taken as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::core::error::{ObservationsError, ObservationsResult};

/// Which end of a range a parsed value will be used as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeEdge {
    Start,
    End,
}

/// Parse a timestamp query parameter
pub fn parse_timestamp(field: &str, raw: &str, edge: RangeEdge) -> ObservationsResult<DateTime<Utc>> {
    let value = raw.trim();

    if let Some(parsed) = parse_aware(value) {
        return Ok(parsed);
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(widen(date, edge));
    }

    Err(ObservationsError::invalid_field(
        field,
        format!("'{}' is not a valid date or timestamp", raw),
    ))
}

/// Parse a day query parameter, accepting timestamps by taking their UTC date
pub fn parse_day(field: &str, raw: &str) -> ObservationsResult<NaiveDate> {
    let value = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    parse_timestamp(field, value, RangeEdge::Start).map(|ts| ts.date_naive())
}

/// Parse the bounds of a search range, enforcing `start <= end`
pub fn parse_range(
    start: &str,
    end: &str,
) -> ObservationsResult<(DateTime<Utc>, DateTime<Utc>)> {
    let start = parse_timestamp("start_date", start, RangeEdge::Start)?;
    let end = parse_timestamp("end_date", end, RangeEdge::End)?;
    if start > end {
        return Err(ObservationsError::unprocessable("End date is before Start date"));
    }
    Ok((start, end))
}

fn parse_aware(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    // An unescaped '+' in a query string arrives as a space
    if value.contains(' ') {
        let repaired = value.replacen(' ', "+", 1);
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&repaired) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    None
}

fn widen(date: NaiveDate, edge: RangeEdge) -> DateTime<Utc> {
    let time = match edge {
        RangeEdge::Start => NaiveTime::MIN,
        RangeEdge::End => NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN),
    };
    Utc.from_utc_datetime(&date.and_time(time))
}
