// src/process/normalize.rs

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};

use crate::error::{IngestError, Result};
use crate::fetch::DayFetch;
use crate::process::Observation;

/// Canonical on-disk timestamp: UTC, whole seconds, no offset. Always 19 chars.
pub const UTC_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a source timestamp such as `"2024-02-19T03:00:00.000+01:00"` into a
/// UTC instant truncated to whole seconds.
pub fn parse_source_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).map_err(|e| {
        IngestError::NormalizationFailure {
            value: raw.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(parsed.with_timezone(&Utc).trunc_subsecs(0))
}

/// Parse a canonical `YYYY-MM-DD HH:MM:SS` UTC string.
pub fn parse_utc(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), UTC_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| IngestError::NormalizationFailure {
            value: s.to_string(),
            reason: e.to_string(),
        })
}

pub fn format_utc(at: &DateTime<Utc>) -> String {
    at.format(UTC_FORMAT).to_string()
}

/// Source timestamp → canonical UTC string.
pub fn normalize(raw: &str) -> Result<String> {
    parse_source_timestamp(raw).map(|at| format_utc(&at))
}

/// Zip the three fetched series into observations, checking that every index
/// of the three series refers to the same instant.
pub fn normalize_day(fetch: &DayFetch) -> Result<Vec<Observation>> {
    let mut out = Vec::with_capacity(fetch.actual.len());

    for (idx, ((actual, planned), forecast)) in fetch
        .actual
        .iter()
        .zip(&fetch.planned)
        .zip(&fetch.forecast)
        .enumerate()
    {
        let at = parse_source_timestamp(&actual.datetime)?;
        for (name, other) in [("planned", planned), ("forecast", forecast)] {
            if parse_source_timestamp(&other.datetime)? != at {
                return Err(IngestError::FetchMismatch {
                    day: fetch.day,
                    reason: format!(
                        "index {idx}: actual at '{}' but {name} at '{}'",
                        actual.datetime, other.datetime
                    ),
                });
            }
        }

        out.push(Observation {
            at,
            actual: actual.value,
            planned: planned.value,
            forecast: forecast.value,
        });
    }

    Ok(out)
}
