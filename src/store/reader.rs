// src/store/reader.rs

use chrono::{NaiveDate, TimeZone, Utc};
use std::path::Path;

use super::SeriesRecord;
use crate::clock::{day_end, day_start};
use crate::error::{IngestError, Result};
use crate::process::{normalize::parse_utc, AggregateRow};

/// Longest span the dashboard may request, in days.
pub const MAX_QUERY_DAYS: i64 = 92;

/// Aggregate rows whose bucket falls on `from`..=`to` (UTC dates).
/// Header lines and anything without a canonical timestamp are skipped.
pub fn read_aggregates(path: &Path, from: NaiveDate, to: NaiveDate) -> Result<Vec<AggregateRow>> {
    if to < from {
        return Ok(Vec::new());
    }
    let days = (to - from).num_days() + 1;
    if days > MAX_QUERY_DAYS {
        return Err(IngestError::RangeTooLong {
            days,
            limit: MAX_QUERY_DAYS,
        });
    }

    let lo = Utc.from_utc_datetime(&day_start(from));
    let hi = Utc.from_utc_datetime(&day_end(to));
    let read_err = |source: csv::Error| IngestError::ReadFailure {
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(read_err)?;

    let mut out = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(read_err)?;
        let Some(Ok(bucket)) = record.get(0).map(parse_utc) else {
            continue;
        };
        if bucket < lo || bucket > hi {
            continue;
        }
        let row: SeriesRecord = record.deserialize(None).map_err(read_err)?;
        out.push(AggregateRow {
            bucket,
            actual: row.actual,
            planned: row.planned,
            forecast: row.forecast,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::normalize::format_utc;
    use std::fs;
    use tempfile::tempdir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn filters_by_inclusive_date_range() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("agg_10mn.csv");
        fs::write(
            &path,
            "datetime_UTC,demanda,programada,prevista\n\
             2024-02-17 23:50:00,1.0,1.0,1.0\n\
             2024-02-18 00:00:00,2.0,2.5,3.0\n\
             2024-02-19 23:50:00,4.0,4.0,4.0\n\
             2024-02-20 00:00:00,5.0,5.0,5.0\n",
        )
        .unwrap();

        let rows = read_aggregates(&path, date("2024-02-18"), date("2024-02-19")).unwrap();
        let keys: Vec<_> = rows.iter().map(|r| format_utc(&r.bucket)).collect();
        assert_eq!(keys, vec!["2024-02-18 00:00:00", "2024-02-19 23:50:00"]);
        assert_eq!((rows[0].actual, rows[0].planned, rows[0].forecast), (2.0, 2.5, 3.0));
    }

    #[test]
    fn limits_range_to_92_days() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("agg.csv");
        fs::write(&path, "").unwrap();

        assert!(read_aggregates(&path, date("2024-01-01"), date("2024-04-01")).is_ok());
        let err = read_aggregates(&path, date("2024-01-01"), date("2024-04-02")).unwrap_err();
        assert!(matches!(err, IngestError::RangeTooLong { days: 93, limit: 92 }));
    }

    #[test]
    fn inverted_range_is_empty() {
        let rows = read_aggregates(Path::new("/nonexistent"), date("2024-02-19"), date("2024-02-18")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn missing_file_is_a_read_failure() {
        let tmp = tempdir().unwrap();
        let err = read_aggregates(&tmp.path().join("nope.csv"), date("2024-02-18"), date("2024-02-18")).unwrap_err();
        assert!(matches!(err, IngestError::ReadFailure { .. }));
    }
}
