// src/process/aggregate.rs

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::error::IngestError;
use crate::process::Observation;

/// Bucket width of an aggregate series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum Granularity {
    #[serde(rename = "10mn")]
    TenMinutes,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "1d")]
    Day,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::TenMinutes, Granularity::Hour, Granularity::Day];

    /// Short name, also used in the aggregate file names.
    pub fn name(&self) -> &'static str {
        match self {
            Granularity::TenMinutes => "10mn",
            Granularity::Hour => "1h",
            Granularity::Day => "1d",
        }
    }

    pub fn width_secs(&self) -> i64 {
        match self {
            Granularity::TenMinutes => 600,
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
        }
    }

    /// Length of the canonical timestamp prefix that identifies a bucket.
    pub fn key_len(&self) -> usize {
        match self {
            Granularity::TenMinutes => 15,
            Granularity::Hour => 13,
            Granularity::Day => 10,
        }
    }

    /// What the truncated prefix is padded with to restore `YYYY-MM-DD HH:MM:SS`.
    pub fn key_suffix(&self) -> &'static str {
        &" 00:00:00"[self.key_len() - 10..]
    }

    /// Floor `at` to the start of its bucket.
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let at = at.trunc_subsecs(0);
        at - Duration::seconds(at.timestamp().rem_euclid(self.width_secs()))
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Granularity {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Granularity::ALL
            .into_iter()
            .find(|g| g.name() == s.trim())
            .ok_or_else(|| IngestError::Config(format!("unknown granularity '{s}' (10mn, 1h, 1d)")))
    }
}

/// Mean of each demand series over one bucket.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AggregateRow {
    pub bucket: DateTime<Utc>,
    pub actual: f64,
    pub planned: f64,
    pub forecast: f64,
}

#[derive(Default)]
struct Accumulator {
    n: usize,
    actual: f64,
    planned: f64,
    forecast: f64,
}

impl Accumulator {
    fn push(&mut self, obs: &Observation) {
        self.n += 1;
        self.actual += obs.actual;
        self.planned += obs.planned;
        self.forecast += obs.forecast;
    }

    fn finish(self, bucket: DateTime<Utc>) -> AggregateRow {
        let n = self.n as f64;
        AggregateRow {
            bucket,
            actual: self.actual / n,
            planned: self.planned / n,
            forecast: self.forecast / n,
        }
    }
}

/// Group observations into `granularity` buckets and average each series.
/// Rows come out in strictly increasing bucket order, one per bucket.
pub fn aggregate(observations: &[Observation], granularity: Granularity) -> Vec<AggregateRow> {
    let mut buckets: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();
    for obs in observations {
        buckets
            .entry(granularity.bucket_start(obs.at))
            .or_default()
            .push(obs);
    }

    buckets
        .into_iter()
        .map(|(bucket, acc)| acc.finish(bucket))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::normalize::{format_utc, parse_source_timestamp, parse_utc};

    fn obs(at: &str, actual: f64, planned: f64, forecast: f64) -> Observation {
        Observation {
            at: parse_utc(at).unwrap(),
            actual,
            planned,
            forecast,
        }
    }

    #[test]
    fn hourly_key_from_source_timestamp() {
        let at = parse_source_timestamp("2024-02-19T03:00:00.000+01:00").unwrap();
        let canonical = format_utc(&at);
        assert_eq!(&canonical[..Granularity::Hour.key_len()], "2024-02-19 02");
        assert_eq!(format_utc(&Granularity::Hour.bucket_start(at)), "2024-02-19 02:00:00");
    }

    #[test]
    fn suffixes_restore_full_timestamp() {
        assert_eq!(Granularity::TenMinutes.key_suffix(), "0:00");
        assert_eq!(Granularity::Hour.key_suffix(), ":00:00");
        assert_eq!(Granularity::Day.key_suffix(), " 00:00:00");
    }

    #[test]
    fn floor_matches_string_truncation() {
        let samples = [
            "2024-02-19 02:00:00",
            "2024-02-19 02:09:59",
            "2024-02-19 02:10:00",
            "2024-02-19 23:59:59",
            "2024-02-29 13:47:12",
            "1969-12-31 23:55:01",
        ];
        for s in samples {
            let at = parse_utc(s).unwrap();
            for g in Granularity::ALL {
                let repadded = format!("{}{}", &s[..g.key_len()], g.key_suffix());
                assert_eq!(format_utc(&g.bucket_start(at)), repadded, "{s} at {g}");
                // The re-padded key lies inside the bucket span.
                let start = g.bucket_start(at);
                assert!(start <= at && at < start + Duration::seconds(g.width_secs()));
            }
        }
    }

    #[test]
    fn daily_mean_of_three() {
        let rows = aggregate(
            &[
                obs("2024-02-19 01:00:00", 100.0, 1.0, 10.0),
                obs("2024-02-19 12:00:00", 200.0, 2.0, 20.0),
                obs("2024-02-19 23:00:00", 300.0, 6.0, 60.0),
            ],
            Granularity::Day,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(format_utc(&rows[0].bucket), "2024-02-19 00:00:00");
        assert_eq!(rows[0].actual, 200.0);
        assert_eq!(rows[0].planned, 3.0);
        assert_eq!(rows[0].forecast, 30.0);
    }

    #[test]
    fn single_observation_passes_through() {
        let o = obs("2024-02-19 02:10:00", 25_123.4, 24_999.9, 25_050.1);
        let rows = aggregate(&[o], Granularity::TenMinutes);
        assert_eq!(rows.len(), 1);
        assert_eq!(format_utc(&rows[0].bucket), "2024-02-19 02:10:00");
        assert_eq!(
            (rows[0].actual, rows[0].planned, rows[0].forecast),
            (o.actual, o.planned, o.forecast)
        );
    }

    #[test]
    fn keys_strictly_increase_regardless_of_input_order() {
        let input = [
            obs("2024-02-19 03:20:00", 4.0, 0.0, 0.0),
            obs("2024-02-19 01:00:00", 1.0, 0.0, 0.0),
            obs("2024-02-19 03:00:00", 3.0, 0.0, 0.0),
            obs("2024-02-19 01:30:00", 2.0, 0.0, 0.0),
            obs("2024-02-19 02:50:00", 5.0, 0.0, 0.0),
        ];
        for g in Granularity::ALL {
            let rows = aggregate(&input, g);
            assert!(rows.windows(2).all(|w| w[0].bucket < w[1].bucket), "{g}");
        }

        let hourly = aggregate(&input, Granularity::Hour);
        let keys: Vec<_> = hourly.iter().map(|r| format_utc(&r.bucket)).collect();
        assert_eq!(
            keys,
            vec!["2024-02-19 01:00:00", "2024-02-19 02:00:00", "2024-02-19 03:00:00"]
        );
        assert_eq!(hourly[0].actual, 1.5);
        assert_eq!(hourly[2].actual, 3.5);
    }

    #[test]
    fn empty_input_yields_no_rows() {
        assert!(aggregate(&[], Granularity::Hour).is_empty());
    }

    #[test]
    fn granularity_names_parse() {
        assert_eq!("10mn".parse::<Granularity>().unwrap(), Granularity::TenMinutes);
        assert_eq!("1d".parse::<Granularity>().unwrap(), Granularity::Day);
        assert!("5mn".parse::<Granularity>().is_err());
    }
}
