// src/ingest/setup.rs

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::clock::{day_end_utc, Clock, DayRange, TimeResolver};
use crate::config::AppConfig;
use crate::error::Result;
use crate::history::CheckpointStore;
use crate::process::Granularity;
use crate::store::{ensure_header, last_timestamp, AGGREGATE_HEADER, RAW_HEADER};

/// Checkpoint store for `cfg`, falling back to the 1-day series when the
/// checkpoint file is gone.
pub fn checkpoint_store(cfg: &AppConfig) -> CheckpointStore {
    CheckpointStore::new(cfg.storage.checkpoint_path())
        .with_daily_fallback(cfg.storage.aggregate_path(Granularity::Day))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub headers_written: Vec<PathBuf>,
    /// Set when a checkpoint was created; `None` if one already existed.
    pub checkpoint: Option<DateTime<Utc>>,
}

/// Prepare an empty data directory: series headers plus a checkpoint at the
/// end of `since`, so the first run starts the day after. Existing files are
/// left alone.
pub fn initialize(cfg: &AppConfig, since: NaiveDate) -> Result<InitReport> {
    let mut headers_written = Vec::new();

    let raw = cfg.storage.raw_path();
    if ensure_header(&raw, &RAW_HEADER)? {
        headers_written.push(raw);
    }
    for g in cfg.granularities() {
        let path = cfg.storage.aggregate_path(g);
        if ensure_header(&path, &AGGREGATE_HEADER)? {
            headers_written.push(path);
        }
    }

    let store = checkpoint_store(cfg);
    let checkpoint = match store.read_optional()? {
        Some(existing) => {
            info!(checkpoint = %existing, "checkpoint already present, leaving it");
            None
        }
        None => {
            let through = day_end_utc(since);
            store.write(through)?;
            Some(through)
        }
    };

    Ok(InitReport {
        headers_written,
        checkpoint,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub checkpoint: Option<DateTime<Utc>>,
    /// Days the next catch-up run would ingest, if a checkpoint exists.
    pub pending: Option<DayRange>,
    pub raw_tail: Option<DateTime<Utc>>,
    pub aggregate_tails: BTreeMap<Granularity, Option<DateTime<Utc>>>,
}

/// Checkpoint, pending range and last persisted timestamp of every series.
/// Nothing is fetched or written.
pub fn status<C: Clock>(cfg: &AppConfig, resolver: &TimeResolver<C>) -> Result<Status> {
    let checkpoint = checkpoint_store(cfg).read_optional()?;
    let pending = checkpoint.map(|c| resolver.derive_range(c));
    let raw_tail = last_timestamp(&cfg.storage.raw_path())?;
    let mut aggregate_tails = BTreeMap::new();
    for g in cfg.granularities() {
        aggregate_tails.insert(g, last_timestamp(&cfg.storage.aggregate_path(g))?);
    }
    Ok(Status {
        checkpoint,
        pending,
        raw_tail,
        aggregate_tails,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::process::normalize::parse_utc;
    use chrono::TimeZone;
    use chrono_tz::Europe::Madrid;
    use std::fs;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.storage.data_dir = dir.to_path_buf();
        cfg
    }

    #[test]
    fn initialize_writes_headers_and_checkpoint_once() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path());
        let since = NaiveDate::from_ymd_opt(2024, 2, 17).unwrap();

        let report = initialize(&cfg, since).unwrap();
        assert_eq!(report.headers_written.len(), 4);
        assert_eq!(report.checkpoint, Some(parse_utc("2024-02-17 23:59:59").unwrap()));
        assert_eq!(
            fs::read_to_string(cfg.storage.raw_path()).unwrap(),
            "datetime,demanda,programada,prevista\n"
        );
        assert_eq!(
            fs::read_to_string(cfg.storage.aggregate_path(Granularity::Hour)).unwrap(),
            "datetime_UTC,demanda,programada,prevista\n"
        );

        let again = initialize(&cfg, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()).unwrap();
        assert!(again.headers_written.is_empty());
        assert_eq!(again.checkpoint, None);
        assert_eq!(
            checkpoint_store(&cfg).read().unwrap(),
            parse_utc("2024-02-17 23:59:59").unwrap()
        );
    }

    #[test]
    fn status_reports_tails() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path());
        initialize(&cfg, NaiveDate::from_ymd_opt(2024, 2, 17).unwrap()).unwrap();
        fs::write(
            cfg.storage.aggregate_path(Granularity::Day),
            "datetime_UTC,demanda,programada,prevista\n2024-02-17 00:00:00,1,1,1\n",
        )
        .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 2, 20, 9, 0, 0).unwrap();
        let s = status(&cfg, &TimeResolver::new(Madrid, FixedClock(now))).unwrap();
        assert_eq!(s.raw_tail, None);
        assert_eq!(
            s.aggregate_tails[&Granularity::Day],
            Some(parse_utc("2024-02-17 00:00:00").unwrap())
        );
        assert_eq!(s.aggregate_tails[&Granularity::Hour], None);
        assert_eq!(s.checkpoint, Some(parse_utc("2024-02-17 23:59:59").unwrap()));
        assert_eq!(s.pending.map(|r| r.len()), Some(2));
    }
}
