// src/store/mod.rs
pub mod reader;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::{IngestError, Result};
use crate::process::{
    normalize::{format_utc, parse_source_timestamp, parse_utc},
    AggregateRow, Granularity, Observation,
};

pub const RAW_HEADER: [&str; 4] = ["datetime", "demanda", "programada", "prevista"];
pub const AGGREGATE_HEADER: [&str; 4] = ["datetime_UTC", "demanda", "programada", "prevista"];

/// How much of a file's end is read to find its last row.
const TAIL_BYTES: u64 = 4096;

/// On-disk row shape shared by the raw and aggregate series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SeriesRecord {
    pub datetime: String,
    pub actual: f64,
    pub planned: f64,
    pub forecast: f64,
}

impl From<&Observation> for SeriesRecord {
    fn from(o: &Observation) -> Self {
        Self {
            datetime: format_utc(&o.at),
            actual: o.actual,
            planned: o.planned,
            forecast: o.forecast,
        }
    }
}

impl From<&AggregateRow> for SeriesRecord {
    fn from(r: &AggregateRow) -> Self {
        Self {
            datetime: format_utc(&r.bucket),
            actual: r.actual,
            planned: r.planned,
            forecast: r.forecast,
        }
    }
}

fn append_failure(path: &Path, source: io::Error) -> IngestError {
    IngestError::AppendFailure {
        path: path.to_path_buf(),
        source,
    }
}

/// Timestamp in the first field of the file's last non-empty line.
///
/// Accepts both the canonical UTC form and the source form with an offset, so
/// raw files written by older tooling still have a usable tail. A header or
/// unparseable line yields `None`.
pub fn last_timestamp(path: &Path) -> Result<Option<DateTime<Utc>>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(append_failure(path, e)),
    };

    let len = file.metadata().map_err(|e| append_failure(path, e))?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(TAIL_BYTES)))
        .map_err(|e| append_failure(path, e))?;
    let mut buf = Vec::with_capacity(TAIL_BYTES as usize);
    file.read_to_end(&mut buf).map_err(|e| append_failure(path, e))?;

    let text = String::from_utf8_lossy(&buf);
    let Some(line) = text.lines().map(str::trim).rev().find(|l| !l.is_empty()) else {
        return Ok(None);
    };
    let first = line.split(',').next().unwrap_or_default().trim_matches('"');

    Ok(parse_utc(first)
        .or_else(|_| parse_source_timestamp(first))
        .ok())
}

/// Write `header` to `path` if the file does not exist yet. Returns whether it did.
pub fn ensure_header(path: &Path, header: &[&str]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| append_failure(path, e))?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| append_failure(path, e.into()))?;
    wtr.write_record(header).map_err(|e| append_failure(path, e.into()))?;
    wtr.flush().map_err(|e| append_failure(path, e))?;
    Ok(true)
}

/// One append-only CSV series and the newest timestamp already persisted in it.
#[derive(Debug)]
struct SeriesFile {
    path: PathBuf,
    tail: Option<DateTime<Utc>>,
}

impl SeriesFile {
    fn open(path: PathBuf) -> Result<Self> {
        let tail = last_timestamp(&path)?;
        debug!(path = %path.display(), tail = ?tail, "opened series");
        Ok(Self { path, tail })
    }

    /// Append rows strictly newer than the current tail, in one write.
    fn append<I>(&mut self, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = (DateTime<Utc>, SeriesRecord)>,
    {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        let mut tail = self.tail;
        let (mut written, mut skipped) = (0usize, 0usize);

        for (at, record) in rows {
            if tail.is_some_and(|t| at <= t) {
                skipped += 1;
                continue;
            }
            wtr.serialize(&record)
                .map_err(|e| append_failure(&self.path, e.into()))?;
            tail = Some(at);
            written += 1;
        }

        if skipped > 0 {
            warn!(
                path = %self.path.display(),
                skipped,
                tail = ?self.tail,
                "skipped rows at or before the series tail"
            );
        }
        if written == 0 {
            return Ok(0);
        }

        let buf = wtr
            .into_inner()
            .map_err(|e| append_failure(&self.path, e.into_error()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| append_failure(&self.path, e))?;
        file.write_all(&buf)
            .and_then(|_| file.sync_data())
            .map_err(|e| append_failure(&self.path, e))?;

        self.tail = tail;
        Ok(written)
    }
}

/// The raw series plus one aggregate series per granularity.
///
/// Appends never rewrite existing content and never write a row whose
/// timestamp is not after the last one on disk, so re-ingesting a day is a
/// no-op for the rows that already made it.
pub struct AppendStore {
    raw: SeriesFile,
    aggregates: BTreeMap<Granularity, SeriesFile>,
}

impl AppendStore {
    pub fn open(cfg: &StorageConfig, granularities: &[Granularity]) -> Result<Self> {
        fs::create_dir_all(&cfg.data_dir).map_err(|e| append_failure(&cfg.data_dir, e))?;

        let raw = SeriesFile::open(cfg.raw_path())?;
        let mut aggregates = BTreeMap::new();
        for &g in granularities {
            aggregates.insert(g, SeriesFile::open(cfg.aggregate_path(g))?);
        }

        Ok(Self { raw, aggregates })
    }

    /// Fields: timestamp, actual, planned, forecast.
    pub fn append_raw(&mut self, observations: &[Observation]) -> Result<usize> {
        self.raw
            .append(observations.iter().map(|o| (o.at, SeriesRecord::from(o))))
    }

    /// Fields: bucket_timestamp, actual_mean, planned_mean, forecast_mean.
    pub fn append_aggregate(&mut self, granularity: Granularity, rows: &[AggregateRow]) -> Result<usize> {
        let series = self.aggregates.get_mut(&granularity).ok_or_else(|| {
            IngestError::Config(format!("granularity {granularity} is not configured"))
        })?;
        series.append(rows.iter().map(|r| (r.bucket, SeriesRecord::from(r))))
    }

    pub fn raw_tail(&self) -> Option<DateTime<Utc>> {
        self.raw.tail
    }

    pub fn aggregate_tail(&self, granularity: Granularity) -> Option<DateTime<Utc>> {
        self.aggregates.get(&granularity).and_then(|s| s.tail)
    }

    pub fn granularities(&self) -> impl Iterator<Item = Granularity> + '_ {
        self.aggregates.keys().copied()
    }
}
