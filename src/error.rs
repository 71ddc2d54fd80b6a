// src/error.rs

use chrono::{DateTime, NaiveDate, Utc};
use std::{fmt, path::PathBuf};

/// Where in the per-day pipeline a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetching,
    Normalizing,
    Aggregating,
    Appending,
    Checkpointing,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Normalizing => "normalizing",
            Stage::Aggregating => "aggregating",
            Stage::Appending => "appending",
            Stage::Checkpointing => "checkpointing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// Network error, timeout or non-success HTTP status.
    #[error("fetch failed for {day}: {reason}")]
    FetchFailure { day: NaiveDate, reason: String },

    /// The actual/planned/forecast series do not line up.
    #[error("demand series mismatch for {day}: {reason}")]
    FetchMismatch { day: NaiveDate, reason: String },

    #[error("malformed payload for {day}: {reason}")]
    MalformedPayload { day: NaiveDate, reason: String },

    #[error("cannot normalize timestamp '{value}': {reason}")]
    NormalizationFailure { value: String, reason: String },

    #[error("append to {} failed: {source}", path.display())]
    AppendFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading {} failed: {source}", path.display())]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(
        "no checkpoint at {} and no daily aggregate to derive one from; run `reescraper init <YYYY-MM-DD>`",
        path.display()
    )]
    CheckpointMissing { path: PathBuf },

    #[error("checkpoint {} is unreadable: {reason}", path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("checkpoint I/O on {} failed: {source}", path.display())]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint cannot move backward from {current} to {proposed}")]
    CheckpointRegression {
        current: DateTime<Utc>,
        proposed: DateTime<Utc>,
    },

    #[error("requested range spans {days} days, the limit is {limit}")]
    RangeTooLong { days: i64, limit: i64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("day {day} failed while {stage}: {source}")]
    Day {
        day: NaiveDate,
        stage: Stage,
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    /// Attach the failing day and stage, unless already attached.
    pub fn at(self, day: NaiveDate, stage: Stage) -> Self {
        match self {
            e @ IngestError::Day { .. } => e,
            other => IngestError::Day {
                day,
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            IngestError::Day { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
