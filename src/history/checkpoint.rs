// src/history/checkpoint.rs

use chrono::{DateTime, Duration, Utc};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::PathBuf,
};
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::process::normalize::{format_utc, parse_utc};
use crate::store::last_timestamp;

/// The instant through which data has been ingested, kept as one line
/// `YYYY-MM-DD HH:MM:SS` (UTC) in a small file.
///
/// Writes go to `<file>.tmp` and are renamed into place, and the value never
/// moves backward.
pub struct CheckpointStore {
    path: PathBuf,
    daily_fallback: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            daily_fallback: None,
        }
    }

    /// When the checkpoint file is absent, derive the checkpoint from the last
    /// bucket of the 1-day aggregate series at `path`.
    pub fn with_daily_fallback(mut self, path: impl Into<PathBuf>) -> Self {
        self.daily_fallback = Some(path.into());
        self
    }

    /// Current checkpoint, or `None` if neither the file nor a fallback exist.
    pub fn read_optional(&self) -> Result<Option<DateTime<Utc>>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let line = contents.lines().next().unwrap_or_default();
                parse_utc(line)
                    .map(Some)
                    .map_err(|e| IngestError::CheckpointCorrupt {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.read_fallback(),
            Err(e) => Err(IngestError::CheckpointIo {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    pub fn read(&self) -> Result<DateTime<Utc>> {
        self.read_optional()?
            .ok_or_else(|| IngestError::CheckpointMissing {
                path: self.path.clone(),
            })
    }

    fn read_fallback(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(daily) = &self.daily_fallback else {
            return Ok(None);
        };
        let through = last_timestamp(daily)?.map(|bucket| bucket + Duration::seconds(86_399));
        if let Some(t) = through {
            info!(from = %daily.display(), checkpoint = %format_utc(&t), "checkpoint derived from daily aggregate");
        }
        Ok(through)
    }

    /// Persist `through`. Rewriting the current value is allowed, going back is not.
    pub fn write(&self, through: DateTime<Utc>) -> Result<()> {
        if let Some(current) = self.read_optional()? {
            if through < current {
                return Err(IngestError::CheckpointRegression {
                    current,
                    proposed: through,
                });
            }
        }

        let io_err = |source: io::Error| IngestError::CheckpointIo {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(io_err)?;
        writeln!(file, "{}", format_utc(&through)).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), checkpoint = %format_utc(&through), "checkpoint written");
        Ok(())
    }
}
