// src/ingest/mod.rs
pub mod setup;

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::{debug, error, info, info_span, Instrument};

use crate::clock::{day_end_utc, Clock, DayRange, SystemClock, TimeResolver};
use crate::config::CheckpointPolicy;
use crate::error::{IngestError, Result, Stage};
use crate::fetch::DemandSource;
use crate::history::CheckpointStore;
use crate::process::{aggregate, normalize::format_utc, normalize_day, Granularity};
use crate::store::AppendStore;

/// What one day contributed to the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DayReport {
    pub day: NaiveDate,
    pub samples: usize,
    pub raw_rows: usize,
    pub aggregate_rows: BTreeMap<Granularity, usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub days: Vec<DayReport>,
    pub checkpoint: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing between the checkpoint and yesterday; nothing was touched.
    UpToDate { checkpoint: DateTime<Utc> },
    Completed(RunSummary),
}

/// Drives fetch → normalize → aggregate → append for each pending day, then
/// advances the checkpoint.
///
/// Not safe to run concurrently with another `Ingestor` on the same files;
/// callers serialize runs externally.
pub struct Ingestor<S, C = SystemClock> {
    source: S,
    resolver: TimeResolver<C>,
    store: AppendStore,
    checkpoints: CheckpointStore,
    policy: CheckpointPolicy,
}

impl<S: DemandSource, C: Clock> Ingestor<S, C> {
    pub fn new(
        source: S,
        resolver: TimeResolver<C>,
        store: AppendStore,
        checkpoints: CheckpointStore,
        policy: CheckpointPolicy,
    ) -> Self {
        Self {
            source,
            resolver,
            store,
            checkpoints,
            policy,
        }
    }

    /// Current checkpoint and the days still to ingest.
    pub fn pending(&self) -> Result<(DateTime<Utc>, DayRange)> {
        let checkpoint = self.checkpoints.read()?;
        Ok((checkpoint, self.resolver.derive_range(checkpoint)))
    }

    /// Catch up from the checkpoint through yesterday.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let (checkpoint, range) = self.pending()?;
        if range.is_empty() {
            info!(checkpoint = %format_utc(&checkpoint), "already up to date");
            return Ok(RunOutcome::UpToDate { checkpoint });
        }
        info!(
            begin = %range.begin,
            end = %range.end,
            days = range.len(),
            "range resolved"
        );

        let mut summary = RunSummary {
            days: Vec::with_capacity(range.len()),
            checkpoint,
        };

        for day in range.days() {
            let report = match self.ingest_day(day).await {
                Ok(r) => r,
                Err(e) => {
                    error!(
                        %day,
                        stage = ?e.stage(),
                        checkpoint = %format_utc(&summary.checkpoint),
                        error = %e,
                        "day failed; aborting run"
                    );
                    return Err(e);
                }
            };
            summary.days.push(report);

            let through = day_end_utc(day);
            if self.policy == CheckpointPolicy::PerDay {
                self.checkpoints
                    .write(through)
                    .map_err(|e| e.at(day, Stage::Checkpointing))?;
            }
            summary.checkpoint = through;
        }

        if self.policy == CheckpointPolicy::EndOfRun {
            self.checkpoints.write(summary.checkpoint)?;
        }
        info!(
            days = summary.days.len(),
            checkpoint = %format_utc(&summary.checkpoint),
            "run complete"
        );
        Ok(RunOutcome::Completed(summary))
    }

    /// Ingest one explicit day. The checkpoint is not touched.
    ///
    /// Days that have not fully ended in UTC are refused: their partial rows
    /// would become the series tail and block the complete ones later.
    pub async fn run_day(&mut self, day: NaiveDate) -> Result<DayReport> {
        let last = self.resolver.last_complete_day();
        if day > last {
            return Err(IngestError::FetchFailure {
                day,
                reason: format!("day has not ended yet; latest complete day is {last}"),
            }
            .at(day, Stage::Fetching));
        }
        self.ingest_day(day).await
    }

    async fn ingest_day(&mut self, day: NaiveDate) -> Result<DayReport> {
        let span = info_span!("day", %day);
        self.ingest_day_inner(day).instrument(span).await
    }

    async fn ingest_day_inner(&mut self, day: NaiveDate) -> Result<DayReport> {
        // ─── fetching ───────────────────────────────────────────────
        let window = self.resolver.day_window(day);
        debug!(offset = %self.resolver.local_offset(day), "fetching");
        let fetched = self
            .source
            .fetch_day(&window)
            .await
            .map_err(|e| e.at(day, Stage::Fetching))?;
        if fetched.is_empty() {
            // Not published yet. Leave the day pending.
            return Err(IngestError::FetchFailure {
                day,
                reason: "no samples returned".to_string(),
            }
            .at(day, Stage::Fetching));
        }

        // ─── normalizing ────────────────────────────────────────────
        let observations = normalize_day(&fetched).map_err(|e| e.at(day, Stage::Normalizing))?;

        // ─── aggregating ────────────────────────────────────────────
        let granularities: Vec<Granularity> = self.store.granularities().collect();
        let aggregated: Vec<_> = granularities
            .iter()
            .map(|&g| (g, aggregate(&observations, g)))
            .collect();
        debug!(samples = observations.len(), "aggregated");

        // ─── appending ──────────────────────────────────────────────
        let raw_rows = self
            .store
            .append_raw(&observations)
            .map_err(|e| e.at(day, Stage::Appending))?;
        let mut aggregate_rows = BTreeMap::new();
        for (g, rows) in &aggregated {
            let n = self
                .store
                .append_aggregate(*g, rows)
                .map_err(|e| e.at(day, Stage::Appending))?;
            aggregate_rows.insert(*g, n);
        }

        info!(samples = observations.len(), raw_rows, ?aggregate_rows, "day appended");
        Ok(DayReport {
            day,
            samples: observations.len(),
            raw_rows,
            aggregate_rows,
        })
    }
}
