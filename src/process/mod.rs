// src/process/mod.rs
pub mod aggregate;
pub mod normalize;

use chrono::{DateTime, Utc};

pub use aggregate::{aggregate, AggregateRow, Granularity};
pub use normalize::{normalize, normalize_day};

/// One sample of the three demand series, in MW, at a whole-second UTC instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub at: DateTime<Utc>,
    pub actual: f64,
    pub planned: f64,
    pub forecast: f64,
}
