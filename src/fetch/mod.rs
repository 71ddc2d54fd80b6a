// src/fetch/mod.rs
pub mod client;
pub mod payload;

use crate::clock::DayWindow;
use crate::error::Result;

pub use client::ReeClient;
pub use payload::{parse_payload, DayFetch, SeriesPoint};

/// Anything that can produce the three demand series for one day.
#[async_trait::async_trait]
pub trait DemandSource: Send + Sync {
    async fn fetch_day(&self, window: &DayWindow) -> Result<DayFetch>;
}
