pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod history;
pub mod ingest;
pub mod process;
pub mod store;

pub use error::{IngestError, Result};
