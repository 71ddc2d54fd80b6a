// src/history/mod.rs
pub mod checkpoint;

pub use checkpoint::CheckpointStore;
