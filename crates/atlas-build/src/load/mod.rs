//! Bulk loaders that fill the record store from exported files.

pub mod jsonl;

pub use jsonl::{JsonlConfig, JsonlLoader, LoadStats};
