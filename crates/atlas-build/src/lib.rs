//! Offline aggregation jobs for the clinical atlas.
//!
//! This crate scans the raw clinical collections once and materializes the
//! results the dashboard API serves.
//!
//! # Modules
//!
//! - [`store`] - Record store, lookup table and artifact store (SQLite, in-memory)
//! - [`aggregate`] - Pathway, frequency and hierarchy builders
//! - [`orchestrator`] - Build-if-absent / rebuild with atomic replace
//! - [`jobs`] - One job per named artifact
//! - [`load`] - JSONL bulk loader for the raw collections
//!
//! # Architecture
//!
//! ```text
//! [JSONL exports] → load → [records] → jobs/aggregate → orchestrator → [artifacts]
//!                                          ↑
//!                                   [ICD lookup table]
//! ```

pub mod aggregate;
pub mod error;
pub mod jobs;
pub mod load;
pub mod orchestrator;
pub mod store;

pub use error::{Error, Result};
pub use jobs::{Artifact, JobOptions};
pub use orchestrator::BuildOutcome;
pub use store::{ArtifactStore, LookupTable, MemoryStore, RecordStore, SqliteStore};
