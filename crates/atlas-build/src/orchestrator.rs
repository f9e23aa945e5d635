//! One-shot artifact builds.
//!
//! [`build_if_absent`] is the normal entry point: it refuses to touch an
//! artifact that already holds documents. [`rebuild`] replaces
//! unconditionally and backs the CLI's `--force` flag.
//!
//! In both cases:
//! - the builder runs to completion before anything is written
//! - a builder error leaves the existing artifact untouched
//! - an empty result is never written, so a degenerate run cannot erase a
//!   previous artifact
//!
//! Two concurrent runs can both pass the existence check; the later replace
//! wins. This is acceptable for an administrative tool.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::Result;
use crate::store::ArtifactStore;

/// Result of a build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The artifact was (re)written with this many documents.
    Built { documents: usize },
    /// The artifact already held documents; nothing was done.
    AlreadyPresent { documents: u64 },
    /// The builder produced no documents; nothing was written.
    Empty,
}

impl BuildOutcome {
    /// Metric label for the outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Built { .. } => "built",
            Self::AlreadyPresent { .. } => "already_present",
            Self::Empty => "empty",
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self, Self::Built { .. })
    }
}

/// Build an artifact unless it already holds documents.
///
/// The builder is not invoked when the artifact is present and non-empty.
pub fn build_if_absent<A, T, F>(store: &A, name: &str, builder: F) -> Result<BuildOutcome>
where
    A: ArtifactStore + ?Sized,
    T: Serialize,
    F: FnOnce() -> Result<Vec<T>>,
{
    let existing = store.artifact_size(name)?;
    if existing > 0 {
        tracing::info!(
            artifact = name,
            documents = existing,
            "Artifact already exists with data; leaving it unchanged"
        );
        record_outcome(name, BuildOutcome::AlreadyPresent { documents: existing });
        return Ok(BuildOutcome::AlreadyPresent { documents: existing });
    }

    run(store, name, builder)
}

/// Build an artifact and replace whatever is stored under its name.
pub fn rebuild<A, T, F>(store: &A, name: &str, builder: F) -> Result<BuildOutcome>
where
    A: ArtifactStore + ?Sized,
    T: Serialize,
    F: FnOnce() -> Result<Vec<T>>,
{
    run(store, name, builder)
}

fn run<A, T, F>(store: &A, name: &str, builder: F) -> Result<BuildOutcome>
where
    A: ArtifactStore + ?Sized,
    T: Serialize,
    F: FnOnce() -> Result<Vec<T>>,
{
    let start = Instant::now();
    tracing::info!(artifact = name, "Building artifact");
    atlas_core::metrics::set_gauge("build_running", 1.0);

    let result = build_and_replace(store, name, builder);

    atlas_core::metrics::set_gauge("build_running", 0.0);
    metrics::histogram!("build_duration_seconds", "artifact" => name.to_string())
        .record(start.elapsed().as_secs_f64());

    match &result {
        Ok(outcome) => record_outcome(name, *outcome),
        Err(e) => {
            tracing::error!(artifact = name, "Build failed: {}", e);
            metrics::counter!("build_runs_total", "artifact" => name.to_string(), "outcome" => "failed")
                .increment(1);
        }
    }
    result
}

fn build_and_replace<A, T, F>(store: &A, name: &str, builder: F) -> Result<BuildOutcome>
where
    A: ArtifactStore + ?Sized,
    T: Serialize,
    F: FnOnce() -> Result<Vec<T>>,
{
    let documents = builder()?
        .iter()
        .map(serde_json::to_value)
        .collect::<serde_json::Result<Vec<Value>>>()?;

    if documents.is_empty() {
        tracing::warn!(
            artifact = name,
            "Builder produced no documents; nothing written"
        );
        return Ok(BuildOutcome::Empty);
    }

    store.replace_artifact(name, &documents)?;
    atlas_core::metrics::increment_for(
        "build_documents_written_total",
        name,
        documents.len() as u64,
    );
    tracing::info!(
        artifact = name,
        documents = documents.len(),
        "Artifact replaced"
    );

    Ok(BuildOutcome::Built {
        documents: documents.len(),
    })
}

fn record_outcome(name: &str, outcome: BuildOutcome) {
    metrics::counter!("build_runs_total", "artifact" => name.to_string(), "outcome" => outcome.label())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::store::{ArtifactInfo, MemoryStore};
    use serde_json::json;
    use std::cell::Cell;

    /// Artifact store whose writes always fail.
    struct ReadOnlyStore(MemoryStore);

    impl ArtifactStore for ReadOnlyStore {
        fn artifact_info(&self, name: &str) -> Result<Option<ArtifactInfo>> {
            self.0.artifact_info(name)
        }

        fn read_artifact(&self, name: &str) -> Result<Vec<Value>> {
            self.0.read_artifact(name)
        }

        fn replace_artifact(&self, _name: &str, _documents: &[Value]) -> Result<()> {
            Err(Error::Storage("database is read-only".to_string()))
        }
    }

    #[test]
    fn test_builds_absent_artifact_once() {
        let store = MemoryStore::new();
        let calls = Cell::new(0);
        let builder = || {
            calls.set(calls.get() + 1);
            Ok(vec![json!({"from": "Admissions", "to": "ICU", "count": 1})])
        };

        let first = build_if_absent(&store, "transfer_edges_chord", builder).unwrap();
        assert_eq!(first, BuildOutcome::Built { documents: 1 });

        let second = build_if_absent(&store, "transfer_edges_chord", builder).unwrap();
        assert_eq!(second, BuildOutcome::AlreadyPresent { documents: 1 });

        assert_eq!(calls.get(), 1);
        assert_eq!(store.artifact_size("transfer_edges_chord").unwrap(), 1);
    }

    #[test]
    fn test_empty_artifact_is_rebuilt() {
        let store = MemoryStore::new();
        store.replace_artifact("age_distribution", &[]).unwrap();

        let outcome =
            build_if_absent(&store, "age_distribution", || Ok(vec![json!({"count": 3})])).unwrap();
        assert!(outcome.is_built());
        assert_eq!(store.artifact_size("age_distribution").unwrap(), 1);
    }

    #[test]
    fn test_empty_result_writes_nothing() {
        let store = MemoryStore::new();
        store
            .replace_artifact("transfer_edges_chord", &[json!({"count": 9})])
            .unwrap();

        let outcome =
            rebuild(&store, "transfer_edges_chord", || Ok(Vec::<Value>::new())).unwrap();
        assert_eq!(outcome, BuildOutcome::Empty);

        let docs = store.read_artifact("transfer_edges_chord").unwrap();
        assert_eq!(docs, vec![json!({"count": 9})]);
    }

    #[test]
    fn test_builder_failure_leaves_previous_artifact() {
        let store = MemoryStore::new();
        store
            .replace_artifact("diag_counts_by_code", &[json!({"icd_code": "A01", "count": 2})])
            .unwrap();

        let result = rebuild(&store, "diag_counts_by_code", || -> Result<Vec<Value>> {
            Err(Error::Storage("connection lost".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(
            store.read_artifact("diag_counts_by_code").unwrap(),
            vec![json!({"icd_code": "A01", "count": 2})]
        );
    }

    #[test]
    fn test_write_failure_propagates() {
        let store = ReadOnlyStore(MemoryStore::new());
        let result = build_if_absent(&store, "admission_heatmap", || {
            Ok(vec![json!({"hour": 0, "day_of_week": 1, "count": 1})])
        });
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(store.artifact_size("admission_heatmap").unwrap(), 0);
    }

    #[test]
    fn test_rebuild_replaces_existing() {
        let store = MemoryStore::new();
        store
            .replace_artifact("prescription_counts_by_route", &[json!({"route": "PO"})])
            .unwrap();

        let outcome = rebuild(&store, "prescription_counts_by_route", || {
            Ok(vec![json!({"route": "IV"}), json!({"route": "PO"})])
        })
        .unwrap();

        assert_eq!(outcome, BuildOutcome::Built { documents: 2 });
        assert_eq!(store.read_artifact("prescription_counts_by_route").unwrap().len(), 2);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(BuildOutcome::Built { documents: 1 }.label(), "built");
        assert_eq!(BuildOutcome::AlreadyPresent { documents: 1 }.label(), "already_present");
        assert_eq!(BuildOutcome::Empty.label(), "empty");
    }
}
