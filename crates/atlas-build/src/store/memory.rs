//! In-memory store for tests and small fixtures.

use std::cmp::Ordering;
use std::collections::HashMap;

use atlas_core::IcdCategory;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use super::{
    ArtifactInfo, ArtifactStore, Direction, Document, LookupTable, RecordLookup, RecordSink,
    RecordStore, ScanQuery, compare_sort_values, field_value, validate_identifier,
};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct StoredArtifact {
    documents: Vec<Value>,
    built_at: DateTime<Utc>,
}

/// Record and artifact store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    artifacts: RwLock<HashMap<String, StoredArtifact>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append JSON objects to a collection.
    pub fn insert_json(&self, collection: &str, values: Vec<Value>) -> Result<usize> {
        let documents = values
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => Ok(map),
                other => Err(Error::InvalidQuery(format!(
                    "expected a JSON object, got {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        self.insert_records(collection, documents)
    }
}

impl RecordStore for MemoryStore {
    fn scan<F>(&self, query: &ScanQuery, mut handler: F) -> Result<u64>
    where
        F: FnMut(Document) -> Result<bool>,
    {
        query.validate()?;

        let collections = self.collections.read();
        let Some(documents) = collections.get(&query.collection) else {
            return Ok(0);
        };

        let mut matching: Vec<&Document> = documents
            .iter()
            .filter(|doc| query.filters.iter().all(|f| f.matches(doc)))
            .collect();

        // Stable sort keeps insertion order for equal keys.
        matching.sort_by(|a, b| {
            for key in &query.sort {
                let ordering = compare_sort_values(
                    key.kind,
                    field_value(a, &key.field),
                    field_value(b, &key.field),
                );
                let ordering = match key.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        let mut delivered = 0u64;
        for document in matching {
            let mut document = document.clone();
            if let Some(fields) = &query.projection {
                document.retain(|key, _| fields.iter().any(|f| f == key));
            }

            delivered += 1;
            if !handler(document)? {
                break;
            }
        }

        Ok(delivered)
    }
}

impl RecordSink for MemoryStore {
    fn insert_records(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        validate_identifier(collection)?;
        let count = documents.len();
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        Ok(count)
    }
}

impl LookupTable for MemoryStore {
    fn lookup(&self, code: &str) -> Result<Option<IcdCategory>> {
        RecordLookup::new(self).lookup(code)
    }
}

impl ArtifactStore for MemoryStore {
    fn artifact_info(&self, name: &str) -> Result<Option<ArtifactInfo>> {
        Ok(self.artifacts.read().get(name).map(|stored| ArtifactInfo {
            name: name.to_string(),
            documents: stored.documents.len() as u64,
            built_at: Some(stored.built_at),
        }))
    }

    fn read_artifact(&self, name: &str) -> Result<Vec<Value>> {
        Ok(self
            .artifacts
            .read()
            .get(name)
            .map(|stored| stored.documents.clone())
            .unwrap_or_default())
    }

    fn replace_artifact(&self, name: &str, documents: &[Value]) -> Result<()> {
        self.artifacts.write().insert(
            name.to_string(),
            StoredArtifact {
                documents: documents.to_vec(),
                built_at: Utc::now(),
            },
        );
        Ok(())
    }
}
