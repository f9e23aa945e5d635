//! Storage interfaces for raw records and precomputed artifacts.
//!
//! The builders depend only on these traits:
//!
//! - [`RecordStore`] - "find all matching records, optionally sorted and
//!   projected", delivered to a callback one document at a time
//! - [`LookupTable`] - exact-match code → category lookup
//! - [`ArtifactStore`] - named artifacts: read, existence/size check, and
//!   atomic replace
//!
//! # Backends
//!
//! - [`SqliteStore`] - JSON documents in SQLite, queried with `json_extract`
//! - [`MemoryStore`] - in-process maps, used by tests

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::cmp::Ordering;
use std::collections::HashMap;

use atlas_core::{
    IcdCategory, RawRecord, collections, from_document, normalize_id, normalize_timestamp,
};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// A raw or artifact document.
pub type Document = Map<String, Value>;

// ═══════════════════════════════════════════════════════════════════════════
// Scan queries
// ═══════════════════════════════════════════════════════════════════════════

/// Predicate on a top-level (or dotted) document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the value (`null` matches missing or null fields).
    Eq(String, Value),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Field is present and not null.
    Exists(String),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn one_of<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn exists(field: &str) -> Self {
        Self::Exists(field.to_string())
    }

    /// Field the predicate applies to.
    pub fn field(&self) -> &str {
        match self {
            Self::Eq(field, _) | Self::In(field, _) | Self::Exists(field) => field,
        }
    }

    /// Evaluate the predicate against a document.
    pub fn matches(&self, document: &Document) -> bool {
        let value = field_value(document, self.field());
        match self {
            Self::Eq(_, expected) => match (value, expected) {
                (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
                (Some(actual), expected) => values_equal(actual, expected),
                (None, _) => false,
            },
            Self::In(_, candidates) => {
                value.is_some_and(|actual| candidates.iter().any(|c| values_equal(actual, c)))
            }
            Self::Exists(_) => value.is_some_and(|v| !v.is_null()),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// How a sort field is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortAs {
    /// Raw JSON value: missing/null < numbers < text < composite.
    #[default]
    Value,
    /// Integer id as the record schema reads it, so `"10"` sorts after `9`.
    /// Missing values sort first.
    Integer,
    /// Timestamp as the record schema reads it, at millisecond precision,
    /// whatever its textual layout. Missing values sort first.
    Timestamp,
}

/// One sort key of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
    pub kind: SortAs,
}

/// A "find" over one raw collection.
///
/// Records with equal sort keys are delivered in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanQuery {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    /// Top-level fields to keep; `None` keeps whole documents.
    pub projection: Option<Vec<String>>,
}

impl ScanQuery {
    /// Scan every document of a collection.
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            ..Default::default()
        }
    }

    /// Scan a record stream, projected to the fields its schema reads.
    pub fn for_record<R: RawRecord>() -> Self {
        Self::collection(R::COLLECTION).project(R::FIELDS)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_ascending(self, field: &str) -> Self {
        self.sort_by(field, Direction::Ascending, SortAs::Value)
    }

    pub fn sort_descending(self, field: &str) -> Self {
        self.sort_by(field, Direction::Descending, SortAs::Value)
    }

    /// Ascending on the field's normalized value.
    pub fn sort_ascending_as(self, field: &str, kind: SortAs) -> Self {
        self.sort_by(field, Direction::Ascending, kind)
    }

    fn sort_by(mut self, field: &str, direction: Direction, kind: SortAs) -> Self {
        self.sort.push(SortKey {
            field: field.to_string(),
            direction,
            kind,
        });
        self
    }

    pub fn project(mut self, fields: &[&str]) -> Self {
        self.projection = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Reject collection and field names that are not plain identifiers.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.collection)?;
        for filter in &self.filters {
            validate_field_path(filter.field())?;
        }
        for key in &self.sort {
            validate_field_path(&key.field)?;
        }
        if let Some(fields) = &self.projection {
            for field in fields {
                validate_identifier(field)?;
            }
        }
        Ok(())
    }
}

/// Counters from a typed scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Documents delivered by the store.
    pub scanned: u64,
    /// Documents that passed schema validation.
    pub valid: u64,
    /// Documents rejected by schema validation.
    pub invalid: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════════════════════

/// A source of raw records.
pub trait RecordStore {
    /// Deliver every document matching the query to `handler`, in the
    /// requested order.
    ///
    /// The handler returns `Ok(true)` to continue, `Ok(false)` to stop early,
    /// or `Err` to abort the scan. Returns the number of documents delivered.
    ///
    /// # Deadlocks
    ///
    /// The handler must not call back into the same store. [`SqliteStore`]
    /// holds its connection lock for the whole scan, so a handler that calls
    /// [`LookupTable::lookup`] on a [`RecordLookup`] over the same store, or
    /// any other method of it, blocks forever. Collect what the handler needs
    /// first, or look codes up in a separate table such as a preloaded
    /// `HashMap<String, IcdCategory>`.
    fn scan<F>(&self, query: &ScanQuery, handler: F) -> Result<u64>
    where
        F: FnMut(Document) -> Result<bool>;

    /// Number of documents matching the query's filters.
    fn count(&self, query: &ScanQuery) -> Result<u64> {
        let mut query = query.clone();
        query.sort.clear();
        query.projection = Some(Vec::new());
        self.scan(&query, |_| Ok(true))
    }
}

/// A destination for bulk-loaded raw records.
pub trait RecordSink {
    /// Append documents to a collection, returning how many were written.
    fn insert_records(&self, collection: &str, documents: Vec<Document>) -> Result<usize>;
}

/// Code → category table, queried by exact code.
pub trait LookupTable {
    /// Returns the category row for a code, if there is one.
    fn lookup(&self, code: &str) -> Result<Option<IcdCategory>>;
}

/// Metadata about a stored artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInfo {
    pub name: String,
    /// Number of documents in the artifact.
    pub documents: u64,
    /// When the artifact was last replaced.
    pub built_at: Option<DateTime<Utc>>,
}

/// Named precomputed artifacts.
pub trait ArtifactStore {
    /// Metadata for an artifact, or `None` if it was never written.
    fn artifact_info(&self, name: &str) -> Result<Option<ArtifactInfo>>;

    /// All documents of an artifact in write order (empty if absent).
    fn read_artifact(&self, name: &str) -> Result<Vec<Value>>;

    /// Atomically replace every document of an artifact.
    ///
    /// Readers observe either the previous documents or the new ones, never
    /// a mix. On error the previous documents are left untouched.
    fn replace_artifact(&self, name: &str, documents: &[Value]) -> Result<()>;

    /// Number of documents in an artifact, `0` when absent.
    fn artifact_size(&self, name: &str) -> Result<u64> {
        Ok(self.artifact_info(name)?.map_or(0, |info| info.documents))
    }
}

/// Read an artifact and deserialize each document.
pub fn read_artifact_as<A, T>(store: &A, name: &str) -> Result<Vec<T>>
where
    A: ArtifactStore + ?Sized,
    T: DeserializeOwned,
{
    store
        .read_artifact(name)?
        .into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(Error::from))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Typed scans
// ═══════════════════════════════════════════════════════════════════════════

/// Number of validation failures logged at `warn` before switching to `debug`.
const WARN_LIMIT: u64 = 10;

/// Scan a record stream, converting each document to `R`.
///
/// Documents that fail schema validation are skipped and counted; the
/// handler only sees valid records. Storage errors abort the scan.
pub fn scan_records<S, R, F>(store: &S, query: &ScanQuery, mut handler: F) -> Result<ScanStats>
where
    S: RecordStore,
    R: RawRecord,
    F: FnMut(R) -> Result<bool>,
{
    let mut stats = ScanStats::default();

    store.scan(query, |document| {
        stats.scanned += 1;
        match from_document::<R>(document) {
            Ok(record) => {
                stats.valid += 1;
                handler(record)
            }
            Err(e) => {
                stats.invalid += 1;
                if stats.invalid <= WARN_LIMIT {
                    tracing::warn!("Skipping record: {}", e);
                } else {
                    tracing::debug!("Skipping record: {}", e);
                }
                Ok(true)
            }
        }
    })?;

    if stats.invalid > WARN_LIMIT {
        tracing::warn!(
            collection = %query.collection,
            invalid = stats.invalid,
            "more records failed validation than were logged"
        );
    }

    Ok(stats)
}

/// [`LookupTable`] over the ICD category collection of a record store.
pub struct RecordLookup<'a, S> {
    store: &'a S,
}

impl<'a, S: RecordStore> RecordLookup<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }
}

impl<S: RecordStore> LookupTable for RecordLookup<'_, S> {
    fn lookup(&self, code: &str) -> Result<Option<IcdCategory>> {
        let query = ScanQuery::for_record::<IcdCategory>().filter(Filter::eq("icd_code", code));
        debug_assert_eq!(query.collection, collections::ICD_CATEGORIES);

        let mut found = None;
        scan_records::<_, IcdCategory, _>(self.store, &query, |row| {
            found = Some(row);
            Ok(false)
        })?;
        Ok(found)
    }
}

impl LookupTable for HashMap<String, IcdCategory> {
    fn lookup(&self, code: &str) -> Result<Option<IcdCategory>> {
        Ok(self.get(code).cloned())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Value helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Resolve a dotted field path inside a document.
pub(crate) fn field_value<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Rank of a value's type in the sort order: null, numbers, strings, the rest.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 3,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Total order over optional JSON values, matching SQLite's ordering of
/// `json_extract` results: missing/null < numbers < text < composite.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank_a == 1 => {
            let (x, y) = (as_number(x).unwrap_or(0.0), as_number(y).unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(x), Some(y)) if rank_a == 3 => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}

/// Order two field values under a sort key's interpretation.
pub(crate) fn compare_sort_values(kind: SortAs, a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match kind {
        SortAs::Value => compare_values(a, b),
        SortAs::Integer => a.and_then(normalize_id).cmp(&b.and_then(normalize_id)),
        SortAs::Timestamp => sort_timestamp(a).cmp(&sort_timestamp(b)),
    }
}

fn sort_timestamp(value: Option<&Value>) -> Option<NaiveDateTime> {
    value
        .and_then(normalize_timestamp)
        .map(|ts| ts.round_subsecs(3))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(Some(a), Some(b)) == Ordering::Equal && type_rank(Some(a)) != 0
}

/// Collection names and projected fields: ASCII letters, digits and `_`.
pub(crate) fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidQuery(format!("invalid identifier '{}'", name)))
    }
}

/// Filter and sort fields: identifiers joined by dots.
pub(crate) fn validate_field_path(path: &str) -> Result<()> {
    path.split('.').try_for_each(validate_identifier)
}
