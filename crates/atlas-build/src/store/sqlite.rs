//! SQLite-backed record and artifact store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;

use super::schema;
use super::{
    ArtifactInfo, ArtifactStore, Direction, Document, Filter, LookupTable, RecordLookup,
    RecordSink, RecordStore, ScanQuery, SortAs, SortKey, validate_identifier,
};
use crate::{Error, Result};
use atlas_core::IcdCategory;

/// Record and artifact store on a single SQLite database.
pub struct SqliteStore {
    /// SQLite connection (protected by mutex for thread safety).
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)
            .map_err(|e| Error::Storage(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Storage(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to open in-memory SQLite: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Storage(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Database file path (`:memory:` for in-memory stores).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of raw documents stored in a collection.
    pub fn collection_count(&self, collection: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Metadata for every artifact written so far, by name.
    pub fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT b.name, b.built_at, COUNT(a.seq)
             FROM artifact_builds b LEFT JOIN artifacts a ON a.name = b.name
             GROUP BY b.name ORDER BY b.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ArtifactInfo {
                name: row.get(0)?,
                built_at: DateTime::<Utc>::from_timestamp(row.get(1)?, 0),
                documents: row.get::<_, i64>(2)? as u64,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Query translation
// ═══════════════════════════════════════════════════════════════════════════

fn json_path(field: &str) -> String {
    format!("json_extract(body, '$.{}')", field)
}

/// ORDER BY expression for a sort key.
///
/// Typed keys are normalized in SQL the way the record schema reads them:
/// ids stored as text or floats become integers, and timestamps in any
/// layout SQLite's date functions understand (plus `{"$date": ...}` and
/// epoch milliseconds) become one canonical millisecond string.
fn sort_expression(key: &SortKey) -> String {
    let value = json_path(&key.field);
    match key.kind {
        SortAs::Value => value,
        SortAs::Integer => format!(
            "CASE json_type(body, '$.{field}') \
             WHEN 'integer' THEN {value} \
             WHEN 'real' THEN CAST({value} AS INTEGER) \
             WHEN 'text' THEN CAST(CAST(NULLIF(trim({value}), '') AS REAL) AS INTEGER) \
             END",
            field = key.field,
        ),
        SortAs::Timestamp => {
            let raw = format!(
                "COALESCE(json_extract(body, '$.{}.\"$date\"'), {})",
                key.field, value
            );
            format!(
                "CASE WHEN typeof({raw}) IN ('integer', 'real') \
                 THEN strftime('%Y-%m-%d %H:%M:%f', {raw} / 1000.0, 'unixepoch') \
                 ELSE strftime('%Y-%m-%d %H:%M:%f', NULLIF(trim({raw}), '')) \
                 END"
            )
        }
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Build the WHERE clause for a query. Field names are validated before they
/// are interpolated; values are always bound.
fn build_where(query: &ScanQuery) -> Result<(String, Vec<SqlValue>)> {
    query.validate()?;

    let mut sql = String::from(" WHERE collection = ?");
    let mut params = vec![SqlValue::Text(query.collection.clone())];

    for filter in &query.filters {
        match filter {
            Filter::Eq(field, Value::Null) => {
                sql.push_str(&format!(" AND {} IS NULL", json_path(field)));
            }
            Filter::Eq(field, value) => {
                sql.push_str(&format!(" AND {} = ?", json_path(field)));
                params.push(to_sql_value(value));
            }
            Filter::In(_, values) if values.is_empty() => {
                sql.push_str(" AND 0");
            }
            Filter::In(field, values) => {
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!(" AND {} IN ({})", json_path(field), placeholders));
                params.extend(values.iter().map(to_sql_value));
            }
            Filter::Exists(field) => {
                sql.push_str(&format!(" AND {} IS NOT NULL", json_path(field)));
            }
        }
    }

    Ok((sql, params))
}

fn build_scan_sql(query: &ScanQuery) -> Result<(String, Vec<SqlValue>)> {
    let (clause, params) = build_where(query)?;
    let mut sql = format!("SELECT body FROM records{}", clause);

    sql.push_str(" ORDER BY ");
    for key in &query.sort {
        let direction = match key.direction {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        };
        sql.push_str(&format!("{} {}, ", sort_expression(key), direction));
    }
    sql.push_str("seq ASC");

    Ok((sql, params))
}

fn apply_projection(document: &mut Document, projection: Option<&[String]>) {
    if let Some(fields) = projection {
        document.retain(|key, _| fields.iter().any(|f| f == key));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Trait implementations
// ═══════════════════════════════════════════════════════════════════════════

impl RecordStore for SqliteStore {
    fn scan<F>(&self, query: &ScanQuery, mut handler: F) -> Result<u64>
    where
        F: FnMut(Document) -> Result<bool>,
    {
        let (sql, params) = build_scan_sql(query)?;

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut delivered = 0u64;
        while let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            let mut document: Document = serde_json::from_str(&body)?;
            apply_projection(&mut document, query.projection.as_deref());

            delivered += 1;
            if !handler(document)? {
                break;
            }
        }

        Ok(delivered)
    }

    fn count(&self, query: &ScanQuery) -> Result<u64> {
        let (clause, params) = build_where(query)?;
        let sql = format!("SELECT COUNT(*) FROM records{}", clause);

        let conn = self.conn.lock();
        let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl RecordSink for SqliteStore {
    fn insert_records(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        validate_identifier(collection)?;
        if documents.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let next_seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM records WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )?;

        let count = documents.len();
        {
            let mut stmt =
                tx.prepare("INSERT INTO records (collection, seq, body) VALUES (?1, ?2, ?3)")?;
            for (offset, document) in documents.into_iter().enumerate() {
                let body = serde_json::to_string(&document)?;
                stmt.execute(params![collection, next_seq + offset as i64, body])?;
            }
        }

        tx.commit()?;
        Ok(count)
    }
}

impl LookupTable for SqliteStore {
    fn lookup(&self, code: &str) -> Result<Option<IcdCategory>> {
        RecordLookup::new(self).lookup(code)
    }
}

impl ArtifactStore for SqliteStore {
    fn artifact_info(&self, name: &str) -> Result<Option<ArtifactInfo>> {
        let conn = self.conn.lock();

        let built_at: Option<i64> = conn
            .query_row(
                "SELECT built_at FROM artifact_builds WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;

        let documents: i64 = conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;

        if built_at.is_none() && documents == 0 {
            return Ok(None);
        }

        Ok(Some(ArtifactInfo {
            name: name.to_string(),
            documents: documents as u64,
            built_at: built_at.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        }))
    }

    fn read_artifact(&self, name: &str) -> Result<Vec<Value>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM artifacts WHERE name = ?1 ORDER BY seq")?;
        let mut rows = stmt.query([name])?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            documents.push(serde_json::from_str(&body)?);
        }
        Ok(documents)
    }

    fn replace_artifact(&self, name: &str, documents: &[Value]) -> Result<()> {
        let bodies = documents
            .iter()
            .map(serde_json::to_string)
            .collect::<serde_json::Result<Vec<_>>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM artifacts WHERE name = ?1", [name])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO artifacts (name, seq, body) VALUES (?1, ?2, ?3)")?;
            for (seq, body) in bodies.iter().enumerate() {
                stmt.execute(params![name, seq as i64, body])?;
            }
        }
        tx.execute(
            "INSERT INTO artifact_builds (name, document_count, built_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                document_count = excluded.document_count,
                built_at = excluded.built_at",
            params![name, bodies.len() as i64, Utc::now().timestamp()],
        )?;

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_artifact_as;
    use serde_json::json;
    use tempfile::tempdir;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                _ => panic!("expected an object"),
            })
            .collect()
    }

    fn collect(store: &SqliteStore, query: &ScanQuery) -> Vec<Document> {
        let mut out = Vec::new();
        store
            .scan(query, |doc| {
                out.push(doc);
                Ok(true)
            })
            .unwrap();
        out
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("atlas.db");
        let store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_insert_and_count() {
        let store = SqliteStore::open_in_memory().unwrap();
        let n = store
            .insert_records("hosp_patients", docs(vec![json!({"a": 1}), json!({"a": 2})]))
            .unwrap();
        assert_eq!(n, 2);
        store
            .insert_records("hosp_patients", docs(vec![json!({"a": 3})]))
            .unwrap();
        assert_eq!(store.collection_count("hosp_patients").unwrap(), 3);
        assert_eq!(store.collection_count("hosp_admissions").unwrap(), 0);
    }

    #[test]
    fn test_insert_rejects_bad_collection_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .insert_records("bad name", docs(vec![json!({"a": 1})]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn test_scan_sorts_filters_and_projects() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records(
                "hosp_transfers",
                docs(vec![
                    json!({"hadm_id": 2, "intime": "2180-01-01 10:00:00", "careunit": "ICU", "x": 1}),
                    json!({"hadm_id": 1, "intime": "2180-01-02 10:00:00", "careunit": "Ward"}),
                    json!({"hadm_id": 1, "intime": "2180-01-01 10:00:00", "careunit": "ED"}),
                    json!({"intime": "2180-01-01 09:00:00", "careunit": "Lost"}),
                ]),
            )
            .unwrap();

        let query = ScanQuery::collection("hosp_transfers")
            .sort_ascending("hadm_id")
            .sort_ascending("intime")
            .project(&["hadm_id", "careunit"]);
        let rows = collect(&store, &query);

        let units: Vec<&str> = rows
            .iter()
            .map(|d| d["careunit"].as_str().unwrap())
            .collect();
        assert_eq!(units, vec!["Lost", "ED", "Ward", "ICU"]);
        assert!(rows.iter().all(|d| !d.contains_key("x") && !d.contains_key("intime")));

        let filtered = collect(
            &store,
            &ScanQuery::collection("hosp_transfers").filter(Filter::exists("hadm_id")),
        );
        assert_eq!(filtered.len(), 3);

        let one = collect(
            &store,
            &ScanQuery::collection("hosp_transfers").filter(Filter::one_of("careunit", ["ICU", "ED"])),
        );
        assert_eq!(one.len(), 2);
    }

    #[test]
    fn test_typed_sort_normalizes_ids_and_timestamps() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records(
                "hosp_transfers",
                docs(vec![
                    json!({"hadm_id": "10", "intime": "2180-01-01 08:00:00", "n": "d"}),
                    json!({"hadm_id": "9", "intime": "2180-01-01 10:00:00", "n": "c"}),
                    json!({"hadm_id": 9.0, "intime": "2180-01-01T09:00:00", "n": "b"}),
                    json!({"hadm_id": 9, "intime": {"$date": "2180-01-01T08:30:00Z"}, "n": "a"}),
                    json!({"hadm_id": " ", "n": "blank"}),
                ]),
            )
            .unwrap();

        let query = ScanQuery::collection("hosp_transfers")
            .sort_ascending_as("hadm_id", SortAs::Integer)
            .sort_ascending_as("intime", SortAs::Timestamp);
        let names: Vec<String> = collect(&store, &query)
            .iter()
            .map(|d| d["n"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["blank", "a", "b", "c", "d"]);
    }

    #[test]
    fn test_typed_timestamp_sort_accepts_epoch_millis() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records(
                "c",
                docs(vec![
                    json!({"t": "2001-09-09 01:46:41", "n": "later"}),
                    json!({"t": 1_000_000_000_000_i64, "n": "epoch"}),
                    json!({"n": "missing"}),
                ]),
            )
            .unwrap();

        let rows = collect(
            &store,
            &ScanQuery::collection("c").sort_ascending_as("t", SortAs::Timestamp),
        );
        let names: Vec<&str> = rows.iter().map(|d| d["n"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["missing", "epoch", "later"]);
    }

    #[test]
    fn test_scan_preserves_insertion_order_for_ties() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records(
                "c",
                docs(vec![
                    json!({"k": 1, "n": "first"}),
                    json!({"k": 1, "n": "second"}),
                    json!({"k": 0, "n": "zero"}),
                ]),
            )
            .unwrap();
        let rows = collect(&store, &ScanQuery::collection("c").sort_ascending("k"));
        let names: Vec<&str> = rows.iter().map(|d| d["n"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["zero", "first", "second"]);
    }

    #[test]
    fn test_scan_stops_early() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records("c", docs(vec![json!({"k": 1}), json!({"k": 2}), json!({"k": 3})]))
            .unwrap();
        let delivered = store.scan(&ScanQuery::collection("c"), |_| Ok(false)).unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(store.count(&ScanQuery::collection("c")).unwrap(), 3);
        assert_eq!(
            store
                .count(&ScanQuery::collection("c").filter(Filter::one_of("k", [1, 3])))
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_scan_handler_error_propagates() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records("c", docs(vec![json!({"k": 1})]))
            .unwrap();
        let result = store.scan(&ScanQuery::collection("c"), |_| {
            Err(Error::Storage("boom".to_string()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_lookup_by_code() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records(
                "icd_equivalencias",
                docs(vec![
                    json!({"icd_code": "A01", "chapter_name": "Infections", "section_name": "Typhoid"}),
                    json!({"icd_code": "I10", "chapter_name": "Circulatory"}),
                ]),
            )
            .unwrap();

        let row = store.lookup("A01").unwrap().unwrap();
        assert_eq!(row.chapter_name.as_deref(), Some("Infections"));
        assert_eq!(row.section_name.as_deref(), Some("Typhoid"));
        assert!(store.lookup("Z99").unwrap().is_none());
    }

    #[test]
    fn test_lookup_during_scan_uses_preloaded_table() {
        use std::collections::HashMap;

        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_records(
                "icd_equivalencias",
                docs(vec![json!({"icd_code": "A01", "chapter_name": "Infections"})]),
            )
            .unwrap();
        store
            .insert_records(
                "hosp_diagnoses_icd",
                docs(vec![json!({"icd_code": "A01"}), json!({"icd_code": "Z99"})]),
            )
            .unwrap();

        // Scanning holds the connection lock, so the table is read up front.
        let mut table: HashMap<String, IcdCategory> = HashMap::new();
        crate::store::scan_records::<_, IcdCategory, _>(
            &store,
            &ScanQuery::for_record::<IcdCategory>(),
            |row| {
                if let Some(code) = row.icd_code.clone() {
                    table.insert(code, row);
                }
                Ok(true)
            },
        )
        .unwrap();

        let mut chapters = Vec::new();
        store
            .scan(&ScanQuery::collection("hosp_diagnoses_icd"), |doc| {
                let code = doc["icd_code"].as_str().unwrap_or_default();
                chapters.push(table.lookup(code)?.and_then(|row| row.chapter_name));
                Ok(true)
            })
            .unwrap();
        assert_eq!(chapters, vec![Some("Infections".to_string()), None]);
    }

    #[test]
    fn test_replace_artifact_roundtrip_and_metadata() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.artifact_info("transfer_edges_chord").unwrap().is_none());
        assert_eq!(store.artifact_size("transfer_edges_chord").unwrap(), 0);

        store
            .replace_artifact(
                "transfer_edges_chord",
                &[json!({"from": "Admissions", "to": "ICU", "count": 3})],
            )
            .unwrap();
        store
            .replace_artifact(
                "transfer_edges_chord",
                &[
                    json!({"from": "Admissions", "to": "ICU", "count": 4}),
                    json!({"from": "ICU", "to": "Discharge", "count": 4}),
                ],
            )
            .unwrap();

        let info = store.artifact_info("transfer_edges_chord").unwrap().unwrap();
        assert_eq!(info.documents, 2);
        assert!(info.built_at.is_some());

        let docs: Vec<Value> = read_artifact_as(&store, "transfer_edges_chord").unwrap();
        assert_eq!(docs[0]["count"], 4);
        assert_eq!(docs[1]["to"], "Discharge");

        let listed = store.list_artifacts().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "transfer_edges_chord");
        assert_eq!(listed[0].documents, 2);
    }

    #[test]
    fn test_artifacts_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atlas.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .replace_artifact("diag_counts_by_code", &[json!({"icd_code": "A01", "count": 5})])
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.artifact_size("diag_counts_by_code").unwrap(), 1);
    }
}
