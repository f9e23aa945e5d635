//! JSONL bulk loader.
//!
//! Reads raw records from JSONL files (one JSON object per line, optionally
//! gzip-compressed) and appends them to a collection of the record store in
//! batches.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde_json::Value;

use crate::store::{Document, RecordSink, validate_identifier};
use crate::{Error, Result};

/// Configuration for a JSONL load.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Input file or directory path.
    pub input: PathBuf,

    /// Target collection.
    pub collection: String,

    /// Documents per insert transaction.
    pub batch_size: usize,

    /// Continue processing on errors (log and skip invalid lines).
    pub continue_on_error: bool,

    /// Limit number of files to process (for testing).
    pub limit: Option<usize>,

    /// Progress reporting interval (lines).
    pub progress_interval: usize,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            collection: String::new(),
            batch_size: 10_000,
            continue_on_error: true,
            limit: None,
            progress_interval: 1_000_000,
        }
    }
}

/// Counters from a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub files_processed: usize,
    /// Non-blank lines read.
    pub total_lines: usize,
    pub inserted: usize,
    /// Lines that were not JSON objects.
    pub invalid_lines: usize,
    pub bytes_read: u64,
}

/// JSONL file loader.
pub struct JsonlLoader {
    config: JsonlConfig,
}

impl JsonlLoader {
    pub fn new(config: JsonlConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &JsonlConfig {
        &self.config
    }

    /// Collect files to process based on input path.
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let input = &self.config.input;
        let mut files = Vec::new();

        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(input)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|path| path.is_file() && is_jsonl_path(path))
                .collect();

            // Sort for deterministic processing order
            entries.sort();
            files = entries;
        } else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Input path does not exist: {}", input.display()),
            )));
        }

        if let Some(limit) = self.config.limit {
            files.truncate(limit);
        }

        Ok(files)
    }

    /// Load every input file into the configured collection.
    pub fn load<S: RecordSink + ?Sized>(&self, sink: &S) -> Result<LoadStats> {
        validate_identifier(&self.config.collection)?;
        if self.config.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }

        let files = self.collect_files()?;
        tracing::info!(
            collection = %self.config.collection,
            "Found {} JSONL files to load",
            files.len()
        );

        let mut stats = LoadStats::default();
        for (file_idx, path) in files.iter().enumerate() {
            tracing::info!(
                "[{}/{}] Loading: {}",
                file_idx + 1,
                files.len(),
                path.display()
            );
            stats.bytes_read += fs::metadata(path)?.len();

            match self.load_file(path, sink, &mut stats) {
                Ok(()) => stats.files_processed += 1,
                Err(e) => {
                    tracing::warn!("Error loading {}: {}", path.display(), e);
                    if !self.config.continue_on_error || !e.is_recoverable() {
                        return Err(e);
                    }
                }
            }
        }

        metrics::counter!("load_records_total", "collection" => self.config.collection.clone())
            .increment(stats.inserted as u64);
        metrics::counter!("load_records_invalid_total", "collection" => self.config.collection.clone())
            .increment(stats.invalid_lines as u64);

        tracing::info!(
            collection = %self.config.collection,
            files = stats.files_processed,
            inserted = stats.inserted,
            invalid = stats.invalid_lines,
            "Load complete"
        );
        Ok(stats)
    }

    fn load_file<S: RecordSink + ?Sized>(
        &self,
        path: &Path,
        sink: &S,
        stats: &mut LoadStats,
    ) -> Result<()> {
        let reader = open_reader(path)?;
        let mut batch: Vec<Document> = Vec::with_capacity(self.config.batch_size);

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            stats.total_lines += 1;

            match parse_line(&line) {
                Ok(document) => batch.push(document),
                Err(e) => {
                    tracing::warn!("Line {}: {}", line_num + 1, e);
                    stats.invalid_lines += 1;
                    if !self.config.continue_on_error {
                        return Err(e);
                    }
                }
            }

            if batch.len() >= self.config.batch_size {
                stats.inserted += sink.insert_records(&self.config.collection, std::mem::take(&mut batch))?;
            }

            if stats.total_lines.is_multiple_of(self.config.progress_interval) {
                tracing::info!(
                    "Progress: {} lines, {} inserted, {} invalid",
                    stats.total_lines,
                    stats.inserted,
                    stats.invalid_lines
                );
            }
        }

        if !batch.is_empty() {
            stats.inserted += sink.insert_records(&self.config.collection, batch)?;
        }
        Ok(())
    }
}

fn is_jsonl_path(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.ends_with(".jsonl") || name.ends_with(".json") || name.ends_with(".ndjson")
}

/// Open a file for line reading, decompressing `.gz` files.
fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

fn parse_line(line: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        Error::Record(atlas_core::Error::InvalidField {
            field: "line",
            reason: e.to_string(),
        })
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::Record(atlas_core::Error::InvalidField {
            field: "line",
            reason: format!("expected a JSON object, got {}", type_name(&other)),
        })),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RecordStore, ScanQuery, SqliteStore};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn config(input: &Path, collection: &str) -> JsonlConfig {
        JsonlConfig {
            input: input.to_path_buf(),
            collection: collection.to_string(),
            batch_size: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_load_plain_file_in_batches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patients.jsonl");
        fs::write(
            &path,
            "{\"subject_id\": 1}\n\n{\"subject_id\": 2}\n{\"subject_id\": 3}\n",
        )
        .unwrap();

        let store = SqliteStore::open_in_memory().unwrap();
        let stats = JsonlLoader::new(config(&path, "hosp_patients"))
            .load(&store)
            .unwrap();

        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.total_lines, 3);
        assert_eq!(stats.inserted, 3);
        assert_eq!(store.collection_count("hosp_patients").unwrap(), 3);

        let mut ids = Vec::new();
        store
            .scan(&ScanQuery::collection("hosp_patients"), |doc| {
                ids.push(doc["subject_id"].as_i64().unwrap());
                Ok(true)
            })
            .unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_load_gzip_directory() {
        let dir = tempdir().unwrap();
        let gz_path = dir.path().join("a.jsonl.gz");
        let mut encoder = GzEncoder::new(File::create(&gz_path).unwrap(), Compression::default());
        writeln!(encoder, "{{\"icd_code\": \"A01\"}}").unwrap();
        writeln!(encoder, "{{\"icd_code\": \"A02\"}}").unwrap();
        encoder.finish().unwrap();
        fs::write(dir.path().join("b.ndjson"), "{\"icd_code\": \"B01\"}\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not data\n").unwrap();

        let store = MemoryStore::new();
        let stats = JsonlLoader::new(config(dir.path(), "hosp_diagnoses_icd"))
            .load(&store)
            .unwrap();

        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.inserted, 3);
        assert_eq!(
            store.count(&ScanQuery::collection("hosp_diagnoses_icd")).unwrap(),
            3
        );
    }

    #[test]
    fn test_invalid_lines_skipped_when_continuing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        fs::write(&path, "{\"a\": 1}\nnot json\n[1, 2]\n{\"a\": 2}\n").unwrap();

        let store = MemoryStore::new();
        let stats = JsonlLoader::new(config(&path, "c")).load(&store).unwrap();
        assert_eq!(stats.invalid_lines, 2);
        assert_eq!(stats.inserted, 2);
    }

    #[test]
    fn test_invalid_line_aborts_when_strict() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        fs::write(&path, "{\"a\": 1}\nnot json\n").unwrap();

        let store = MemoryStore::new();
        let strict = JsonlConfig {
            continue_on_error: false,
            ..config(&path, "c")
        };
        assert!(JsonlLoader::new(strict).load(&store).is_err());
    }

    #[test]
    fn test_rejects_bad_collection_and_missing_input() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new();

        let bad_name = config(dir.path(), "no spaces allowed");
        assert!(matches!(
            JsonlLoader::new(bad_name).load(&store),
            Err(Error::InvalidQuery(_))
        ));

        let missing = config(&dir.path().join("missing.jsonl"), "c");
        assert!(matches!(
            JsonlLoader::new(missing).load(&store),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_jsonl_path_detection() {
        assert!(is_jsonl_path(Path::new("a.jsonl")));
        assert!(is_jsonl_path(Path::new("a.json.gz")));
        assert!(is_jsonl_path(Path::new("dir/a.ndjson")));
        assert!(!is_jsonl_path(Path::new("a.csv")));
        assert!(!is_jsonl_path(Path::new("a.gz")));
    }
}
