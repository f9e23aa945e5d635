//! Atlas build runner.
//!
//! Loads raw clinical exports into the record store and materializes the
//! precomputed artifacts the dashboard API serves.
//!
//! # Usage
//!
//! ```bash
//! # Load raw collections
//! atlas-build load --collection hosp_transfers --input ./export/transfers.jsonl.gz
//! atlas-build load --collection icd_equivalencias --input ./export/icd/
//!
//! # Build every artifact that is still missing
//! atlas-build all
//!
//! # Rebuild one artifact with a lower hierarchy threshold
//! atlas-build build diagnosis-hierarchy --force --min-count 10
//!
//! # Inspect what is stored
//! atlas-build status
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use atlas_build::aggregate::GapPolicy;
use atlas_build::jobs::{self, Artifact, DEFAULT_MIN_COUNT, JobOptions};
use atlas_build::load::{JsonlConfig, JsonlLoader};
use atlas_build::{ArtifactStore, BuildOutcome, SqliteStore};
use atlas_core::collections;
use atlas_core::metrics::{init_metrics, start_metrics_server};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Build precomputed clinical analytics artifacts.
#[derive(Parser, Debug)]
#[command(name = "atlas-build")]
#[command(about = "Offline aggregation jobs for the clinical atlas")]
#[command(version)]
struct Args {
    /// SQLite database holding raw records and artifacts
    #[arg(long, env = "ATLAS_DB_PATH", default_value = "./data/atlas.db")]
    db_path: PathBuf,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "ATLAS_METRICS_PORT", default_value = "0")]
    metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the named artifacts
    Build {
        /// Artifact names (e.g. transfer_edges_chord or transfer-edges-chord)
        #[arg(required = true)]
        artifacts: Vec<Artifact>,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Build every artifact in dependency order
    All {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Append JSONL records to a raw collection
    Load {
        /// Target collection (e.g. hosp_transfers)
        #[arg(short, long)]
        collection: String,

        /// Input JSONL file or directory (.jsonl, .json, .ndjson, optionally .gz)
        #[arg(short, long)]
        input: PathBuf,

        /// Documents per insert transaction
        #[arg(long, default_value = "10000")]
        batch_size: usize,

        /// Abort on the first malformed line instead of skipping it
        #[arg(long)]
        stop_on_error: bool,

        /// Limit number of files to process (for testing)
        #[arg(long)]
        limit: Option<usize>,

        /// Log progress every N lines
        #[arg(long, default_value = "1000000")]
        progress_interval: usize,
    },

    /// Show raw collection sizes and stored artifacts
    Status,
}

#[derive(clap::Args, Debug)]
struct JobArgs {
    /// Replace artifacts that already hold documents
    #[arg(long)]
    force: bool,

    /// Leaf threshold for the diagnosis hierarchy
    #[arg(long, env = "ATLAS_MIN_COUNT", default_value_t = DEFAULT_MIN_COUNT)]
    min_count: u64,

    /// How missing intermediate ICD levels are handled (fold, placeholder)
    #[arg(long, default_value = "fold")]
    gap_policy: GapPolicy,
}

impl JobArgs {
    fn options(&self) -> JobOptions {
        JobOptions {
            force: self.force,
            min_count: self.min_count,
            gap_policy: self.gap_policy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("atlas_build=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
    }

    let store = SqliteStore::open(&args.db_path)
        .with_context(|| format!("Failed to open store at {}", args.db_path.display()))?;
    tracing::info!("Using store at {}", store.path().display());

    match args.command {
        Command::Build { artifacts, job } => build(&store, &artifacts, &job.options()),
        Command::All { job } => build(&store, &Artifact::ALL, &job.options()),
        Command::Load {
            collection,
            input,
            batch_size,
            stop_on_error,
            limit,
            progress_interval,
        } => {
            let config = JsonlConfig {
                input,
                collection,
                batch_size,
                continue_on_error: !stop_on_error,
                limit,
                progress_interval,
            };
            load(&store, config)
        }
        Command::Status => status(&store),
    }
}

fn build(store: &SqliteStore, artifacts: &[Artifact], options: &JobOptions) -> Result<()> {
    let mut failures = 0usize;

    for &artifact in artifacts {
        let start = Instant::now();
        match jobs::run(store, artifact, options) {
            Ok(outcome) => {
                match outcome {
                    BuildOutcome::Built { documents } => tracing::info!(
                        "{}: built {} documents in {:.2?}",
                        artifact,
                        documents,
                        start.elapsed()
                    ),
                    BuildOutcome::AlreadyPresent { documents } => tracing::info!(
                        "{}: already present ({} documents), use --force to rebuild",
                        artifact,
                        documents
                    ),
                    BuildOutcome::Empty => {
                        tracing::warn!("{}: no data, artifact left untouched", artifact)
                    }
                }
            }
            Err(e) => {
                tracing::error!("{}: build failed: {}", artifact, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} builds failed", failures, artifacts.len());
    }
    Ok(())
}

fn load(store: &SqliteStore, config: JsonlConfig) -> Result<()> {
    let start = Instant::now();
    let collection = config.collection.clone();
    let stats = JsonlLoader::new(config)
        .load(store)
        .with_context(|| format!("Failed to load into {}", collection))?;

    println!("Collection:        {}", collection);
    println!("Files processed:   {:>12}", stats.files_processed);
    println!("Total lines:       {:>12}", stats.total_lines);
    println!("Inserted:          {:>12}", stats.inserted);
    println!("Invalid lines:     {:>12}", stats.invalid_lines);
    println!("Bytes read:        {:>12}", stats.bytes_read);
    println!("Elapsed:           {:>12.2?}", start.elapsed());
    Ok(())
}

fn status(store: &SqliteStore) -> Result<()> {
    println!("Raw collections");
    for collection in [
        collections::ADMISSIONS,
        collections::PATIENTS,
        collections::TRANSFERS,
        collections::DIAGNOSES,
        collections::PROCEDURES,
        collections::PRESCRIPTIONS,
        collections::LAB_EVENTS,
        collections::ICU_STAYS,
        collections::ICD_CATEGORIES,
    ] {
        println!("  {:<32} {:>12}", collection, store.collection_count(collection)?);
    }

    println!();
    println!("Artifacts");
    for artifact in Artifact::ALL {
        match store.artifact_info(artifact.name())? {
            Some(info) => {
                let built_at = info
                    .built_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("  {:<32} {:>12}  {}", info.name, info.documents, built_at);
            }
            None => println!("  {:<32} {:>12}", artifact.name(), "missing"),
        }
    }
    Ok(())
}
