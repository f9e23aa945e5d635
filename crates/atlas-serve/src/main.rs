//! Atlas Serve - read-only HTTP API over the artifacts `atlas-build` writes.
//!
//! # Usage
//!
//! ```bash
//! # Serve the default database on 0.0.0.0:8080
//! atlas-serve
//!
//! # Another database, shorter response cache
//! atlas-serve --db-path /srv/atlas/atlas.db --cache-ttl-secs 60
//! ```
//!
//! Flags override the `ATLAS_*` environment variables read by
//! [`Config::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use atlas_build::jobs::Artifact;
use atlas_build::{ArtifactStore, SqliteStore};
use axum::http::Request;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use atlas_serve::{AppState, Config, router};

/// Serve precomputed clinical analytics to the dashboard.
#[derive(Parser, Debug)]
#[command(name = "atlas-serve")]
#[command(about = "Read-only HTTP API over precomputed clinical artifacts", long_about = None)]
#[command(version)]
struct Args {
    /// Path to .env file (optional)
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: PathBuf,

    /// SQLite database written by atlas-build [env: ATLAS_DB_PATH]
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Address to listen on [env: ATLAS_BIND_ADDR]
    #[arg(long)]
    bind_addr: Option<String>,

    /// Response cache lifetime in seconds [env: ATLAS_CACHE_TTL_SECS]
    #[arg(long)]
    cache_ttl_secs: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(db_path) = &self.db_path {
            config.db_path = db_path.clone();
        }
        if let Some(bind_addr) = &self.bind_addr {
            config.bind_addr = bind_addr.clone();
        }
        if let Some(secs) = self.cache_ttl_secs {
            config.cache_ttl = Duration::from_secs(secs);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Before tracing, so RUST_LOG can come from the file
    if args.dotenv.exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv.display());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,atlas_serve=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env()?;
    args.apply(&mut config);
    tracing::info!(
        bind_addr = %config.bind_addr,
        db_path = %config.db_path.display(),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "configuration loaded"
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config)?;
    log_artifact_status(&state.store)?;

    let app = router(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    query = request.uri().query().unwrap_or("")
                )
            }),
        )
        // The dashboard is served from another origin
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "serving artifacts");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Log which artifacts the store holds.
///
/// Missing artifacts are not fatal; their endpoints answer 404 until the
/// next build.
fn log_artifact_status(store: &SqliteStore) -> Result<()> {
    let mut missing = 0usize;
    for artifact in Artifact::ALL {
        match store.artifact_info(artifact.name())? {
            Some(info) if info.documents > 0 => tracing::info!(
                artifact = %artifact,
                documents = info.documents,
                built_at = ?info.built_at,
                "artifact available"
            ),
            _ => {
                missing += 1;
                tracing::warn!(artifact = %artifact, "artifact missing or empty");
            }
        }
    }
    if missing > 0 {
        tracing::warn!(
            "{} of {} artifacts missing; run `atlas-build all`",
            missing,
            Artifact::ALL.len()
        );
    }
    Ok(())
}
