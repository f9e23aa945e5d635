//! Atlas Serve - read-only HTTP API over precomputed clinical artifacts.
//!
//! Every endpoint reads an artifact written by `atlas-build`; nothing here
//! scans the raw collections. The one exception is the diagnosis icicle with
//! a custom `min_count`, which refolds the stored per-code counts.
//!
//! # Architecture
//!
//! - **AppState**: Shared application state (artifact store, configuration, cache)
//! - **Cache**: moka response cache keyed by endpoint and parameters
//! - **Routes**: Endpoint handlers grouped by domain

pub mod cache;
mod error;
mod routes;
mod state;

pub use self::cache::{ResponseCache, get_or_compute, new_cache};
pub use self::error::ApiError;
pub use self::routes::router;
pub use self::state::{AppState, Config};
