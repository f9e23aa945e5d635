//! SQLite schema for the record and artifact store.
//!
//! Raw records and artifact documents are both stored as JSON text, keyed by
//! collection (or artifact name) and a per-collection sequence number that
//! preserves insertion order.

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist and runs any pending migrations.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        migrate(conn, current_version, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Create all tables for a fresh database.
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Raw source records, one JSON object per row
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            seq INTEGER NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (collection, seq)
        );

        -- Precomputed artifact documents
        CREATE TABLE IF NOT EXISTS artifacts (
            name TEXT NOT NULL,
            seq INTEGER NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (name, seq)
        );

        -- One row per artifact that has been written at least once
        CREATE TABLE IF NOT EXISTS artifact_builds (
            name TEXT PRIMARY KEY,
            document_count INTEGER NOT NULL,
            built_at INTEGER NOT NULL
        );
        "#,
    )?;

    create_indexes(conn)
}

/// Expression indexes for the hot scans: code lookups and the transfer
/// pathway sort.
fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_records_icd_code
            ON records(collection, json_extract(body, '$.icd_code'));
        CREATE INDEX IF NOT EXISTS idx_records_admission_order
            ON records(collection, json_extract(body, '$.hadm_id'), json_extract(body, '$.intime'));
        "#,
    )
}

/// Run migrations from one version to another.
fn migrate(conn: &Connection, from: i32, to: i32) -> Result<()> {
    for version in from..to {
        if version == 1 {
            migrate_v1_to_v2(conn)?;
        }
    }
    set_schema_version(conn, to)?;
    Ok(())
}

/// Migrate from v1 to v2: add the lookup and pathway indexes.
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    create_indexes(conn)
}
