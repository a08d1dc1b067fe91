//! Ordered, idempotent schema migrations.
//!
//! A migration is a `(version, SQL batch)` pair. Applied versions are
//! tracked in the `_goi_migrations` table; each migration runs exactly once,
//! inside a transaction that also records the version, so a crash can never
//! leave a half-applied migration marked as applied.
//!
//! The engine takes its catalog as data. The crate ships its own embedded
//! catalog ([`CATALOG`], SQL files compiled in via `include_str!`); tests
//! and tools may pass synthetic catalogs.

use std::collections::HashSet;

use rusqlite::Connection;
use thiserror::Error;

/// A single schema migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version identifier. Catalogs are ordered by this string ascending.
    pub version: &'static str,
    /// The SQL batch to execute.
    pub sql: &'static str,
}

/// Migrations shipped with this crate, in ascending version order.
///
/// Baseline tables are created by the store before any of these run; the
/// catalog carries schema evolution on top. New migrations are appended
/// here.
pub const CATALOG: &[Migration] = &[
    Migration {
        version: "001_search_indexes",
        sql: include_str!("migrations/001_search_indexes.sql"),
    },
    Migration {
        version: "002_vocab_term_indexes",
        sql: include_str!("migrations/002_vocab_term_indexes.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration failed and was rolled back in full.
    #[error("migration '{version}' failed: {source}")]
    ExecutionFailed {
        /// The version that failed.
        version: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

fn ensure_tracking_table(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _goi_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| MigrationError::ExecutionFailed {
        version: "_goi_migrations_bootstrap".to_string(),
        source: e,
    })
}

/// Returns the catalog entries not yet recorded as applied, preserving
/// catalog order.
///
/// # Errors
///
/// Returns `MigrationError::StateQuery` if the tracking table cannot be
/// read.
pub fn pending_migrations<'a>(
    conn: &Connection,
    catalog: &'a [Migration],
) -> Result<Vec<&'a Migration>, MigrationError> {
    ensure_tracking_table(conn)?;

    let mut stmt = conn
        .prepare("SELECT version FROM _goi_migrations")
        .map_err(MigrationError::StateQuery)?;
    let applied: HashSet<String> = stmt
        .query_map([], |row| row.get(0))
        .map_err(MigrationError::StateQuery)?
        .collect::<Result<_, _>>()
        .map_err(MigrationError::StateQuery)?;

    Ok(catalog
        .iter()
        .filter(|m| !applied.contains(m.version))
        .collect())
}

/// Applies a single migration and records its version, atomically.
///
/// The SQL batch and the tracking-table insert commit together; on any
/// failure both roll back.
///
/// # Errors
///
/// Returns `MigrationError::ExecutionFailed` carrying the version and the
/// underlying cause.
pub fn apply_migration(conn: &Connection, migration: &Migration) -> Result<(), MigrationError> {
    ensure_tracking_table(conn)?;

    let fail = |source| MigrationError::ExecutionFailed {
        version: migration.version.to_string(),
        source,
    };

    let tx = conn.unchecked_transaction().map_err(fail)?;
    tx.execute_batch(migration.sql).map_err(fail)?;
    tx.execute(
        "INSERT INTO _goi_migrations (version) VALUES (?1)",
        [migration.version],
    )
    .map_err(fail)?;
    tx.commit().map_err(fail)
}

/// Runs all pending migrations from `catalog`, in catalog order.
///
/// Already-applied versions are skipped; the run stops at the first
/// failure, leaving everything after it unapplied. Running twice in a row
/// is a no-op the second time. Returns the number applied.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or the
/// tracking table cannot be queried. A failed migration is rolled back in
/// full and is fatal to the caller's startup; it is never retried here.
pub fn run_migrations(conn: &Connection, catalog: &[Migration]) -> Result<usize, MigrationError> {
    debug_assert!(
        catalog.windows(2).all(|w| w[0].version < w[1].version),
        "migration catalog must be sorted by version, without duplicates"
    );

    let pending = pending_migrations(conn, catalog)?;

    let skipped = catalog.len() - pending.len();
    if skipped > 0 {
        tracing::debug!(skipped, "migrations already applied, skipping");
    }

    for migration in &pending {
        tracing::info!(version = migration.version, "applying migration");
        apply_migration(conn, migration)?;
    }

    Ok(pending.len())
}
