//! Point-in-time snapshots of the store file.
//!
//! Snapshots use SQLite's online backup API over dedicated connections,
//! never pooled handles, so a backup can run while pooled writers are
//! active and can never deadlock against the pool. The artifact is a
//! complete, self-contained database file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use rusqlite::{Connection, DatabaseName, OpenFlags};
use thiserror::Error;

/// Errors that can occur while creating or restoring a snapshot.
///
/// All variants are recoverable from the live store's point of view: a
/// failed backup leaves the store untouched, and whether to retry is the
/// caller's decision.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The destination directory could not be created.
    #[error("failed to create backup directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A source or destination database could not be opened.
    #[error("failed to open database {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// The page copy itself failed.
    #[error("failed to copy database to {path}: {source}")]
    Copy {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Restoring from a snapshot failed.
    #[error("failed to restore database from {path}: {source}")]
    Restore {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

/// Copies the live store at `db_path` into `dest_dir` and returns the
/// snapshot path.
///
/// The destination directory is created if absent. The artifact is named
/// `<db-file-stem>_<YYYYMMDD_HHMMSS>.db` and captures a consistent
/// point-in-time image even with concurrent WAL writers; it is valid to
/// open independently of the live store.
///
/// # Errors
///
/// Returns `BackupError` if the destination is not writable, the source
/// cannot be opened, or the copy is interrupted. A failed copy removes the
/// partial artifact.
pub fn create_backup(db_path: &Path, dest_dir: &Path) -> Result<PathBuf, BackupError> {
    fs::create_dir_all(dest_dir).map_err(|e| BackupError::CreateDir {
        path: dest_dir.to_path_buf(),
        source: e,
    })?;

    let stem = db_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("store");
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup_path = dest_dir.join(format!("{stem}_{timestamp}.db"));

    let source = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(
        |e| BackupError::Open {
            path: db_path.to_path_buf(),
            source: e,
        },
    )?;

    if let Err(e) = source.backup(DatabaseName::Main, &backup_path, None) {
        // A failed copy must not leave a torn artifact behind.
        let _ = fs::remove_file(&backup_path);
        return Err(BackupError::Copy {
            path: backup_path,
            source: e,
        });
    }

    tracing::info!(path = %backup_path.display(), "database backed up");
    Ok(backup_path)
}

/// Loads the snapshot at `backup_path` into the database at `db_path`,
/// replacing its contents.
///
/// Intended for recovery before a store is opened; restoring underneath a
/// live pool is not supported.
///
/// # Errors
///
/// Returns `BackupError::Open` if `db_path` cannot be opened, or
/// `BackupError::Restore` if the snapshot is missing or unreadable.
pub fn restore_backup(backup_path: &Path, db_path: &Path) -> Result<(), BackupError> {
    let mut dest = Connection::open(db_path).map_err(|e| BackupError::Open {
        path: db_path.to_path_buf(),
        source: e,
    })?;

    dest.restore(
        DatabaseName::Main,
        backup_path,
        None::<fn(rusqlite::backup::Progress)>,
    )
    .map_err(|e| BackupError::Restore {
        path: backup_path.to_path_buf(),
        source: e,
    })?;

    tracing::info!(path = %backup_path.display(), "database restored from backup");
    Ok(())
}
