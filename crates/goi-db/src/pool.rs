//! Bounded, thread-safe reuse of SQLite connections.
//!
//! The pool opens its full set of handles at startup and keeps that set for
//! its whole lifetime: no lazy opening, no idle eviction. A checked-out
//! handle is owned by exactly one caller and returns to the pool when the
//! guard drops.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

/// Runtime tunables for the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Number of handles opened at startup and kept in circulation for the
    /// pool's lifetime.
    pub capacity: u32,

    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: 5,
            busy_timeout_ms: 5_000,
        }
    }
}

/// A type alias for the underlying SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A checked-out handle. Dereferences to [`rusqlite::Connection`] and
/// returns itself to the pool on drop.
pub type PooledHandle = PooledConnection<SqliteConnectionManager>;

// r2d2 insists on a finite checkout timeout; a day stands in for the
// unbounded waiting this pool promises. Callers that need a bound wrap
// their calls externally.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors that can occur when creating or using the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool or open its initial handles.
    #[error("failed to create database connection pool: {0}")]
    Init(r2d2::Error),

    /// Failed to check a handle out of a live pool.
    #[error("failed to check out a pooled connection: {0}")]
    Checkout(r2d2::Error),

    /// The pool has been shut down with [`ConnectionPool::close_all`].
    #[error("connection pool is closed")]
    Closed,
}

/// A fixed-capacity pool of SQLite handles against a single database file.
///
/// Connections are initialized with WAL journal mode (verified, not
/// assumed), foreign-key enforcement, and the configured busy timeout.
#[derive(Debug)]
pub struct ConnectionPool {
    inner: Mutex<Option<DbPool>>,
}

impl ConnectionPool {
    /// Opens `settings.capacity` handles against `db_path` up front.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Init` if the file cannot be opened that many
    /// times or a connection fails its initialization pragmas.
    pub fn open(db_path: impl AsRef<Path>, settings: PoolSettings) -> Result<Self, PoolError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let busy_timeout_ms = settings.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(flags)
            .with_init(move |conn| {
                // Set WAL mode and verify it was accepted. In-memory
                // databases report "memory", which is acceptable.
                let journal_mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
                if journal_mode != "wal" && journal_mode != "memory" {
                    return Err(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                        Some(format!("failed to set WAL journal mode, got: {journal_mode}")),
                    ));
                }
                conn.execute_batch(&format!(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = {busy_timeout_ms};"
                ))
            });

        // min_idle == max_size opens every handle during build(), and with
        // eviction disabled the same handles stay alive until close_all.
        let pool = Pool::builder()
            .max_size(settings.capacity)
            .min_idle(Some(settings.capacity))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(ACQUIRE_TIMEOUT)
            .build(manager)
            .map_err(PoolError::Init)?;

        Ok(Self {
            inner: Mutex::new(Some(pool)),
        })
    }

    /// Checks a handle out of the pool, blocking until one is free.
    ///
    /// The returned guard gives exclusive use of the handle; dropping it
    /// returns the handle to the pool, on error paths included.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Closed` after [`ConnectionPool::close_all`], or
    /// `PoolError::Checkout` if the underlying pool fails to produce a
    /// handle.
    pub fn acquire(&self) -> Result<PooledHandle, PoolError> {
        let pool = match self.guard().as_ref() {
            Some(pool) => pool.clone(),
            None => return Err(PoolError::Closed),
        };
        pool.get().map_err(PoolError::Checkout)
    }

    /// Drains the pool and closes every handle.
    ///
    /// Idle handles close immediately; checked-out handles close when their
    /// guards drop. Subsequent [`ConnectionPool::acquire`] calls fail with
    /// `PoolError::Closed`.
    pub fn close_all(&self) {
        if self.guard().take().is_some() {
            tracing::info!("connection pool closed");
        }
    }

    /// Returns whether [`ConnectionPool::close_all`] has been called.
    pub fn is_closed(&self) -> bool {
        self.guard().is_none()
    }

    fn guard(&self) -> MutexGuard<'_, Option<DbPool>> {
        // The lock is only poisoned if a panic hit between lock and unlock;
        // the Option inside is still structurally sound.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn temp_pool(capacity: u32, busy_timeout_ms: u64) -> (tempfile::TempDir, ConnectionPool) {
        let dir = tempfile::tempdir().expect("should create tempdir");
        let pool = ConnectionPool::open(
            dir.path().join("pool_test.db"),
            PoolSettings {
                capacity,
                busy_timeout_ms,
            },
        )
        .expect("pool creation should succeed");
        (dir, pool)
    }

    #[test]
    fn connections_are_initialized_with_pragmas() {
        let (_dir, pool) = temp_pool(3, 2_500);
        let conn = pool.acquire().expect("should acquire a handle");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500);
    }

    #[test]
    fn full_capacity_is_opened_eagerly() {
        let (_dir, pool) = temp_pool(3, 5_000);

        let state = {
            let guard = pool.guard();
            guard.as_ref().expect("pool should be live").state()
        };
        assert_eq!(state.connections, 3, "all handles should exist at startup");
        assert_eq!(state.idle_connections, 3);
    }

    #[test]
    fn capacity_handles_can_be_held_simultaneously() {
        let (_dir, pool) = temp_pool(3, 5_000);

        let a = pool.acquire().expect("first acquire");
        let b = pool.acquire().expect("second acquire");
        let c = pool.acquire().expect("third acquire");

        drop((a, b, c));
    }

    #[test]
    fn acquire_blocks_until_a_handle_is_released() {
        let (_dir, pool) = temp_pool(1, 5_000);
        let pool = Arc::new(pool);

        let held = pool.acquire().expect("should hold the only handle");

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let conn = pool.acquire().expect("blocked acquire should succeed");
                tx.send(()).expect("receiver should be alive");
                drop(conn);
            })
        };

        // The waiter cannot proceed while the handle is held.
        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "acquire should block while the pool is exhausted"
        );

        drop(held);

        rx.recv_timeout(Duration::from_secs(5))
            .expect("acquire should unblock once the handle is released");
        waiter.join().expect("waiter thread should finish");
    }

    #[test]
    fn acquire_after_close_fails() {
        let (_dir, pool) = temp_pool(2, 5_000);

        assert!(!pool.is_closed());
        pool.close_all();
        assert!(pool.is_closed());

        match pool.acquire() {
            Err(PoolError::Closed) => {}
            other => panic!("expected PoolError::Closed, got {other:?}"),
        }
    }
}
