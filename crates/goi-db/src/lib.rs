//! Storage layer for the goi song-vocabulary service.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, point-in-time backups, and the song/vocabulary
//! data access API. Everything the rest of the system persists goes through
//! [`Storage`].
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-file embedded store, no external
//!   database process. WAL allows concurrent readers alongside a single
//!   writer, which matches the one-producer/many-readers access pattern of
//!   the vocabulary pipeline.
//! - **`r2d2` connection pool**: a fixed set of handles opened eagerly at
//!   startup. A handle is only ever lent to one caller at a time and returns
//!   to the pool when its guard drops, on every exit path.
//! - **Two-phase startup**: baseline schema and migrations run on a
//!   dedicated connection before the pool exists, so schema changes never
//!   race pooled traffic.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` and tracked in `_goi_migrations`; each applies exactly
//!   once, transactionally.
//! - **Backups bypass the pool**: a snapshot borrows its own read-only
//!   handle, so a backup can never deadlock against pooled traffic.

mod backup;
mod migrations;
mod pool;
mod store;

pub use backup::{create_backup, restore_backup, BackupError};
pub use migrations::{
    apply_migration, pending_migrations, run_migrations, Migration, MigrationError, CATALOG,
};
pub use pool::{ConnectionPool, DbPool, PoolError, PoolSettings, PooledHandle};
pub use store::{InitError, Storage, StorageError};
