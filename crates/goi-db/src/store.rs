//! Song and vocabulary persistence.
//!
//! [`Storage`] is the public surface of this crate: it owns the schema,
//! brings it to the latest migration at startup, and serves save/get/search
//! calls over a bounded connection pool. Writes that touch multiple rows
//! run in a single transaction, so concurrent readers on other handles see
//! either all of a batch or none of it.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use goi_types::{
    NewSong, NewVocabularyItem, Song, VocabPart, VocabularyItem, VocabularySearchHit,
};

use crate::backup::{self, BackupError};
use crate::migrations::{self, MigrationError};
use crate::pool::{ConnectionPool, PoolError, PoolSettings};

/// Baseline schema, created idempotently before migrations run. The
/// vocabulary foreign key is enforced by the pool's `foreign_keys` pragma;
/// there is no cascade, deletion cleans up explicitly.
const BASELINE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS songs (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    artist TEXT,
    lyrics TEXT NOT NULL,
    romaji_lyrics TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS vocabulary (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    song_id TEXT NOT NULL REFERENCES songs (id),
    kanji TEXT NOT NULL CHECK (kanji <> ''),
    romaji TEXT NOT NULL,
    english TEXT NOT NULL,
    parts_json TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (song_id, kanji)
);
";

/// Errors that can occur while opening a store. All are fatal: the layer
/// must not serve traffic against an unopened or unmigrated schema.
#[derive(Debug, Error)]
pub enum InitError {
    /// The database file could not be opened or created.
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },

    /// The baseline schema could not be created.
    #[error("failed to create baseline schema: {0}")]
    Schema(rusqlite::Error),

    /// A migration failed (rolled back in full).
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// The connection pool could not be populated.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors from save/get/search operations after a successful init.
///
/// These surface to the caller of the one failing operation; they do not
/// poison the pool or other in-flight operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A database operation failed.
    #[error("storage database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization of a `parts` column failed.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A pooled handle could not be checked out.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// The song-vocabulary store: schema owner, migration runner, and
/// connection-pooled data access API.
///
/// Construct one per database file and share it by reference; all methods
/// take `&self` and are safe to call from multiple threads.
#[derive(Debug)]
pub struct Storage {
    db_path: PathBuf,
    pool: ConnectionPool,
}

impl Storage {
    /// Opens (creating if absent) the store at `db_path` with default pool
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns `InitError` if the file cannot be opened, the baseline
    /// schema cannot be created, a migration fails, or the pool cannot be
    /// populated.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, InitError> {
        Self::open_with(db_path, PoolSettings::default())
    }

    /// Opens the store with explicit [`PoolSettings`].
    ///
    /// Startup is two-phase: baseline schema and migrations run on a
    /// dedicated connection first, then the pool is populated. Schema is
    /// never mutated once pooled traffic is possible.
    ///
    /// # Errors
    ///
    /// See [`Storage::open`].
    pub fn open_with(
        db_path: impl AsRef<Path>,
        settings: PoolSettings,
    ) -> Result<Self, InitError> {
        let db_path = db_path.as_ref().to_path_buf();
        tracing::info!(path = %db_path.display(), "opening song-vocabulary store");

        let conn = Connection::open(&db_path).map_err(|e| InitError::Open {
            path: db_path.display().to_string(),
            source: e,
        })?;
        conn.execute_batch(BASELINE_SCHEMA)
            .map_err(InitError::Schema)?;
        let applied = migrations::run_migrations(&conn, migrations::CATALOG)?;
        drop(conn);

        if applied > 0 {
            tracing::info!(applied, "schema migrations applied");
        }

        let pool = ConnectionPool::open(&db_path, settings)?;
        Ok(Self { db_path, pool })
    }

    /// Inserts or replaces a song, keyed by `song.id`.
    ///
    /// Returns `Ok(false)` without touching the database when a required
    /// field (`id`, `title`, `lyrics`) is empty. An existing row has every
    /// content field replaced; `created_at` keeps its original value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure.
    pub fn save_song(&self, song: &NewSong) -> Result<bool, StorageError> {
        if !song.has_required_fields() {
            tracing::warn!(song_id = %song.id, "rejecting song with missing required fields");
            return Ok(false);
        }

        let conn = self.pool.acquire()?;
        conn.execute(
            "INSERT INTO songs (id, title, artist, lyrics, romaji_lyrics)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                 title = excluded.title,
                 artist = excluded.artist,
                 lyrics = excluded.lyrics,
                 romaji_lyrics = excluded.romaji_lyrics",
            params![
                song.id,
                song.title,
                song.artist,
                song.lyrics,
                song.romaji_lyrics
            ],
        )?;

        tracing::info!(song_id = %song.id, "song saved");
        Ok(true)
    }

    /// Upserts a batch of vocabulary items for `song_id`, keyed by
    /// `(song_id, kanji)`, in one transaction.
    ///
    /// Either every item in the call becomes visible or none does; a
    /// failure part-way through rolls the whole batch back.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure, on a constraint violation
    /// (empty kanji, unknown `song_id`), or if a `parts` value cannot be
    /// serialised.
    pub fn save_vocabulary(
        &self,
        song_id: &str,
        items: &[NewVocabularyItem],
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO vocabulary (song_id, kanji, romaji, english, parts_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (song_id, kanji) DO UPDATE SET
                     romaji = excluded.romaji,
                     english = excluded.english,
                     parts_json = excluded.parts_json",
            )?;
            for item in items {
                let parts_json = serde_json::to_string(&item.parts)?;
                stmt.execute(params![
                    song_id,
                    item.kanji,
                    item.romaji,
                    item.english,
                    parts_json
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(song_id, count = items.len(), "vocabulary saved");
        Ok(())
    }

    /// Looks up a song by ID. `Ok(None)` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure.
    pub fn get_song(&self, song_id: &str) -> Result<Option<Song>, StorageError> {
        let conn = self.pool.acquire()?;
        let song = conn
            .query_row(
                "SELECT id, title, artist, lyrics, romaji_lyrics, created_at
                 FROM songs WHERE id = ?1",
                params![song_id],
                song_from_row,
            )
            .optional()?;
        Ok(song)
    }

    /// Returns a song's vocabulary in insertion order; empty when the song
    /// is unknown or has none.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure.
    pub fn get_vocabulary(&self, song_id: &str) -> Result<Vec<VocabularyItem>, StorageError> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT id, song_id, kanji, romaji, english, parts_json, created_at
             FROM vocabulary WHERE song_id = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![song_id], vocabulary_from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Substring search over song title and artist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure.
    pub fn search_songs(&self, query: &str) -> Result<Vec<Song>, StorageError> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, artist, lyrics, romaji_lyrics, created_at
             FROM songs
             WHERE title LIKE ?1 OR artist LIKE ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![like_pattern(query)], song_from_row)?;

        let mut songs = Vec::new();
        for row in rows {
            songs.push(row?);
        }
        Ok(songs)
    }

    /// Substring search over vocabulary kanji, romaji, and english, each
    /// hit joined with its owning song's title and artist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure.
    pub fn search_vocabulary(&self, query: &str) -> Result<Vec<VocabularySearchHit>, StorageError> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.song_id, v.kanji, v.romaji, v.english, v.parts_json, v.created_at,
                    s.title, s.artist
             FROM vocabulary v
             JOIN songs s ON v.song_id = s.id
             WHERE v.kanji LIKE ?1 OR v.romaji LIKE ?1 OR v.english LIKE ?1
             ORDER BY v.id",
        )?;
        let rows = stmt.query_map(params![like_pattern(query)], |row| {
            Ok(VocabularySearchHit {
                item: vocabulary_from_row(row)?,
                song_title: row.get(7)?,
                song_artist: row.get(8)?,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    /// Deletes a song and its vocabulary in one transaction. Returns
    /// whether a song row existed.
    ///
    /// Vocabulary goes first: the schema declares the foreign key without
    /// a cascade, so referential cleanup is explicit here.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure.
    pub fn delete_song(&self, song_id: &str) -> Result<bool, StorageError> {
        let mut conn = self.pool.acquire()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM vocabulary WHERE song_id = ?1", params![song_id])?;
        let deleted = tx.execute("DELETE FROM songs WHERE id = ?1", params![song_id])?;
        tx.commit()?;

        if deleted > 0 {
            tracing::info!(song_id, "song deleted");
        }
        Ok(deleted > 0)
    }

    /// Snapshots the store into a `backups/` directory next to the
    /// database file. Returns the snapshot path.
    ///
    /// # Errors
    ///
    /// Returns `BackupError`; the live store is unaffected by a failure.
    pub fn backup(&self) -> Result<PathBuf, BackupError> {
        let dest = match self.db_path.parent() {
            Some(parent) => parent.join("backups"),
            None => PathBuf::from("backups"),
        };
        backup::create_backup(&self.db_path, &dest)
    }

    /// Snapshots the store into an explicit directory.
    ///
    /// # Errors
    ///
    /// Returns `BackupError`; the live store is unaffected by a failure.
    pub fn backup_to(&self, dest_dir: &Path) -> Result<PathBuf, BackupError> {
        backup::create_backup(&self.db_path, dest_dir)
    }

    /// Closes every pooled handle. Later operations fail with
    /// [`PoolError::Closed`].
    pub fn close(&self) {
        self.pool.close_all();
    }

    /// The database file this store is bound to.
    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

fn like_pattern(query: &str) -> String {
    format!("%{query}%")
}

fn song_from_row(row: &Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        lyrics: row.get(3)?,
        romaji_lyrics: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn vocabulary_from_row(row: &Row<'_>) -> rusqlite::Result<VocabularyItem> {
    let parts_json: String = row.get(5)?;
    let parts: Vec<VocabPart> = serde_json::from_str(&parts_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(VocabularyItem {
        id: row.get(0)?,
        song_id: row.get(1)?,
        kanji: row.get(2)?,
        romaji: row.get(3)?,
        english: row.get(4)?,
        parts,
        created_at: row.get(6)?,
    })
}
