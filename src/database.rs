//! SQLite-backed vocabulary store.
//!
//! Holds the `word` table produced by a vocabulary import: one row per
//! lookup token with its type tag, source word and JSON metadata. Uses r2d2
//! connection pooling so concurrent analyses can look up words without
//! blocking each other; the async trait surface wraps the blocking calls in
//! `spawn_blocking`.

use std::path::Path;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use thiserror::Error;

use crate::vocab::{StoreError, VocabEntry, WordStore};

#[derive(Error, Debug)]
pub enum WordDbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Malformed word row {0}: {1}")]
    BadRow(i64, String),
}

pub type WordDbResult<T> = Result<T, WordDbError>;

/// Vocabulary store reading from a SQLite `word` table.
#[derive(Clone)]
pub struct SqliteWordStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteWordStore {
    /// Open or create a word database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> WordDbResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA mmap_size=67108864;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        let store = Self { pool };
        store.setup_schema()?;
        Ok(store)
    }

    /// Open an in-memory word database (for testing).
    #[cfg(test)]
    pub(crate) fn open_in_memory() -> WordDbResult<Self> {
        let manager = SqliteConnectionManager::memory();
        // In-memory needs a single connection to maintain state.
        let pool = Pool::builder().max_size(1).build(manager)?;
        let store = Self { pool };
        store.setup_schema()?;
        Ok(store)
    }

    fn get_conn(&self) -> WordDbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> WordDbResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS word (
                word_id INTEGER PRIMARY KEY,
                word_token TEXT NOT NULL,
                type TEXT NOT NULL,
                word TEXT,
                info TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_word_token ON word(word_token);
        "#,
        )?;
        Ok(())
    }

    /// Insert one vocabulary row. Used by the import side and by tests.
    pub fn add_word(
        &self,
        word_id: i64,
        word_token: &str,
        kind: char,
        word: Option<&str>,
        info: Option<&serde_json::Value>,
    ) -> WordDbResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO word (word_id, word_token, type, word, info) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                word_id,
                word_token,
                kind.to_string(),
                word,
                info.map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Number of vocabulary rows.
    pub fn count_words(&self) -> WordDbResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM word", [], |row| row.get(0))?)
    }

    /// Blocking lookup of all rows under `term`.
    fn fetch(&self, term: &str) -> WordDbResult<Vec<VocabEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT word_id, type, word, info FROM word WHERE word_token = ?1 ORDER BY word_id",
        )?;
        let rows = stmt.query_map(params![term], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, type_str, word, info_str) = row?;
            let kind = type_str
                .chars()
                .next()
                .ok_or_else(|| WordDbError::BadRow(id, "empty type tag".into()))?;
            let info = match info_str {
                Some(raw) => Some(
                    serde_json::from_str(&raw)
                        .map_err(|e| WordDbError::BadRow(id, format!("bad info JSON: {e}")))?,
                ),
                None => None,
            };
            entries.push(VocabEntry { id, kind, word, info, penalty: 0.0 });
        }
        Ok(entries)
    }
}

#[async_trait]
impl WordStore for SqliteWordStore {
    async fn lookup(&self, term: &str) -> Result<Vec<VocabEntry>, StoreError> {
        let store = self.clone();
        let term = term.to_string();
        tokio::task::spawn_blocking(move || store.fetch(&term))
            .await
            .map_err(|e| StoreError::Unavailable(format!("lookup task failed: {e}")))?
            .map_err(|e| match e {
                WordDbError::BadRow(..) => StoreError::Data(e.to_string()),
                other => StoreError::Unavailable(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_word_rows() {
        let store = SqliteWordStore::open_in_memory().unwrap();
        store.add_word(1, "foo", 'S', Some("FOO"), Some(&json!({"op": "in"}))).unwrap();
        store.add_word(2, "foo", 'w', Some("FOO"), None).unwrap();
        assert_eq!(store.count_words().unwrap(), 2);

        let entries = store.fetch("foo").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, 'S');
        assert_eq!(entries[0].info.as_ref().unwrap()["op"], "in");
        assert_eq!(entries[1].id, 2);
        assert!(store.fetch("bar").unwrap().is_empty());
    }

    #[tokio::test]
    async fn async_lookup_maps_rows() {
        let store = SqliteWordStore::open_in_memory().unwrap();
        store.add_word(7, "main", 'W', Some("Main"), None).unwrap();

        let entries = store.lookup("main").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 7);
        assert_eq!(entries[0].kind, 'W');
    }
}
