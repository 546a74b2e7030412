//! Content-addressed jingle cache.
//!
//! Jingle texts repeat every bulletin, so their synthesized audio is
//! cached under a SHA-256 hash of the text. A repeated jingle never
//! touches the synthesis service again.

use crate::error::Result;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};
use wavecast_core::epoch_ms;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS jingles (
    content_hash TEXT PRIMARY KEY,
    audio BLOB NOT NULL,
    created_at INTEGER NOT NULL
);
";

/// Hex SHA-256 of a jingle text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut acc, byte| {
        use std::fmt::Write;
        let _ = write!(acc, "{byte:02x}");
        acc
    })
}

/// SQLite-backed jingle audio cache.
pub struct JingleCache {
    conn: Connection,
}

impl JingleCache {
    /// Open the cache at the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub async fn new() -> Result<Self> {
        let path = wavecast_core::paths::jingle_cache_db_path();
        Self::open(&path).await
    }

    /// Open a cache at a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening jingle cache database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Look up cached audio by content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        debug!("Jingle cache lookup for {hash}");
        let hash = hash.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare_cached("SELECT audio FROM jingles WHERE content_hash = ?1")?;
                let result = stmt
                    .query_row(rusqlite::params![hash], |row| row.get::<_, Vec<u8>>(0))
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    /// Store synthesized jingle audio under its content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn store(&self, hash: &str, audio: &[u8]) -> Result<()> {
        let hash = hash.to_string();
        let audio = audio.to_vec();
        let created_at = epoch_ms();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO jingles (content_hash, audio, created_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![hash, audio, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_and_distinct() {
        let a = content_hash("Wavecast news, on the hour");
        let b = content_hash("Wavecast news, on the hour");
        let c = content_hash("Breaking news from Wavecast");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JingleCache::open(&dir.path().join("jingles.db"))
            .await
            .unwrap();

        let hash = content_hash("opening jingle");
        assert!(cache.get(&hash).await.unwrap().is_none());

        cache.store(&hash, b"jingle-bytes").await.unwrap();
        assert_eq!(
            cache.get(&hash).await.unwrap().as_deref(),
            Some(b"jingle-bytes".as_slice())
        );
    }

    #[tokio::test]
    async fn test_store_replaces_existing_audio() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JingleCache::open(&dir.path().join("jingles.db"))
            .await
            .unwrap();

        let hash = content_hash("jingle");
        cache.store(&hash, b"old").await.unwrap();
        cache.store(&hash, b"new").await.unwrap();
        assert_eq!(
            cache.get(&hash).await.unwrap().as_deref(),
            Some(b"new".as_slice())
        );
    }
}
