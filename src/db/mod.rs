//! Vector index store using SQLite and sqlite-vec.
//!
//! Connections come from an r2d2 pool so searches run concurrently with each
//! other; writes are serialized by SQLite. Every entry (metadata row plus
//! vector row) is written inside one transaction, so readers never observe
//! a half-written entry.
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use tracing::info;

use crate::error::EngineError;

pub mod entries;
pub mod models;
pub mod search;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL UNIQUE,
    subtopic_name TEXT NOT NULL,
    resource_name TEXT NOT NULL,
    resource_url TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    foundation_name TEXT NOT NULL,
    foundation_url TEXT NOT NULL,
    estimated_time TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    indexed_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_foundation ON resources(foundation_name);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn configure_file_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // WAL lets readers proceed while a rebuild is writing
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
}

/// Handle to the index store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (or create) the store at `path` with up to `pool_size` connections.
    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self, EngineError> {
        let path = path.as_ref();
        info!("Initializing index store: {}", path.display());

        init_sqlite_vec();
        let manager = SqliteConnectionManager::file(path).with_init(configure_file_connection);
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        Self::init(pool)
    }

    /// Open an in-memory store (useful for testing).
    ///
    /// Every in-memory connection is its own database, so the pool holds
    /// exactly one long-lived connection.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        init_sqlite_vec();
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .test_on_check_out(false)
            .build(manager)?;
        Self::init(pool)
    }

    fn init(pool: Pool<SqliteConnectionManager>) -> Result<Self, EngineError> {
        let conn = pool.get()?;

        // Verify sqlite-vec is loaded
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(SCHEMA_SQL)?;
        drop(conn);

        info!("Index store initialized successfully");
        Ok(Self { pool })
    }

    /// Health check: the store answers a trivial query.
    pub fn ping(&self) -> Result<(), EngineError> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_init() {
        let store = Store::open_in_memory().expect("Failed to open in-memory store");
        let conn = store.pool.get().unwrap();

        let tables: usize = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('index_meta', 'resources');",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_ping() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.ping().is_ok());
    }

    #[test]
    fn test_file_store_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("resources.db"), 2).unwrap();
        let conn = store.pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_file_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.db");
        {
            let store = Store::open(&path, 2).unwrap();
            store.ping().unwrap();
        }
        assert!(path.exists());
        let store = Store::open(&path, 2).unwrap();
        assert!(store.ping().is_ok());
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }
}
