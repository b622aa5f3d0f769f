//! janus-store: SQLite persistence for the door controller.
//!
//! Two tables: the enrolled face gallery (embeddings sealed with
//! AES-256-GCM at rest) and administrator credentials (salted SHA-256
//! digests). All access goes through `tokio-rusqlite` so the async
//! daemon never blocks on database I/O.

pub mod admin;
pub mod cache;
pub mod crypto;
pub mod gallery;

pub use admin::AdminStore;
pub use cache::GalleryCache;
pub use crypto::{CryptoError, EmbeddingSealer};
pub use gallery::GalleryStore;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("embedding blob malformed: {0}")]
    BadBlob(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the opened database, exposing the gallery and admin stores.
#[derive(Clone)]
pub struct Store {
    gallery: GalleryStore,
    admins: AdminStore,
}

impl Store {
    /// Open (or create) the database at `db_path`, sealing embeddings
    /// with the key at `key_path` (created on first run).
    pub async fn open(db_path: &Path, key_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let sealer = Arc::new(EmbeddingSealer::load_or_create(key_path)?);
        let conn = Connection::open(db_path).await?;
        Self::from_connection(conn, sealer).await
    }

    /// In-memory database, for tests and offline tooling.
    pub async fn open_in_memory(sealer: Arc<EmbeddingSealer>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::from_connection(conn, sealer).await
    }

    async fn from_connection(
        conn: Connection,
        sealer: Arc<EmbeddingSealer>,
    ) -> Result<Self, StoreError> {
        init_schema(&conn).await?;
        Ok(Self {
            gallery: GalleryStore::new(conn.clone(), sealer),
            admins: AdminStore::new(conn),
        })
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    pub fn admins(&self) -> &AdminStore {
        &self.admins
    }
}

async fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.call(|conn| {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS faces (
                 id         INTEGER PRIMARY KEY AUTOINCREMENT,
                 name       TEXT NOT NULL,
                 embedding  BLOB NOT NULL,
                 created_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS administrators (
                 id       INTEGER PRIMARY KEY AUTOINCREMENT,
                 username TEXT UNIQUE NOT NULL,
                 salt     TEXT NOT NULL,
                 digest   TEXT NOT NULL
             );",
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}
