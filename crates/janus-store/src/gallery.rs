//! Enrolled face gallery.
//!
//! Records are immutable once written; re-enrollment is remove + append.
//! Embeddings are stored as AES-GCM-sealed little-endian f32 blobs.

use crate::crypto::EmbeddingSealer;
use crate::StoreError;
use janus_core::{Embedding, EnrolledFace};
use std::sync::Arc;
use tokio_rusqlite::Connection;

/// Encode an embedding as little-endian f32 bytes.
pub fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.values.len() * 4);
    for v in &embedding.values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode little-endian f32 bytes back into an embedding.
pub fn decode_embedding(bytes: &[u8]) -> Result<Embedding, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::BadBlob(format!(
            "length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding { values })
}

/// Gallery store over the shared database connection.
#[derive(Clone)]
pub struct GalleryStore {
    conn: Connection,
    sealer: Arc<EmbeddingSealer>,
}

impl GalleryStore {
    pub(crate) fn new(conn: Connection, sealer: Arc<EmbeddingSealer>) -> Self {
        Self { conn, sealer }
    }

    /// All enrolled faces, ordered by id (enrollment order).
    pub async fn list(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        let rows: Vec<(i64, String, Vec<u8>, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, embedding, created_at FROM faces ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut faces = Vec::with_capacity(rows.len());
        for (id, name, blob, created_at) in rows {
            let plain = self.sealer.open(&blob)?;
            let embedding = decode_embedding(&plain)?;
            faces.push(EnrolledFace { id, name, embedding, created_at });
        }
        Ok(faces)
    }

    /// Append a new enrolled face, returning its id.
    pub async fn append(&self, name: &str, embedding: &Embedding) -> Result<i64, StoreError> {
        let sealed = self.sealer.seal(&encode_embedding(embedding))?;
        let name = name.to_string();
        let created_at = chrono::Utc::now().to_rfc3339();

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO faces (name, embedding, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![name, sealed, created_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        tracing::info!(id, "enrolled face appended");
        Ok(id)
    }

    /// Remove an enrolled face. Returns false when the id does not exist.
    pub async fn remove(&self, id: i64) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM faces WHERE id = ?1", rusqlite::params![id])?)
            })
            .await?;
        if changed > 0 {
            tracing::info!(id, "enrolled face removed");
        }
        Ok(changed > 0)
    }

    /// Number of enrolled faces.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?)
            })
            .await?;
        Ok(n as u64)
    }
}
