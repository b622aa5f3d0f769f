//! Administrator credentials.
//!
//! Passwords are stored as salted SHA-256 digests. This store backs the
//! opaque authorization check for remote unlock and enrollment; it never
//! logs credential material.

use crate::StoreError;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio_rusqlite::Connection;

const SALT_LEN: usize = 16;

/// Administrator credential store over the shared database connection.
#[derive(Clone)]
pub struct AdminStore {
    conn: Connection,
}

impl AdminStore {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Create or replace an administrator's credentials.
    pub async fn upsert(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let digest = hash_password(&salt, password);
        let salt_hex = to_hex(&salt);
        let username = username.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO administrators (username, salt, digest) VALUES (?1, ?2, ?3)
                     ON CONFLICT(username) DO UPDATE SET salt = ?2, digest = ?3",
                    rusqlite::params![username, salt_hex, digest],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Verify a username/password pair. Unknown users verify false.
    pub async fn verify(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let username = username.to_string();
        let row: Option<(String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT salt, digest FROM administrators WHERE username = ?1",
                )?;
                let mut rows = stmt
                    .query_map(rusqlite::params![username], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows.pop())
            })
            .await?;

        let Some((salt_hex, stored_digest)) = row else {
            return Ok(false);
        };
        let Some(salt) = from_hex(&salt_hex) else {
            return Ok(false);
        };

        let digest = hash_password(&salt, password);
        Ok(eq_constant_time(digest.as_bytes(), stored_digest.as_bytes()))
    }

    /// Number of configured administrators.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM administrators", [], |row| row.get(0))?)
            })
            .await?;
        Ok(n as u64)
    }
}

fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Length-then-bytes comparison without early exit on mismatch.
fn eq_constant_time(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EmbeddingSealer;
    use crate::Store;
    use std::sync::Arc;

    async fn store() -> Store {
        Store::open_in_memory(Arc::new(EmbeddingSealer::new(&[0u8; 32])))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_verify_correct_password() {
        let store = store().await;
        store.admins().upsert("admin", "hunter2").await.unwrap();
        assert!(store.admins().verify("admin", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_wrong_password() {
        let store = store().await;
        store.admins().upsert("admin", "hunter2").await.unwrap();
        assert!(!store.admins().verify("admin", "hunter3").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_unknown_user() {
        let store = store().await;
        assert!(!store.admins().verify("ghost", "whatever").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_replaces_password() {
        let store = store().await;
        store.admins().upsert("admin", "old").await.unwrap();
        store.admins().upsert("admin", "new").await.unwrap();
        assert!(!store.admins().verify("admin", "old").await.unwrap());
        assert!(store.admins().verify("admin", "new").await.unwrap());
        assert_eq!(store.admins().count().await.unwrap(), 1);
    }

    #[test]
    fn test_hex_roundtrip() {
        let bytes = [0x00, 0x7f, 0xff, 0x10];
        assert_eq!(from_hex(&to_hex(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn test_eq_constant_time() {
        assert!(eq_constant_time(b"abc", b"abc"));
        assert!(!eq_constant_time(b"abc", b"abd"));
        assert!(!eq_constant_time(b"abc", b"abcd"));
    }
}
