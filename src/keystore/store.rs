//! Persistence for encrypted key records.
//!
//! The database is the source of truth; there is no in-memory key cache.
//! Private bytes are stored only in their encrypted form and never leave this
//! module except as ciphertext handed back to the keystore for signing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::{Curve, KeyFamily};
use crate::error::Error;
use crate::types::{self, Page, Tags};

/// A key row as persisted, including the encrypted private material.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct KeyRow {
    pub id: String,
    pub name: String,
    pub family: String,
    pub curve: Option<String>,
    pub encrypted_private: Vec<u8>,
    pub public_bytes: Option<Vec<u8>>,
    pub tags: String,
    pub created_at: DateTime<Utc>,
}

impl KeyRow {
    pub fn family(&self) -> Result<KeyFamily, Error> {
        self.family.parse()
    }

    pub fn curve(&self) -> Result<Option<Curve>, Error> {
        self.curve.as_deref().map(str::parse).transpose()
    }

    pub fn tags(&self) -> Tags {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyCursor {
    created_at: DateTime<Utc>,
    id: String,
}

/// Key-table repository.
#[derive(Debug, Clone)]
pub(super) struct KeyStore {
    pool: SqlitePool,
}

impl KeyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new row; `name` uniqueness is enforced by the index.
    pub async fn insert(&self, row: &KeyRow) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO keys (id, name, family, curve, encrypted_private, public_bytes, tags, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.family)
        .bind(&row.curve)
        .bind(&row.encrypted_private)
        .bind(&row.public_bytes)
        .bind(&row.tags)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::KeyAlreadyExists(row.name.clone())
            }
            _ => Error::Database(e),
        })?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<KeyRow, Error> {
        sqlx::query_as::<_, KeyRow>("SELECT * FROM keys WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::KeyNotFound(id.to_string()))
    }

    /// Page through keys in creation order.
    pub async fn list(&self, limit: u32, token: Option<&str>) -> Result<Page<KeyRow>, Error> {
        let limit = limit.clamp(1, 1000);
        let cursor: Option<KeyCursor> = token.map(types::decode_token).transpose()?;
        let rows = match cursor {
            Some(cursor) => {
                sqlx::query_as::<_, KeyRow>(
                    "SELECT * FROM keys WHERE (created_at, id) > (?1, ?2) \
                     ORDER BY created_at, id LIMIT ?3",
                )
                .bind(cursor.created_at)
                .bind(&cursor.id)
                .bind(i64::from(limit) + 1)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, KeyRow>(
                    "SELECT * FROM keys ORDER BY created_at, id LIMIT ?1",
                )
                .bind(i64::from(limit) + 1)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut items = rows;
        let next_token = if items.len() > limit as usize {
            items.truncate(limit as usize);
            items.last().map(|last| {
                types::encode_token(&KeyCursor {
                    created_at: last.created_at,
                    id: last.id.clone(),
                })
            })
        } else {
            None
        };
        Ok(Page { items, next_token })
    }

    /// Update mutable metadata. Family, curve, and key bytes are immutable.
    pub async fn update_meta(&self, id: &str, name: &str, tags: &Tags) -> Result<(), Error> {
        let tags = serde_json::to_string(tags).expect("tags serialize");
        let result = sqlx::query("UPDATE keys SET name = ?1, tags = ?2 WHERE id = ?3")
            .bind(name)
            .bind(tags)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    Error::KeyAlreadyExists(name.to_string())
                }
                _ => Error::Database(e),
            })?;
        if result.rows_affected() == 0 {
            return Err(Error::KeyNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        let result = sqlx::query("DELETE FROM keys WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::KeyNotFound(id.to_string()));
        }
        Ok(())
    }
}
