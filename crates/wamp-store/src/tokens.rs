use std::time::Duration;

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, instrument};

use wamp_core::errors::StorageError;
use wamp_core::identity::IdentityToken;
use wamp_core::storage::StorageDriver;

use crate::database::Database;
use crate::error::StoreError;

/// Identity cache backed by the `client_tokens` table.
///
/// Expiry is stored as unix milliseconds and checked on read. A row found
/// past its deadline is deleted by that read; `save` also sweeps every
/// expired row.
#[derive(Clone)]
pub struct SqliteDriver {
    db: Database,
}

impl SqliteDriver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Drop every row whose deadline has passed. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp_millis();
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM client_tokens WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                [now],
            )?)
        })
    }

    fn live_token(&self, key: &str) -> Result<Option<IdentityToken>, StoreError> {
        let now = Utc::now().timestamp_millis();
        let raw = self.db.with_conn(|conn| {
            let row: Option<(String, Option<i64>)> = conn
                .query_row(
                    "SELECT token, expires_at FROM client_tokens WHERE key = ?1",
                    [key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((_, Some(expires_at))) if expires_at <= now => {
                    conn.execute(
                        "DELETE FROM client_tokens WHERE key = ?1 AND expires_at <= ?2",
                        rusqlite::params![key, now],
                    )?;
                    debug!(key, "expired client token removed on read");
                    Ok(None)
                }
                Some((json, _)) => Ok(Some(json)),
                None => Ok(None),
            }
        })?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn deadline(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| {
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Utc::now().timestamp_millis().saturating_add(millis)
    })
}

impl StorageDriver for SqliteDriver {
    fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.live_token(key)?.is_some())
    }

    fn fetch(&self, key: &str) -> Result<Option<IdentityToken>, StorageError> {
        Ok(self.live_token(key)?)
    }

    #[instrument(skip(self, token))]
    fn save(&self, key: &str, token: IdentityToken, ttl: Option<Duration>) -> Result<(), StorageError> {
        let json = serde_json::to_string(&token).map_err(StoreError::from)?;
        let stored_at = Utc::now().to_rfc3339();
        let expires_at = deadline(ttl);

        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO client_tokens (key, token, stored_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(key) DO UPDATE SET
                        token = excluded.token,
                        stored_at = excluded.stored_at,
                        expires_at = excluded.expires_at",
                    rusqlite::params![key, json, stored_at, expires_at],
                )?;
                Ok(())
            })
            .map_err(StorageError::from)?;

        let swept = self.purge_expired()?;
        if swept > 0 {
            debug!(swept, "expired client tokens removed");
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = Utc::now().timestamp_millis();
        let removed = self.db.with_conn(|conn| {
            let live = conn.execute(
                "DELETE FROM client_tokens
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                rusqlite::params![key, now],
            )?;
            // An expired row may still be lying around under the same key.
            conn.execute("DELETE FROM client_tokens WHERE key = ?1", [key])?;
            Ok(live > 0)
        })?;
        Ok(removed)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM client_tokens", [])?;
            Ok(())
        })?;
        Ok(())
    }
}
