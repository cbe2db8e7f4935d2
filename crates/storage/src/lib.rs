//! Local persistence for the annotation engine.
//!
//! All durable data lives in one SQLite key-value table of named slots.
//! Each slot is written with a single `INSERT OR REPLACE`, so a write either
//! fully replaces the slot or leaves the previous value intact; the persisted
//! queue and snapshots stay self-consistent even if the process dies
//! mid-save.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::warn;

use shared::domain::{DeviceIdentity, PendingDeletion, PersistedState};

pub mod migrate;

/// Canonical versioned snapshot.
const SLOT_STATE: &str = "state";
/// Normalized result of an in-progress migration, written before the
/// canonical slot is overwritten so a crash mid-migration is recoverable.
const SLOT_PENDING_MIGRATION: &str = "state.pending-migration";
/// Manual-recovery copy written before merge-heavy saves.
const SLOT_BACKUP: &str = "state.backup";
const SLOT_DELETION_QUEUE: &str = "deletion-queue";
const SLOT_DEVICE_IDENTITY: &str = "device-identity";

#[derive(Clone)]
pub struct LocalStateStore {
    pool: Pool<Sqlite>,
}

impl LocalStateStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens a distinct database,
        // so the in-memory case must stay on a single connection.
        let max_connections = if database_url == "sqlite::memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS slots (
                slot_key   TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&pool)
        .await
        .context("failed to ensure slots table exists")?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Loads the canonical snapshot, migrating older schema versions forward.
    ///
    /// Migration is pure and synchronous; only the slot reads/writes suspend.
    /// A corrupt or unreadably-new snapshot degrades to `None` with a warning
    /// rather than failing startup.
    pub async fn load(&self) -> Result<Option<PersistedState>> {
        let Some(raw) = self.read_slot_raw(SLOT_STATE).await? else {
            return Ok(None);
        };

        let doc: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("canonical snapshot is not valid JSON, starting empty: {err}");
                return Ok(None);
            }
        };

        match migrate::migrate_to_current(doc) {
            Ok(outcome) => {
                if outcome.upgraded {
                    // Pending slot first: if we die between the two writes the
                    // normalized snapshot is still recoverable.
                    self.write_slot(SLOT_PENDING_MIGRATION, &outcome.state)
                        .await?;
                    self.write_slot(SLOT_STATE, &outcome.state).await?;
                    self.delete_slot(SLOT_PENDING_MIGRATION).await?;
                }
                Ok(Some(outcome.state))
            }
            Err(err) => {
                warn!("snapshot migration failed, starting empty: {err}");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        self.write_slot(SLOT_STATE, state).await
    }

    /// Writes the manual-recovery backup slot. Called before merge-heavy
    /// saves overwrite the canonical slot.
    pub async fn backup(&self, state: &PersistedState) -> Result<()> {
        self.write_slot(SLOT_BACKUP, state).await
    }

    pub async fn backup_snapshot(&self) -> Result<Option<PersistedState>> {
        self.read_slot(SLOT_BACKUP).await
    }

    pub async fn pending_migration_snapshot(&self) -> Result<Option<PersistedState>> {
        self.read_slot(SLOT_PENDING_MIGRATION).await
    }

    pub async fn clear_pending_migration_snapshot(&self) -> Result<()> {
        self.delete_slot(SLOT_PENDING_MIGRATION).await
    }

    pub async fn load_deletion_queue(&self) -> Result<Vec<PendingDeletion>> {
        Ok(self
            .read_slot::<Vec<PendingDeletion>>(SLOT_DELETION_QUEUE)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_deletion_queue(&self, queue: &[PendingDeletion]) -> Result<()> {
        self.write_slot(SLOT_DELETION_QUEUE, &queue).await
    }

    pub async fn load_identity(&self) -> Result<Option<DeviceIdentity>> {
        self.read_slot(SLOT_DEVICE_IDENTITY).await
    }

    pub async fn save_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        self.write_slot(SLOT_DEVICE_IDENTITY, identity).await
    }

    pub async fn clear_identity(&self) -> Result<()> {
        self.delete_slot(SLOT_DEVICE_IDENTITY).await
    }

    async fn read_slot_raw(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT payload FROM slots WHERE slot_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn read_slot<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.read_slot_raw(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(slot = key, "dropping unreadable slot payload: {err}");
                Ok(None)
            }
        }
    }

    async fn write_slot<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)
            .with_context(|| format!("failed to serialize slot '{key}'"))?;
        sqlx::query(
            "INSERT INTO slots (slot_key, payload, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(slot_key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_slot(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM slots WHERE slot_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
