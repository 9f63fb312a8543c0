//! Persistence for per-address tracker state
//!
//! The scheduler writes the tracker state after every processed signature. With
//! the SQLite store a restarted monitor resumes after the last emitted
//! transaction; with the in-memory store it starts fresh.

use crate::monitor::signature_tracker::TrackerState;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Storage contract for tracker state.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Load the saved state for `address`, if any.
    async fn load(&self, address: &str) -> Result<Option<TrackerState>>;

    /// Save the state for `address`. A state older (lower slot) than the stored one is ignored.
    async fn save(&self, address: &str, state: &TrackerState) -> Result<()>;
}

/// Process-local store; state is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryTrackerStore {
    states: RwLock<HashMap<String, TrackerState>>,
}

impl MemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackerStore for MemoryTrackerStore {
    async fn load(&self, address: &str) -> Result<Option<TrackerState>> {
        Ok(self.states.read().await.get(address).cloned())
    }

    async fn save(&self, address: &str, state: &TrackerState) -> Result<()> {
        let mut states = self.states.write().await;
        let stale = match (states.get(address).and_then(|s| s.last_processed_slot), state.last_processed_slot) {
            (Some(stored), Some(new)) => new < stored,
            _ => false,
        };
        if !stale {
            states.insert(address.to_string(), state.clone());
        }
        Ok(())
    }
}

#[derive(FromRow)]
struct TrackerStateRow {
    last_signature: String,
    last_slot: i64,
}

/// SQLite-backed store.
pub struct SqliteTrackerStore {
    pool: Pool<Sqlite>,
}

impl SqliteTrackerStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &str) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&format!("sqlite:{}?mode=rwc", path))
            .await
            .with_context(|| format!("Failed to open tracker database {}", path))?;

        let store = Self::with_pool(pool).await?;
        info!("Tracker state persisted to {}", path);
        Ok(store)
    }

    /// In-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory tracker database")?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: Pool<Sqlite>) -> Result<Arc<Self>> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracker_state (
                address TEXT PRIMARY KEY,
                last_signature TEXT NOT NULL,
                last_slot INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create tracker_state table")?;

        Ok(Arc::new(Self { pool }))
    }
}

#[async_trait]
impl TrackerStore for SqliteTrackerStore {
    async fn load(&self, address: &str) -> Result<Option<TrackerState>> {
        let row: Option<TrackerStateRow> = sqlx::query_as(
            "SELECT last_signature, last_slot FROM tracker_state WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load tracker state")?;

        Ok(row.map(|row| TrackerState::new(row.last_signature, row.last_slot.max(0) as u64)))
    }

    async fn save(&self, address: &str, state: &TrackerState) -> Result<()> {
        let (Some(signature), Some(slot)) = (&state.last_processed_signature, state.last_processed_slot) else {
            return Ok(());
        };

        let result = sqlx::query(
            r#"
            INSERT INTO tracker_state (address, last_signature, last_slot, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                last_signature = excluded.last_signature,
                last_slot = excluded.last_slot,
                updated_at = excluded.updated_at
            WHERE excluded.last_slot >= tracker_state.last_slot
            "#,
        )
        .bind(address)
        .bind(signature)
        .bind(slot as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to save tracker state")?;

        debug!(address, signature = %signature, slot, rows = result.rows_affected(), "Saved tracker state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryTrackerStore::new();
        assert!(store.load("a").await.unwrap().is_none());

        store.save("a", &TrackerState::new("S2", 2)).await.unwrap();
        assert_eq!(store.load("a").await.unwrap(), Some(TrackerState::new("S2", 2)));
    }

    #[tokio::test]
    async fn test_memory_store_ignores_older_state() {
        let store = MemoryTrackerStore::new();
        store.save("a", &TrackerState::new("S5", 5)).await.unwrap();
        store.save("a", &TrackerState::new("S3", 3)).await.unwrap();

        assert_eq!(store.load("a").await.unwrap(), Some(TrackerState::new("S5", 5)));
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip_and_forward_only() {
        let store = SqliteTrackerStore::in_memory().await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());

        store.save("a", &TrackerState::new("S2", 2)).await.unwrap();
        store.save("a", &TrackerState::new("S4", 4)).await.unwrap();
        store.save("a", &TrackerState::new("S3", 3)).await.unwrap();
        store.save("b", &TrackerState::new("T1", 1)).await.unwrap();

        assert_eq!(store.load("a").await.unwrap(), Some(TrackerState::new("S4", 4)));
        assert_eq!(store.load("b").await.unwrap(), Some(TrackerState::new("T1", 1)));
    }

    #[tokio::test]
    async fn test_sqlite_store_skips_empty_state() {
        let store = SqliteTrackerStore::in_memory().await.unwrap();
        store.save("a", &TrackerState::default()).await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
    }
}
