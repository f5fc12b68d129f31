//! Persistence layer for position ledgers and idempotency records
//!
//! Two async store seams, each with an in-memory and a PostgreSQL backend:
//! - `PositionStore` keeps one revision-guarded document per (venue, symbol)
//! - `IdempotencyStore` claims and finalizes request keys atomically

pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::adapters::memory::{MemoryIdempotencyStore, MemoryPositionStore};
use crate::adapters::postgres::PostgresStore;
use crate::config::{StoreBackend, StoreConfig};
use crate::domain::{
    ClaimOutcome, IdempotencyRecord, IdempotencyStatus, NewIdempotencyRecord, Position,
    ResultSummary, Venue,
};
use crate::error::{ExecutorError, Result};

pub use schema::{decode_position, encode_position, SCHEMA_VERSION};

/// Revision-guarded position documents
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Load the document, or a zero position at revision 0 when absent.
    /// Legacy flat documents are upgraded on read.
    async fn load(&self, venue: Venue, symbol: &str) -> Result<Position>;

    /// Write `position` if the stored revision still equals `position.revision`.
    ///
    /// Returns the stored copy with the incremented revision and the
    /// store-assigned timestamp. A mismatch fails with `RevisionConflict`
    /// and leaves the stored document untouched.
    async fn save(&self, position: &Position) -> Result<Position>;

    /// Remove the document. Returns whether one existed.
    async fn delete(&self, venue: Venue, symbol: &str) -> Result<bool>;
}

/// Atomic claim/finalize over idempotency keys
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Create the record IN_PROGRESS, or report what already holds the key.
    /// FAILED and expired records are taken over.
    async fn claim(&self, record: NewIdempotencyRecord) -> Result<ClaimOutcome>;

    async fn finalize(
        &self,
        key: &str,
        status: IdempotencyStatus,
        summary: &ResultSummary,
        now_ms: i64,
    ) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Delete records whose `expires_at_ms` is at or before `now_ms`.
    async fn purge_expired(&self, now_ms: i64) -> Result<u64>;
}

/// Both stores for the configured backend
#[derive(Clone)]
pub struct Stores {
    pub positions: Arc<dyn PositionStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            positions: Arc::new(MemoryPositionStore::new()),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
        }
    }

    /// Connect the configured backend, running migrations for PostgreSQL.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            StoreBackend::Memory => {
                info!(backend = "memory", "state store ready");
                Ok(Self::memory())
            }
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| {
                        ExecutorError::Internal("store.database_url is not set".to_string())
                    })?;
                let store = PostgresStore::new(url, config.max_connections).await?;
                store.migrate().await?;
                info!(backend = "postgres", "state store ready");
                let store = Arc::new(store);
                Ok(Self {
                    positions: store.clone(),
                    idempotency: store,
                })
            }
        }
    }
}
