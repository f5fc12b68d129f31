use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::domain::{
    doc_id_for, ClaimKind, ClaimOutcome, IdempotencyRecord, IdempotencyStatus,
    NewIdempotencyRecord, Position, ResultSummary, Venue,
};
use crate::error::{ExecutorError, Result};
use crate::persistence::{decode_position, encode_position, IdempotencyStore, PositionStore};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn summary_from_json(value: Option<Value>) -> Option<ResultSummary> {
    value.and_then(|v| serde_json::from_value(v).ok())
}

// ==================== Positions ====================

#[async_trait]
impl PositionStore for PostgresStore {
    #[instrument(skip(self))]
    async fn load(&self, venue: Venue, symbol: &str) -> Result<Position> {
        let row = sqlx::query(
            r#"
            SELECT revision, document, updated_at
            FROM positions WHERE doc_id = $1
            "#,
        )
        .bind(doc_id_for(venue, symbol))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(Position::new(venue, symbol));
        };

        let mut position = decode_position(venue, symbol, row.get("document"))?;
        // Column values are authoritative over the embedded copies
        position.revision = row.get("revision");
        let updated_at: DateTime<Utc> = row.get("updated_at");
        position.updated_at_ms = Some(updated_at.timestamp_millis());
        Ok(position)
    }

    #[instrument(skip(self, position), fields(doc_id = %position.doc_id(), expected = position.revision))]
    async fn save(&self, position: &Position) -> Result<Position> {
        let doc_id = position.doc_id();
        let expected = position.revision;
        let mut stored = position.clone();
        stored.revision = expected + 1;
        stored.updated_at_ms = None;
        let document = encode_position(&stored)?;

        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT revision FROM positions WHERE doc_id = $1 FOR UPDATE")
                .bind(&doc_id)
                .fetch_optional(&mut *tx)
                .await?;

        let found = current.unwrap_or(0);
        if found != expected {
            return Err(ExecutorError::RevisionConflict {
                doc_id,
                expected,
                found,
            });
        }

        let updated_at: DateTime<Utc> = if current.is_some() {
            sqlx::query_scalar(
                r#"
                UPDATE positions
                SET revision = $2, document = $3, updated_at = NOW()
                WHERE doc_id = $1 AND revision = $4
                RETURNING updated_at
                "#,
            )
            .bind(&doc_id)
            .bind(stored.revision)
            .bind(&document)
            .bind(expected)
            .fetch_one(&mut *tx)
            .await?
        } else {
            // No row to lock: a concurrent first write surfaces as a unique violation
            let inserted = sqlx::query_scalar(
                r#"
                INSERT INTO positions (doc_id, venue, symbol, revision, document, updated_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                RETURNING updated_at
                "#,
            )
            .bind(&doc_id)
            .bind(position.venue.as_str())
            .bind(&position.symbol)
            .bind(stored.revision)
            .bind(&document)
            .fetch_one(&mut *tx)
            .await;
            match inserted {
                Ok(ts) => ts,
                Err(e) if is_unique_violation(&e) => {
                    return Err(ExecutorError::RevisionConflict {
                        doc_id,
                        expected,
                        found: expected + 1,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        };

        tx.commit().await?;
        stored.updated_at_ms = Some(updated_at.timestamp_millis());
        debug!(revision = stored.revision, "position saved");
        Ok(stored)
    }

    async fn delete(&self, venue: Venue, symbol: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM positions WHERE doc_id = $1")
            .bind(doc_id_for(venue, symbol))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== Idempotency ====================

#[async_trait]
impl IdempotencyStore for PostgresStore {
    #[instrument(skip(self, record), fields(key = %record.key))]
    async fn claim(&self, record: NewIdempotencyRecord) -> Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO executor_idempotency
            (key, status, summary, venue, mode, symbol, side, client_order_id, rid,
             created_at_ms, updated_at_ms, expires_at_ms)
            VALUES ($1, 'IN_PROGRESS', NULL, $2, $3, $4, $5, $6, $7, $8, $8, $9)
            ON CONFLICT (key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(&record.key)
        .bind(&record.venue)
        .bind(&record.mode)
        .bind(&record.symbol)
        .bind(&record.side)
        .bind(&record.client_order_id)
        .bind(&record.rid)
        .bind(record.now_ms)
        .bind(record.expires_at_ms)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_some() {
            tx.commit().await?;
            return Ok(ClaimOutcome::Claimed {
                key: record.key,
                kind: ClaimKind::Created,
            });
        }

        let row = sqlx::query(
            r#"
            SELECT status, summary, expires_at_ms
            FROM executor_idempotency WHERE key = $1
            FOR UPDATE
            "#,
        )
        .bind(&record.key)
        .fetch_one(&mut *tx)
        .await?;

        let status: String = row.get("status");
        let status: IdempotencyStatus = status.parse().map_err(ExecutorError::Internal)?;
        let expires_at_ms: i64 = row.get("expires_at_ms");

        let reopen = if expires_at_ms <= record.now_ms {
            Some(ClaimKind::Expired)
        } else if status == IdempotencyStatus::Failed {
            Some(ClaimKind::Reopened)
        } else {
            None
        };

        let outcome = match reopen {
            Some(kind) => {
                let reset_expiry = kind == ClaimKind::Expired;
                sqlx::query(
                    r#"
                    UPDATE executor_idempotency
                    SET status = 'IN_PROGRESS',
                        summary = NULL,
                        rid = $2,
                        updated_at_ms = $3,
                        created_at_ms = CASE WHEN $5 THEN $3 ELSE created_at_ms END,
                        expires_at_ms = CASE WHEN $5 THEN $4 ELSE expires_at_ms END
                    WHERE key = $1
                    "#,
                )
                .bind(&record.key)
                .bind(&record.rid)
                .bind(record.now_ms)
                .bind(record.expires_at_ms)
                .bind(reset_expiry)
                .execute(&mut *tx)
                .await?;
                ClaimOutcome::Claimed {
                    key: record.key,
                    kind,
                }
            }
            None if status == IdempotencyStatus::Succeeded => ClaimOutcome::Succeeded {
                key: record.key,
                summary: summary_from_json(row.get("summary")),
            },
            None => ClaimOutcome::InProgress { key: record.key },
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn finalize(
        &self,
        key: &str,
        status: IdempotencyStatus,
        summary: &ResultSummary,
        now_ms: i64,
    ) -> Result<()> {
        let summary = serde_json::to_value(summary)?;
        let result = sqlx::query(
            r#"
            UPDATE executor_idempotency
            SET status = $2, summary = $3, updated_at_ms = $4
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(status.as_str())
        .bind(&summary)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExecutorError::Internal(format!(
                "idempotency record {} vanished before finalize",
                key
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, status, summary, venue, mode, symbol, side, client_order_id, rid,
                   created_at_ms, updated_at_ms, expires_at_ms
            FROM executor_idempotency WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.get("status");
        Ok(Some(IdempotencyRecord {
            key: row.get("key"),
            status: status.parse().map_err(ExecutorError::Internal)?,
            summary: summary_from_json(row.get("summary")),
            venue: row.get("venue"),
            mode: row.get("mode"),
            symbol: row.get("symbol"),
            side: row.get("side"),
            client_order_id: row.get("client_order_id"),
            rid: row.get("rid"),
            created_at_ms: row.get("created_at_ms"),
            updated_at_ms: row.get("updated_at_ms"),
            expires_at_ms: row.get("expires_at_ms"),
        }))
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM executor_idempotency WHERE expires_at_ms <= $1")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
