//! In-process stores backed by `DashMap`.
//!
//! Each mutation runs under the map's per-key entry lock, so the
//! compare-and-set and claim semantics match the PostgreSQL backend.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::domain::{
    doc_id_for, ClaimKind, ClaimOutcome, IdempotencyRecord, IdempotencyStatus,
    NewIdempotencyRecord, Position, ResultSummary, Venue,
};
use crate::error::{ExecutorError, Result};
use crate::persistence::{decode_position, encode_position, IdempotencyStore, PositionStore};

/// Position documents keyed by `venue:symbol`
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    docs: DashMap<String, Value>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw document, e.g. a legacy flat one.
    pub fn insert_raw(&self, venue: Venue, symbol: &str, doc: Value) {
        self.docs.insert(doc_id_for(venue, symbol), doc);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

fn stored_revision(doc: &Value) -> i64 {
    doc.get("revision")
        .or_else(|| doc.get("rev"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn load(&self, venue: Venue, symbol: &str) -> Result<Position> {
        let doc = self
            .docs
            .get(&doc_id_for(venue, symbol))
            .map(|d| d.value().clone());
        match doc {
            Some(doc) => decode_position(venue, symbol, doc),
            None => Ok(Position::new(venue, symbol)),
        }
    }

    async fn save(&self, position: &Position) -> Result<Position> {
        let doc_id = position.doc_id();
        let expected = position.revision;

        let mut stored = position.clone();
        stored.revision = expected + 1;
        stored.updated_at_ms = Some(Utc::now().timestamp_millis());
        let encoded = encode_position(&stored)?;

        match self.docs.entry(doc_id.clone()) {
            Entry::Occupied(mut entry) => {
                let found = stored_revision(entry.get());
                if found != expected {
                    return Err(ExecutorError::RevisionConflict {
                        doc_id,
                        expected,
                        found,
                    });
                }
                entry.insert(encoded);
            }
            Entry::Vacant(entry) => {
                if expected != 0 {
                    return Err(ExecutorError::RevisionConflict {
                        doc_id,
                        expected,
                        found: 0,
                    });
                }
                entry.insert(encoded);
            }
        }
        Ok(stored)
    }

    async fn delete(&self, venue: Venue, symbol: &str) -> Result<bool> {
        Ok(self.docs.remove(&doc_id_for(venue, symbol)).is_some())
    }
}

/// Idempotency records keyed by idempotency key
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: DashMap<String, IdempotencyRecord>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn claim(&self, record: NewIdempotencyRecord) -> Result<ClaimOutcome> {
        let key = record.key.clone();
        match self.records.entry(key.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(IdempotencyRecord::from_new(&record));
                Ok(ClaimOutcome::Claimed {
                    key,
                    kind: ClaimKind::Created,
                })
            }
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(record.now_ms) {
                    entry.insert(IdempotencyRecord::from_new(&record));
                    return Ok(ClaimOutcome::Claimed {
                        key,
                        kind: ClaimKind::Expired,
                    });
                }
                let existing = entry.get_mut();
                match existing.status {
                    IdempotencyStatus::InProgress => Ok(ClaimOutcome::InProgress { key }),
                    IdempotencyStatus::Succeeded => Ok(ClaimOutcome::Succeeded {
                        key,
                        summary: existing.summary.clone(),
                    }),
                    IdempotencyStatus::Failed => {
                        existing.status = IdempotencyStatus::InProgress;
                        existing.summary = None;
                        existing.rid = record.rid;
                        existing.updated_at_ms = record.now_ms;
                        Ok(ClaimOutcome::Claimed {
                            key,
                            kind: ClaimKind::Reopened,
                        })
                    }
                }
            }
        }
    }

    async fn finalize(
        &self,
        key: &str,
        status: IdempotencyStatus,
        summary: &ResultSummary,
        now_ms: i64,
    ) -> Result<()> {
        match self.records.get_mut(key) {
            Some(mut record) => {
                record.status = status;
                record.summary = Some(summary.clone());
                record.updated_at_ms = now_ms;
                Ok(())
            }
            None => Err(ExecutorError::Internal(format!(
                "idempotency record {} vanished before finalize",
                key
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now_ms));
        Ok((before - self.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    fn new_record(key: &str, rid: &str, now_ms: i64) -> NewIdempotencyRecord {
        NewIdempotencyRecord {
            key: key.to_string(),
            venue: "testnet".to_string(),
            mode: "paper".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: "BUY".to_string(),
            client_order_id: Some("tv-1".to_string()),
            rid: rid.to_string(),
            now_ms,
            expires_at_ms: now_ms + 1_000,
        }
    }

    #[tokio::test]
    async fn test_load_absent_is_zero_position() {
        let store = MemoryPositionStore::new();
        let position = store.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.revision, 0);
        assert!(position.core.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_saves_from_same_snapshot_one_wins() {
        let store = Arc::new(MemoryPositionStore::new());
        let snapshot = store.load(Venue::Testnet, "BTCUSDT").await.unwrap();

        let mut a = snapshot.clone();
        a.core.apply_buy(dec!(1), dec!(100), dec!(0));
        let mut b = snapshot.clone();
        b.core.apply_buy(dec!(2), dec!(200), dec!(0));

        let (ra, rb) = tokio::join!(store.save(&a), store.save(&b));
        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
        let loser = if ra.is_ok() { rb } else { ra };
        assert!(matches!(
            loser,
            Err(ExecutorError::RevisionConflict {
                expected: 0,
                found: 1,
                ..
            })
        ));

        let reloaded = store.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(reloaded.revision, 1);
        assert!(reloaded.updated_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_stale_save_leaves_document_untouched() {
        let store = MemoryPositionStore::new();
        let mut position = store.load(Venue::Testnet, "ETHUSDT").await.unwrap();
        position.core.apply_buy(dec!(1), dec!(100), dec!(0));
        let saved = store.save(&position).await.unwrap();
        assert_eq!(saved.revision, 1);

        // `position` still carries revision 0
        position.core.apply_buy(dec!(1), dec!(100), dec!(0));
        assert!(store.save(&position).await.is_err());

        let reloaded = store.load(Venue::Testnet, "ETHUSDT").await.unwrap();
        assert_eq!(reloaded.core.quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_legacy_document_saves_in_current_shape() {
        let store = MemoryPositionStore::new();
        store.insert_raw(
            Venue::Testnet,
            "BTCUSDT",
            json!({ "qty": 0.01, "costUSDT": 500, "avgPrice": 50000, "rev": 4 }),
        );

        let position = store.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(position.revision, 4);
        let saved = store.save(&position).await.unwrap();
        assert_eq!(saved.revision, 5);

        let reloaded = store.load(Venue::Testnet, "BTCUSDT").await.unwrap();
        assert_eq!(reloaded.core.quantity, dec!(0.01));
        assert_eq!(reloaded.revision, 5);
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim(new_record("k", &format!("r{}", i), 10)).await
            }));
        }
        let mut claimed = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ClaimOutcome::Claimed { .. } => claimed += 1,
                ClaimOutcome::InProgress { .. } => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_failed_record_is_reopened() {
        let store = MemoryIdempotencyStore::new();
        store.claim(new_record("k", "r1", 10)).await.unwrap();
        store
            .finalize(
                "k",
                IdempotencyStatus::Failed,
                &ResultSummary::new(false, "price fetch failed", 502),
                11,
            )
            .await
            .unwrap();

        let outcome = store.claim(new_record("k", "r2", 12)).await.unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Claimed {
                key: "k".to_string(),
                kind: ClaimKind::Reopened
            }
        );
        let record = store.get("k").await.unwrap().unwrap();
        assert_eq!(record.status, IdempotencyStatus::InProgress);
        assert_eq!(record.rid, "r2");
        assert_eq!(record.summary, None);
    }

    #[tokio::test]
    async fn test_expired_records_are_reclaimed_and_purged() {
        let store = MemoryIdempotencyStore::new();
        store.claim(new_record("stuck", "r1", 10)).await.unwrap();
        store.claim(new_record("old", "r1", 10)).await.unwrap();

        let outcome = store.claim(new_record("stuck", "r2", 1_010)).await.unwrap();
        assert!(matches!(
            outcome,
            ClaimOutcome::Claimed {
                kind: ClaimKind::Expired,
                ..
            }
        ));

        assert_eq!(store.purge_expired(1_010).await.unwrap(), 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("stuck").await.unwrap().is_some());
    }
}
