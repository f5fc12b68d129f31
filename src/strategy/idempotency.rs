use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::domain::{
    ClaimOutcome, IdempotencyStatus, NewIdempotencyRecord, ResultSummary, ValidatedRequest,
};
use crate::error::Result;
use crate::persistence::IdempotencyStore;

/// Width of the fingerprint time bucket when the caller sends no `ts`.
const FINGERPRINT_BUCKET_MS: i64 = 60_000;

/// Idempotency manager to prevent duplicate order submissions
///
/// Retried webhooks must never place a second order. Every request claims a
/// key before touching the exchange and finalizes it afterwards:
/// 1. Derive a key from the client order id, or from a fingerprint of the request
/// 2. Atomically claim it; a concurrent or completed duplicate loses the claim
/// 3. Finalize SUCCEEDED (replayable) or FAILED (retryable)
pub struct IdempotencyManager {
    store: Arc<dyn IdempotencyStore>,
    ttl_ms: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Fingerprint<'a> {
    venue: &'a str,
    mode: &'a str,
    symbol: &'a str,
    side: &'a str,
    order_type: &'a str,
    notional: String,
    ts: String,
}

impl IdempotencyManager {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl_ms: i64) -> Self {
        Self { store, ttl_ms }
    }

    /// Generate an idempotency key for a validated request.
    ///
    /// A client order id is scoped by venue, symbol and side so the same id
    /// reused for the opposite side is a different request.
    pub fn generate_key(request: &ValidatedRequest, now_ms: i64) -> String {
        match request.client_order_id.as_deref() {
            Some(cid) => format!(
                "cid:{}:{}:{}:{}",
                request.venue.as_str(),
                request.symbol,
                request.directive.as_str(),
                cid
            ),
            None => format!("hash:{}", Self::hash_request(request, now_ms)),
        }
    }

    /// Deterministic hash of the request parameters, bucketed by minute
    /// unless the caller supplied its own timestamp.
    fn hash_request(request: &ValidatedRequest, now_ms: i64) -> String {
        let fingerprint = Fingerprint {
            venue: request.venue.as_str(),
            mode: request.mode.as_str(),
            symbol: &request.symbol,
            side: request.directive.as_str(),
            order_type: "MARKET",
            notional: request
                .notional
                .map(|n| n.normalize().to_string())
                .unwrap_or_else(|| "0".to_string()),
            ts: request
                .ts
                .clone()
                .unwrap_or_else(|| (now_ms / FINGERPRINT_BUCKET_MS).to_string()),
        };
        // Struct field order is fixed, so the encoding is canonical
        let encoded = serde_json::to_vec(&fingerprint).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        format!("{:x}", hasher.finalize())
    }

    /// Claim the key for this request.
    pub async fn claim(
        &self,
        key: &str,
        request: &ValidatedRequest,
        rid: &str,
        now_ms: i64,
    ) -> Result<ClaimOutcome> {
        let record = NewIdempotencyRecord {
            key: key.to_string(),
            venue: request.venue.as_str().to_string(),
            mode: request.mode.as_str().to_string(),
            symbol: request.symbol.clone(),
            side: request.directive.as_str().to_string(),
            client_order_id: request.client_order_id.clone(),
            rid: rid.to_string(),
            now_ms,
            expires_at_ms: now_ms + self.ttl_ms,
        };

        let outcome = self.store.claim(record).await?;
        match &outcome {
            ClaimOutcome::Claimed { kind, .. } => {
                info!(rid, key, phase = kind.phase(), "idempotency");
            }
            ClaimOutcome::InProgress { .. } => {
                warn!(rid, key, phase = "claim:duplicate", status = "IN_PROGRESS", "idempotency");
            }
            ClaimOutcome::Succeeded { .. } => {
                info!(rid, key, phase = "claim:duplicate", status = "SUCCEEDED", "idempotency");
            }
        }
        Ok(outcome)
    }

    /// Record the terminal outcome of a claimed request.
    pub async fn finalize(
        &self,
        key: &str,
        status: IdempotencyStatus,
        summary: &ResultSummary,
        rid: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.store.finalize(key, status, summary, now_ms).await?;
        debug!(
            rid,
            key,
            phase = "finalize",
            status = status.as_str(),
            http_status = summary.http_status,
            "idempotency"
        );
        Ok(())
    }

    /// Remove records whose TTL elapsed.
    ///
    /// # Returns
    /// Number of records deleted
    pub async fn cleanup_expired(&self, now_ms: i64) -> Result<u64> {
        let deleted = self.store.purge_expired(now_ms).await?;
        if deleted > 0 {
            info!("Cleaned up {} expired idempotency keys", deleted);
        }
        Ok(deleted)
    }
}
