use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of an idempotency record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::InProgress => "IN_PROGRESS",
            IdempotencyStatus::Succeeded => "SUCCEEDED",
            IdempotencyStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(IdempotencyStatus::InProgress),
            "SUCCEEDED" => Ok(IdempotencyStatus::Succeeded),
            "FAILED" => Ok(IdempotencyStatus::Failed),
            other => Err(format!("unknown idempotency status: {}", other)),
        }
    }
}

/// What a replayed duplicate gets back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub http_status: u16,
}

impl ResultSummary {
    pub fn new(ok: bool, reason: impl Into<String>, http_status: u16) -> Self {
        Self {
            ok,
            reason: Some(reason.into()),
            http_status,
        }
    }
}

/// Values written when a key is first claimed
#[derive(Debug, Clone, PartialEq)]
pub struct NewIdempotencyRecord {
    pub key: String,
    pub venue: String,
    pub mode: String,
    pub symbol: String,
    pub side: String,
    pub client_order_id: Option<String>,
    pub rid: String,
    pub now_ms: i64,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: IdempotencyStatus,
    pub summary: Option<ResultSummary>,
    pub venue: String,
    pub mode: String,
    pub symbol: String,
    pub side: String,
    pub client_order_id: Option<String>,
    pub rid: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub expires_at_ms: i64,
}

impl IdempotencyRecord {
    pub fn from_new(new: &NewIdempotencyRecord) -> Self {
        Self {
            key: new.key.clone(),
            status: IdempotencyStatus::InProgress,
            summary: None,
            venue: new.venue.clone(),
            mode: new.mode.clone(),
            symbol: new.symbol.clone(),
            side: new.side.clone(),
            client_order_id: new.client_order_id.clone(),
            rid: new.rid.clone(),
            created_at_ms: new.now_ms,
            updated_at_ms: new.now_ms,
            expires_at_ms: new.expires_at_ms,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// How a claim was granted; only used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    Created,
    /// A FAILED record was taken over
    Reopened,
    /// An expired record was taken over
    Expired,
}

impl ClaimKind {
    pub fn phase(&self) -> &'static str {
        match self {
            ClaimKind::Created => "claim:create",
            ClaimKind::Reopened => "claim:reopen",
            ClaimKind::Expired => "claim:expired",
        }
    }
}

/// Result of an atomic claim attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed { key: String, kind: ClaimKind },
    InProgress { key: String },
    Succeeded {
        key: String,
        summary: Option<ResultSummary>,
    },
}

impl ClaimOutcome {
    pub fn key(&self) -> &str {
        match self {
            ClaimOutcome::Claimed { key, .. }
            | ClaimOutcome::InProgress { key }
            | ClaimOutcome::Succeeded { key, .. } => key,
        }
    }
}
