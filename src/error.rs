use thiserror::Error;

/// Main error type for the executor
#[derive(Error, Debug)]
pub enum ExecutorError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Request errors (never consume an idempotency claim)
    #[error("{0}")]
    Validation(String),

    #[error("symbol not allowed: {symbol}")]
    SymbolNotAllowed { symbol: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Duplicate request in flight: {key}")]
    DuplicateInFlight { key: String },

    // Upstream errors
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Exchange rejected order (HTTP {status})")]
    ExchangeRejected {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Exchange credentials missing: {0}")]
    ExchangeCredentials(String),

    // State errors
    #[error("State revision conflict on {doc_id}: expected {expected}, found {found}")]
    RevisionConflict {
        doc_id: String,
        expected: i64,
        found: i64,
    },

    #[error("Corrupt document {doc_id}: {reason}")]
    CorruptDocument { doc_id: String, reason: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ExecutorError
pub type Result<T> = std::result::Result<T, ExecutorError>;

impl ExecutorError {
    /// HTTP status surfaced to the webhook caller.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::SymbolNotAllowed { .. } => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::DuplicateInFlight { .. } => 409,
            Self::UpstreamTimeout(_)
            | Self::Upstream(_)
            | Self::ExchangeRejected { .. }
            | Self::ExchangeCredentials(_)
            | Self::Http(_) => 502,
            Self::RevisionConflict { .. }
            | Self::CorruptDocument { .. }
            | Self::Config(_)
            | Self::Database(_)
            | Self::Migration(_)
            | Self::Json(_)
            | Self::Io(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Stable tag used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) | Self::SymbolNotAllowed { .. } => "validation",
            Self::Unauthorized(_) | Self::Forbidden(_) => "auth",
            Self::DuplicateInFlight { .. } => "duplicate_in_flight",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::Upstream(_)
            | Self::ExchangeRejected { .. }
            | Self::ExchangeCredentials(_)
            | Self::Http(_) => "upstream",
            Self::RevisionConflict { .. } => "revision_conflict",
            Self::CorruptDocument { .. } => "corrupt_document",
            Self::Database(_) | Self::Migration(_) => "database",
            Self::Json(_) | Self::Io(_) | Self::Internal(_) | Self::Other(_) => "unexpected",
        }
    }

    /// Whether the failure is the caller's fault and happened before any claim.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::SymbolNotAllowed { .. }
                | Self::Unauthorized(_)
                | Self::Forbidden(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_follows_taxonomy() {
        assert_eq!(ExecutorError::Validation("bad".into()).http_status(), 400);
        assert_eq!(ExecutorError::Unauthorized("no".into()).http_status(), 401);
        assert_eq!(ExecutorError::Forbidden("live disabled".into()).http_status(), 403);
        assert_eq!(
            ExecutorError::DuplicateInFlight { key: "k".into() }.http_status(),
            409
        );
        assert_eq!(ExecutorError::UpstreamTimeout("price".into()).http_status(), 502);
        assert_eq!(
            ExecutorError::RevisionConflict {
                doc_id: "testnet:BTCUSDT".into(),
                expected: 0,
                found: 1,
            }
            .http_status(),
            500
        );
        assert_eq!(ExecutorError::Internal("boom".into()).http_status(), 500);
    }

    #[test]
    fn test_revision_conflict_message_names_document() {
        let err = ExecutorError::RevisionConflict {
            doc_id: "mainnet:ETHUSDT".into(),
            expected: 3,
            found: 4,
        };
        assert_eq!(
            err.to_string(),
            "State revision conflict on mainnet:ETHUSDT: expected 3, found 4"
        );
        assert_eq!(err.kind(), "revision_conflict");
    }
}
