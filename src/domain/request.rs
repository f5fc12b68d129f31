//! Inbound execute request and its validation.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

use super::{Directive, ExecutionMode, StrategyMode, Venue};
use crate::config::AppConfig;
use crate::error::{ExecutorError, Result};

/// Raw webhook body. Field names accept the legacy aliases
/// (`env`, `binanceSymbol`, `notionalUSDT`) as well as the current ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default, alias = "env")]
    pub venue: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, alias = "binanceSymbol")]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default, alias = "notionalUSDT", alias = "notionalUsdt")]
    pub notional: Option<Value>,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    /// Optional caller timestamp; replaces the minute bucket in the fingerprint
    #[serde(default)]
    pub ts: Option<Value>,
    /// Body-level shared secret for callers that cannot set headers
    #[serde(default)]
    pub secret: Option<String>,
}

/// A request that passed every gate and may claim an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub venue: Venue,
    pub mode: ExecutionMode,
    pub symbol: String,
    pub directive: Directive,
    pub notional: Option<Decimal>,
    pub client_order_id: Option<String>,
    pub strategy: StrategyMode,
    pub ts: Option<String>,
}

impl ExecuteRequest {
    /// Check the request in a fixed order so the first failing gate decides the status.
    pub fn validate(&self, config: &AppConfig) -> Result<ValidatedRequest> {
        let symbol = non_empty(&self.symbol)
            .map(|s| s.to_uppercase())
            .ok_or_else(|| ExecutorError::Validation("missing symbol".to_string()))?;

        if !config.strategy.is_symbol_allowed(&symbol) {
            return Err(ExecutorError::SymbolNotAllowed { symbol });
        }

        let venue = match non_empty(&self.venue) {
            None => Venue::Testnet,
            Some(v) => Venue::from_str(v)
                .map_err(|_| ExecutorError::Validation("invalid env".to_string()))?,
        };
        let mode = match non_empty(&self.mode) {
            None => ExecutionMode::Paper,
            Some(m) => ExecutionMode::from_str(m)
                .map_err(|_| ExecutorError::Validation("invalid mode".to_string()))?,
        };
        if venue == Venue::Mainnet && !config.venues.allow_mainnet {
            return Err(ExecutorError::Forbidden("mainnet disabled".to_string()));
        }
        if mode == ExecutionMode::Live && !config.venues.allow_live {
            return Err(ExecutorError::Forbidden("live disabled".to_string()));
        }

        let order_type = non_empty(&self.order_type).unwrap_or("MARKET");
        if !order_type.eq_ignore_ascii_case("MARKET") {
            return Err(ExecutorError::Validation(
                "only MARKET supported".to_string(),
            ));
        }

        let directive = non_empty(&self.side)
            .ok_or_else(|| ExecutorError::Validation("invalid side".to_string()))
            .and_then(|s| Directive::from_str(s).map_err(ExecutorError::Validation))?;

        let strategy = match non_empty(&self.strategy) {
            None => config.strategy.default_strategy,
            Some(s) => StrategyMode::from_str(s).map_err(ExecutorError::Validation)?,
        };

        Ok(ValidatedRequest {
            venue,
            mode,
            symbol,
            directive,
            notional: parse_notional(self.notional.as_ref())?,
            client_order_id: non_empty(&self.client_order_id).map(str::to_string),
            strategy,
            ts: self.ts.as_ref().and_then(scalar_to_string),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_notional(value: Option<&Value>) -> Result<Option<Decimal>> {
    let invalid = || ExecutorError::Validation("invalid notional".to_string());
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .map_err(|_| invalid())?,
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => Decimal::from_str(s.trim()).map_err(|_| invalid())?,
        Some(_) => return Err(invalid()),
    };
    if parsed <= Decimal::ZERO {
        return Err(invalid());
    }
    Ok(Some(parsed))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
