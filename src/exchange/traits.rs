use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{ExecutionMode, MarketOrder, Venue};
use crate::error::Result;

/// Raw exchange answer to an order submission.
///
/// A non-2xx answer is still an `OrderAck`; the caller decides whether to
/// treat it as a rejection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub http_ok: bool,
    pub status: u16,
    pub endpoint: String,
    pub base_url: String,
    pub body: Value,
}

/// Exchange seam used by the executor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Latest traded price for `symbol`; must be positive.
    async fn current_price(&self, venue: Venue, symbol: &str) -> Result<Decimal>;

    /// Submit a market order. Paper mode targets the validate-only endpoint.
    /// Sell quantities are floored to the configured precision before sending.
    async fn place_market_order(
        &self,
        venue: Venue,
        mode: ExecutionMode,
        order: &MarketOrder,
    ) -> Result<OrderAck>;
}
