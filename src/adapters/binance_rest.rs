//! Binance spot REST adapter (price lookup and signed market orders).

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::ExchangeConfig;
use crate::domain::{ExecutionMode, MarketOrder, OrderSize, Venue};
use crate::error::{ExecutorError, Result};
use crate::exchange::{floor_quantity, ExchangeGateway, OrderAck};
use crate::signing::{ApiCredentials, HmacAuth};

const PRICE_PATH: &str = "/api/v3/ticker/price";
const ORDER_PATH: &str = "/api/v3/order";
const ORDER_TEST_PATH: &str = "/api/v3/order/test";

#[derive(Clone)]
pub struct BinanceRestClient {
    http: Client,
    config: ExchangeConfig,
    qty_decimals: u32,
}

impl BinanceRestClient {
    pub fn new(config: ExchangeConfig, qty_decimals: u32) -> Result<Self> {
        let http = Client::builder()
            .user_agent("spot-executor/0.1")
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| {
                ExecutorError::Internal(format!("failed to build Binance HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            config,
            qty_decimals,
        })
    }

    fn base_url(&self, venue: Venue) -> String {
        self.config
            .venue(venue)
            .base_url
            .trim_end_matches('/')
            .to_string()
    }

    fn endpoint(mode: ExecutionMode) -> &'static str {
        match mode {
            ExecutionMode::Live => ORDER_PATH,
            ExecutionMode::Paper => ORDER_TEST_PATH,
        }
    }

    /// Unsigned parameters in submission order
    fn order_params(&self, order: &MarketOrder, timestamp_ms: i64) -> Result<String> {
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        params
            .append_pair("symbol", &order.symbol)
            .append_pair("side", order.side.as_str())
            .append_pair("type", "MARKET")
            .append_pair("timestamp", &timestamp_ms.to_string());

        if let Some(cid) = order.client_order_id.as_deref() {
            params.append_pair("newClientOrderId", cid);
        }

        match order.size {
            OrderSize::QuoteNotional(notional) => {
                params.append_pair("quoteOrderQty", &notional.normalize().to_string());
            }
            OrderSize::BaseQuantity(quantity) => {
                let quantity = floor_quantity(quantity, self.qty_decimals);
                if quantity.is_zero() {
                    return Err(ExecutorError::Validation("qty too small".to_string()));
                }
                params.append_pair("quantity", &quantity.to_string());
            }
        }
        Ok(params.finish())
    }
}

fn transport_error(what: &str, err: reqwest::Error) -> ExecutorError {
    if err.is_timeout() {
        ExecutorError::UpstreamTimeout(what.to_string())
    } else {
        ExecutorError::Upstream(format!("{}: {}", what, err))
    }
}

/// JSON body, or the raw text wrapped as a string when it is not JSON
fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl ExchangeGateway for BinanceRestClient {
    #[instrument(skip(self, venue), fields(venue = %venue))]
    async fn current_price(&self, venue: Venue, symbol: &str) -> Result<Decimal> {
        let url = format!("{}{}", self.base_url(venue), PRICE_PATH);
        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| transport_error("price fetch failed", e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| transport_error("price fetch failed", e))?;
        if !status.is_success() {
            warn!(%venue, symbol, status = status.as_u16(), "price fetch rejected");
            return Err(ExecutorError::Upstream(format!(
                "price fetch failed (HTTP {})",
                status.as_u16()
            )));
        }

        let body = parse_body(&text);
        let price = match body.get("price") {
            Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
            Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        };
        match price {
            Some(p) if p > Decimal::ZERO => {
                debug!(%venue, symbol, price = %p, "price fetched");
                Ok(p)
            }
            _ => Err(ExecutorError::Upstream(
                "price fetch failed (bad price)".to_string(),
            )),
        }
    }

    #[instrument(skip(self, venue, mode, order), fields(venue = %venue, mode = %mode, symbol = %order.symbol, side = %order.side))]
    async fn place_market_order(
        &self,
        venue: Venue,
        mode: ExecutionMode,
        order: &MarketOrder,
    ) -> Result<OrderAck> {
        let auth = HmacAuth::new(ApiCredentials::from_config(
            venue,
            self.config.venue(venue),
        )?);

        let base_url = self.base_url(venue);
        let endpoint = Self::endpoint(mode);
        let query = self.order_params(order, Utc::now().timestamp_millis())?;
        let url = format!("{}{}?{}", base_url, endpoint, auth.signed_query(&query)?);

        let resp = self
            .http
            .post(&url)
            .headers(auth.headers()?)
            .send()
            .await
            .map_err(|e| transport_error("order submission failed", e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| transport_error("order response read failed", e))?;

        let ack = OrderAck {
            http_ok: status.is_success(),
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
            base_url,
            body: parse_body(&text),
        };
        debug!(
            %venue,
            %mode,
            symbol = %order.symbol,
            side = %order.side,
            status = ack.status,
            "order submitted"
        );
        Ok(ack)
    }
}
