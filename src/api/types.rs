use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{Directive, ExecutionMode, LegSnapshot, ResultSummary, StrategyMode, Venue};
use crate::error::ExecutorError;
use crate::strategy::{ExecutionReport, ExitTarget, ExitTrigger, Outcome, SkipReason};

// ============================================================================
// Execute Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledView {
    pub executed_qty: Decimal,
    pub qty_net: Decimal,
    pub spent: Decimal,
    pub buy_fee: Decimal,
    pub avg_fill_price: Decimal,
    pub leg: LegSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedView {
    pub target: ExitTarget,
    pub trigger: ExitTrigger,
    pub qty: Decimal,
    pub proceeds: Decimal,
    pub sell_fee: Decimal,
    pub avg_fill_price: Decimal,
    pub realized_net: Decimal,
    pub net_target: Decimal,
    pub below_target: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureView {
    pub current: Decimal,
    pub requested: Decimal,
    pub max: Decimal,
}

/// 200 body for every processed request, including no-ops and replays
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub ok: bool,
    pub rid: String,
    pub venue: Venue,
    pub mode: ExecutionMode,
    pub symbol: String,
    pub side: Directive,
    pub strategy: StrategyMode,
    pub dedupe_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_until_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure: Option<ExposureView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled: Option<FilledView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized: Option<RealizedView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<Value>,
}

impl From<ExecutionReport> for ExecuteResponse {
    fn from(report: ExecutionReport) -> Self {
        let reason = report.reason();
        let mut resp = ExecuteResponse {
            ok: true,
            rid: report.rid,
            venue: report.venue,
            mode: report.mode,
            symbol: report.symbol,
            side: report.directive,
            strategy: report.strategy,
            dedupe_key: report.dedupe_key,
            price: report.price,
            paused: report.paused,
            reason: None,
            skipped: None,
            wait_ms: None,
            paused_until_ms: None,
            exposure: None,
            opened: None,
            cycle_id: None,
            filled: None,
            realized: None,
            cached: None,
            revision: report.revision,
            endpoint: None,
            exchange_status: None,
            exchange: None,
        };

        if let Some(ack) = report.order {
            resp.endpoint = Some(ack.endpoint);
            resp.exchange_status = Some(ack.status);
            resp.exchange = Some(ack.body);
        }

        match report.outcome {
            Outcome::Skipped(skip) => {
                match &skip {
                    SkipReason::Cooldown { wait_ms } => resp.wait_ms = Some(*wait_ms),
                    SkipReason::Paused { paused_until_ms }
                    | SkipReason::ExitsPaused { paused_until_ms } => {
                        resp.paused_until_ms = Some(*paused_until_ms)
                    }
                    SkipReason::MaxExposure {
                        exposure,
                        requested,
                        max,
                        ..
                    } => {
                        resp.exposure = Some(ExposureView {
                            current: *exposure,
                            requested: *requested,
                            max: *max,
                        })
                    }
                    _ => {}
                }
                resp.skipped = Some(reason);
            }
            Outcome::Bought(fill) => {
                resp.opened = Some(fill.kind.as_str().to_string());
                resp.cycle_id = fill.cycle_id;
                resp.filled = Some(FilledView {
                    executed_qty: fill.executed_qty,
                    qty_net: fill.quantity_net,
                    spent: fill.spent_quote,
                    buy_fee: fill.fee_quote,
                    avg_fill_price: fill.avg_fill_price,
                    leg: fill.leg,
                });
                resp.reason = Some(reason);
            }
            Outcome::Sold(sold) => {
                if let ExitTarget::Cycle { id } = &sold.target {
                    resp.cycle_id = Some(id.clone());
                }
                resp.realized = Some(RealizedView {
                    target: sold.target,
                    trigger: sold.trigger,
                    qty: sold.quantity,
                    proceeds: sold.proceeds_quote,
                    sell_fee: sold.sell_fee_quote,
                    avg_fill_price: sold.avg_fill_price,
                    realized_net: sold.realized_net,
                    net_target: sold.net_target,
                    below_target: sold.below_target,
                });
                resp.reason = Some(reason);
            }
            Outcome::Replayed { cached } => {
                resp.skipped = Some(reason);
                resp.cached = cached;
                resp.price = None;
            }
        }
        resp
    }
}

/// Non-200 body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    pub kind: &'static str,
    pub rid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowlist: Option<Vec<String>>,
}

/// An executor error bound to the request it failed
#[derive(Debug)]
pub struct ApiError {
    pub rid: String,
    pub error: ExecutorError,
    pub allowlist: Option<Vec<String>>,
}

impl ApiError {
    pub fn new(rid: impl Into<String>, error: ExecutorError) -> Self {
        Self {
            rid: rid.into(),
            error,
            allowlist: None,
        }
    }

    pub fn with_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn body(&self) -> ErrorResponse {
        let mut body = ErrorResponse {
            ok: false,
            error: self.error.to_string(),
            kind: self.error.kind(),
            rid: self.rid.clone(),
            dedupe_key: None,
            exchange_status: None,
            exchange: None,
            allowlist: None,
        };
        match &self.error {
            ExecutorError::DuplicateInFlight { key } => body.dedupe_key = Some(key.clone()),
            ExecutorError::ExchangeRejected { status, body: raw } => {
                body.exchange_status = Some(*status);
                body.exchange = Some(raw.clone());
            }
            ExecutorError::SymbolNotAllowed { .. } => body.allowlist = self.allowlist.clone(),
            _ => {}
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

// ============================================================================
// System Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub ok: bool,
    pub service: &'static str,
    pub ts: i64,
    pub rid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub status: &'static str,
    pub uptime_secs: i64,
}
