//! Typed outcome of one execute call. Rendered to JSON only at the API edge.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::domain::{
    Directive, ExecutionMode, LegSnapshot, ResultSummary, StrategyMode, ValidatedRequest, Venue,
};
use crate::exchange::OrderAck;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyKind {
    /// First buy of an empty core leg
    Core,
    CoreDca,
    ScalpDca,
    ScalpNew,
}

impl BuyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuyKind::Core => "core",
            BuyKind::CoreDca => "core_dca",
            BuyKind::ScalpDca => "scalp_dca",
            BuyKind::ScalpNew => "scalp_new",
        }
    }
}

impl fmt::Display for BuyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "leg")]
pub enum ExitTarget {
    Core,
    Cycle { id: String },
}

impl fmt::Display for ExitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitTarget::Core => f.write_str("core"),
            ExitTarget::Cycle { .. } => f.write_str("cycle"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTrigger {
    ProfitLock,
    SellSignal,
}

impl fmt::Display for ExitTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitTrigger::ProfitLock => f.write_str("profit-lock"),
            ExitTrigger::SellSignal => f.write_str("sell-signal"),
        }
    }
}

/// Why a request completed without an order
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Cooldown { wait_ms: i64 },
    Paused { paused_until_ms: i64 },
    MaxExposure {
        kind: BuyKind,
        exposure: Decimal,
        requested: Decimal,
        max: Decimal,
    },
    CoreHolding,
    ScalpDisabled,
    RebuyDisabled,
    ScalpMaxOpen { open: usize, max: usize },
    /// TICK with nothing at its floor
    NoExit,
    ExitsPaused { paused_until_ms: i64 },
    /// TICK while exits are reserved for SELL signals
    SellSignalOnly,
    /// SELL while no leg clears the net target
    BelowTarget,
    QtyTooSmall,
}

impl SkipReason {
    pub fn message(&self) -> String {
        match self {
            SkipReason::Cooldown { .. } => "cooldown".to_string(),
            SkipReason::Paused { .. } => "paused by circuit breaker".to_string(),
            SkipReason::MaxExposure { kind, .. } => match kind {
                BuyKind::Core => "max total exposure reached".to_string(),
                BuyKind::CoreDca => "max total exposure reached (core dca)".to_string(),
                BuyKind::ScalpDca => "max total exposure reached (scalp dca)".to_string(),
                BuyKind::ScalpNew => "max total exposure reached (new scalp)".to_string(),
            },
            SkipReason::CoreHolding => "core: no dca trigger (holding)".to_string(),
            SkipReason::ScalpDisabled => "scalp disabled".to_string(),
            SkipReason::RebuyDisabled => "rebuy disabled".to_string(),
            SkipReason::ScalpMaxOpen { .. } => "scalp max open reached".to_string(),
            SkipReason::NoExit => "tick: no exit".to_string(),
            SkipReason::ExitsPaused { .. } => "exits paused by circuit breaker".to_string(),
            SkipReason::SellSignalOnly => "tick: exits only on sell signal".to_string(),
            SkipReason::BelowTarget => "sell ignored: net below target".to_string(),
            SkipReason::QtyTooSmall => "qty too small".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyFill {
    pub kind: BuyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    pub notional: Decimal,
    pub executed_qty: Decimal,
    pub quantity_net: Decimal,
    pub spent_quote: Decimal,
    pub fee_quote: Decimal,
    pub avg_fill_price: Decimal,
    pub leg: LegSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellFill {
    pub target: ExitTarget,
    pub trigger: ExitTrigger,
    pub quantity: Decimal,
    pub proceeds_quote: Decimal,
    pub sell_fee_quote: Decimal,
    pub avg_fill_price: Decimal,
    pub realized_net: Decimal,
    pub net_target: Decimal,
    pub below_target: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Skipped(SkipReason),
    Bought(BuyFill),
    Sold(SellFill),
    /// A completed duplicate; nothing was re-executed
    Replayed { cached: Option<ResultSummary> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub rid: String,
    pub venue: Venue,
    pub mode: ExecutionMode,
    pub symbol: String,
    pub directive: Directive,
    pub strategy: StrategyMode,
    pub dedupe_key: String,
    pub price: Option<Decimal>,
    pub paused: bool,
    /// Stored revision after this call, when state was written
    pub revision: Option<i64>,
    pub order: Option<OrderAck>,
    pub outcome: Outcome,
}

impl ExecutionReport {
    pub fn new(rid: &str, request: &ValidatedRequest, dedupe_key: &str, outcome: Outcome) -> Self {
        Self {
            rid: rid.to_string(),
            venue: request.venue,
            mode: request.mode,
            symbol: request.symbol.clone(),
            directive: request.directive,
            strategy: request.strategy,
            dedupe_key: dedupe_key.to_string(),
            price: None,
            paused: false,
            revision: None,
            order: None,
            outcome,
        }
    }

    pub fn replayed(
        rid: &str,
        request: &ValidatedRequest,
        dedupe_key: &str,
        cached: Option<ResultSummary>,
    ) -> Self {
        Self::new(rid, request, dedupe_key, Outcome::Replayed { cached })
    }

    /// Human-readable outcome used in the idempotency summary and logs
    pub fn reason(&self) -> String {
        match &self.outcome {
            Outcome::Skipped(reason) => reason.message(),
            Outcome::Bought(fill) => format!("opened {}", fill.kind),
            Outcome::Sold(fill) => format!("{} ({})", fill.trigger, fill.target),
            Outcome::Replayed { .. } => "duplicate request".to_string(),
        }
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary::new(true, self.reason(), 200)
    }

    pub fn executed_side(&self) -> Option<&'static str> {
        match &self.outcome {
            Outcome::Bought(_) => Some("BUY"),
            Outcome::Sold(_) => Some("SELL"),
            _ => None,
        }
    }
}
