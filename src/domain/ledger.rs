//! Position ledger: the core leg, scalp cycles and the per-symbol aggregate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Venue;

/// A tracked position slice with its own cost basis, fees and profit-lock state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Leg {
    /// Base asset units held
    #[serde(alias = "qty")]
    pub quantity: Decimal,
    /// Cumulative quote spent on the units still held
    #[serde(alias = "costUSDT")]
    pub cost_basis_quote: Decimal,
    pub avg_price: Decimal,
    /// Buy (and realized sell) fees in quote-equivalent
    #[serde(alias = "feesUSDT")]
    pub cumulative_fees_quote: Decimal,
    pub armed: bool,
    pub peak_price: Decimal,
    pub floor_price: Decimal,
    pub dca_count: u32,
    #[serde(alias = "lastDcaMs")]
    pub last_dca_at_ms: i64,
}

impl Leg {
    pub fn is_empty(&self) -> bool {
        self.quantity <= Decimal::ZERO
    }

    /// Add a filled buy to the leg and recompute the average price.
    pub fn apply_buy(&mut self, quantity: Decimal, spent_quote: Decimal, fee_quote: Decimal) {
        self.quantity += quantity.max(Decimal::ZERO);
        self.cost_basis_quote += spent_quote.max(Decimal::ZERO);
        self.cumulative_fees_quote += fee_quote.max(Decimal::ZERO);
        self.recompute_avg();
        self.normalize();
    }

    /// Record that the last buy was a DCA step.
    pub fn record_dca(&mut self, now_ms: i64) {
        self.dca_count += 1;
        self.last_dca_at_ms = now_ms;
    }

    /// Flatten the leg after its whole quantity was sold.
    ///
    /// Fees stay on the leg as history; DCA counters survive so a closed cycle
    /// still shows how many times it was averaged down.
    pub fn close_after_sell(&mut self, sell_fee_quote: Decimal) {
        self.cumulative_fees_quote += sell_fee_quote.max(Decimal::ZERO);
        self.quantity = Decimal::ZERO;
        self.normalize();
    }

    fn recompute_avg(&mut self) {
        self.avg_price = if self.quantity > Decimal::ZERO {
            self.cost_basis_quote / self.quantity
        } else {
            Decimal::ZERO
        };
    }

    /// Enforce `quantity == 0 => cost == 0 && avg == 0 && !armed`.
    pub fn normalize(&mut self) {
        if self.quantity > Decimal::ZERO {
            return;
        }
        self.quantity = Decimal::ZERO;
        self.cost_basis_quote = Decimal::ZERO;
        self.avg_price = Decimal::ZERO;
        self.armed = false;
        self.peak_price = Decimal::ZERO;
        self.floor_price = Decimal::ZERO;
    }

    pub fn snapshot(&self) -> LegSnapshot {
        LegSnapshot {
            quantity: self.quantity,
            avg_price: self.avg_price,
            cost_basis_quote: self.cost_basis_quote,
            cumulative_fees_quote: self.cumulative_fees_quote,
            dca_count: self.dca_count,
        }
    }
}

/// Compact view of a leg for responses
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegSnapshot {
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub cost_basis_quote: Decimal,
    pub cumulative_fees_quote: Decimal,
    pub dca_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CycleStatus {
    #[default]
    Open,
    Closed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Open => "OPEN",
            CycleStatus::Closed => "CLOSED",
        }
    }
}

/// Independently tracked scalp leg opened after the core leg exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: String,
    #[serde(default)]
    pub status: CycleStatus,
    #[serde(flatten)]
    pub leg: Leg,
}

impl Cycle {
    pub fn open(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: CycleStatus::Open,
            leg: Leg::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == CycleStatus::Open
    }

    pub fn close_after_sell(&mut self, sell_fee_quote: Decimal) {
        self.leg.close_after_sell(sell_fee_quote);
        self.status = CycleStatus::Closed;
    }
}

/// Aggregate root: one per (venue, symbol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(alias = "env")]
    pub venue: Venue,
    pub symbol: String,
    pub core: Leg,
    #[serde(default)]
    pub cycles: Vec<Cycle>,
    #[serde(default, alias = "lastActionMs")]
    pub last_action_at_ms: i64,
    #[serde(default)]
    pub last_seen_price: Decimal,
    #[serde(default, alias = "lastSeenPriceMs")]
    pub last_seen_price_at_ms: i64,
    /// Circuit breaker pause deadline
    #[serde(default, alias = "pausedUntilMs")]
    pub paused_until_ms: i64,
    #[serde(default, alias = "rev")]
    pub revision: i64,
    /// Store-assigned timestamp of the last successful save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_ms: Option<i64>,
}

impl Position {
    /// Zero-value position at revision 0
    pub fn new(venue: Venue, symbol: impl Into<String>) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            core: Leg::default(),
            cycles: Vec::new(),
            last_action_at_ms: 0,
            last_seen_price: Decimal::ZERO,
            last_seen_price_at_ms: 0,
            paused_until_ms: 0,
            revision: 0,
            updated_at_ms: None,
        }
    }

    pub fn doc_id(&self) -> String {
        doc_id_for(self.venue, &self.symbol)
    }

    pub fn open_cycles(&self) -> impl Iterator<Item = &Cycle> {
        self.cycles.iter().filter(|c| c.is_open())
    }

    pub fn open_cycle_count(&self) -> usize {
        self.open_cycles().count()
    }

    pub fn cycle_mut(&mut self, id: &str) -> Option<&mut Cycle> {
        self.cycles.iter_mut().find(|c| c.id == id)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rev={} core_qty={} open_cycles={}",
            self.doc_id(),
            self.revision,
            self.core.quantity,
            self.open_cycle_count()
        )
    }
}

/// Document id for a (venue, symbol) pair
pub fn doc_id_for(venue: Venue, symbol: &str) -> String {
    format!("{}:{}", venue.as_str(), symbol)
}
