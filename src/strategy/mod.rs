//! Strategy module
//!
//! - `decision` - pure sizing, DCA, profit-lock and circuit-breaker rules
//! - `idempotency` - request keys and the claim/finalize protocol
//! - `executor` - per-request orchestration over the stores and the exchange
//! - `report` - typed outcome of one execution

pub mod decision;
pub mod executor;
pub mod idempotency;
pub mod report;

pub use decision::DecisionParams;
pub use executor::{Clock, Executor, SystemClock};
pub use idempotency::IdempotencyManager;
pub use report::{
    BuyFill, BuyKind, ExecutionReport, ExitTarget, ExitTrigger, Outcome, SellFill, SkipReason,
};
