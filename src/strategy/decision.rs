//! Pure decision functions over a position snapshot.
//!
//! Nothing here performs I/O; callers pass the current price and clock.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{Cycle, Leg, Position};

/// Sentinel for a breakeven price that cannot be reached (fee rate >= 100%).
pub const UNREACHABLE_PRICE: Decimal = Decimal::MAX;

const HUNDRED: Decimal = dec!(100);

/// Thresholds for the decision functions, derived from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionParams {
    /// Taker fee as a fraction
    pub fee_rate: Decimal,
    pub profit_lock_net: Decimal,
    pub profit_lock_arm: Decimal,
    pub trail_pct: Decimal,
    pub dca_max: u32,
    pub dca_step_pct: Decimal,
    pub dca_cooldown_ms: i64,
    pub stop_drop_pct: Decimal,
    pub stop_window_ms: i64,
    pub pause_ms: i64,
}

/// Sum of the core and open-cycle cost bases.
pub fn total_exposure(position: &Position) -> Decimal {
    position.core.cost_basis_quote
        + position
            .open_cycles()
            .map(|c| c.leg.cost_basis_quote)
            .sum::<Decimal>()
}

pub fn is_paused(position: &Position, now_ms: i64) -> bool {
    position.paused_until_ms > 0 && now_ms < position.paused_until_ms
}

/// Record the observed price and trip the breaker on a sharp drop.
///
/// Returns `true` when this call tripped (or extended) the pause. The pause
/// deadline only ever moves forward.
pub fn update_circuit_breaker(
    position: &mut Position,
    price: Decimal,
    now_ms: i64,
    params: &DecisionParams,
) -> bool {
    let mut tripped = false;
    let prev_price = position.last_seen_price;
    let prev_at = position.last_seen_price_at_ms;

    if prev_price > Decimal::ZERO && prev_at > 0 && now_ms - prev_at <= params.stop_window_ms {
        let drop_pct = (prev_price - price) / prev_price * HUNDRED;
        if drop_pct >= params.stop_drop_pct {
            let until = now_ms + params.pause_ms;
            position.paused_until_ms = position.paused_until_ms.max(until);
            tripped = true;
        }
    }

    position.last_seen_price = price;
    position.last_seen_price_at_ms = now_ms;
    tripped
}

/// Whether a leg may be averaged down at `price`.
pub fn should_dca(leg: &Leg, price: Decimal, now_ms: i64, params: &DecisionParams) -> bool {
    if leg.is_empty() || leg.avg_price <= Decimal::ZERO {
        return false;
    }
    if leg.dca_count >= params.dca_max {
        return false;
    }
    if leg.last_dca_at_ms > 0 && now_ms - leg.last_dca_at_ms < params.dca_cooldown_ms {
        return false;
    }
    let trigger = leg.avg_price * (Decimal::ONE - params.dca_step_pct / HUNDRED);
    price <= trigger
}

/// Quote profit if the whole leg were sold at `price` after the estimated sell fee.
pub fn net_profit(leg: &Leg, price: Decimal, fee_rate: Decimal) -> Decimal {
    if leg.is_empty() {
        return Decimal::ZERO;
    }
    let gross = price * leg.quantity;
    let sell_fee = gross * fee_rate;
    gross - leg.cost_basis_quote - leg.cumulative_fees_quote - sell_fee
}

/// Lowest price at which selling the whole leg nets at least `target_net`.
///
/// Empty legs and a non-positive fee denominator report [`UNREACHABLE_PRICE`].
pub fn breakeven_plus_price(leg: &Leg, target_net: Decimal, fee_rate: Decimal) -> Decimal {
    if leg.is_empty() {
        return UNREACHABLE_PRICE;
    }
    let denom = leg.quantity * (Decimal::ONE - fee_rate);
    if denom <= Decimal::ZERO {
        return UNREACHABLE_PRICE;
    }
    (leg.cost_basis_quote + leg.cumulative_fees_quote + target_net) / denom
}

/// Arm the trailing lock once net profit reaches the arm threshold, then
/// track the peak and ratchet the floor.
pub fn update_profit_lock(leg: &mut Leg, price: Decimal, params: &DecisionParams) {
    if leg.is_empty() {
        leg.normalize();
        return;
    }

    if !leg.armed {
        if net_profit(leg, price, params.fee_rate) < params.profit_lock_arm {
            return;
        }
        leg.armed = true;
        leg.peak_price = price;
    }

    leg.peak_price = leg.peak_price.max(price);
    let trail_floor = leg.peak_price * (Decimal::ONE - params.trail_pct / HUNDRED);
    let profit_floor = breakeven_plus_price(leg, params.profit_lock_net, params.fee_rate);
    leg.floor_price = trail_floor.max(profit_floor);
}

/// Armed, profitable enough, and the price fell to the floor.
pub fn should_exit_by_profit_lock(leg: &Leg, price: Decimal, params: &DecisionParams) -> bool {
    if leg.is_empty() || !leg.armed {
        return false;
    }
    if net_profit(leg, price, params.fee_rate) < params.profit_lock_net {
        return false;
    }
    leg.floor_price > Decimal::ZERO && price <= leg.floor_price
}

/// Index of the open cycle with the highest net profit at `price`.
///
/// Ties keep the earliest cycle.
pub fn pick_best_exit_cycle(cycles: &[Cycle], price: Decimal, fee_rate: Decimal) -> Option<usize> {
    let mut best: Option<(usize, Decimal)> = None;
    for (idx, cycle) in cycles.iter().enumerate() {
        if !cycle.is_open() || cycle.leg.is_empty() {
            continue;
        }
        let net = net_profit(&cycle.leg, price, fee_rate);
        match best {
            Some((_, best_net)) if net <= best_net => {}
            _ => best = Some((idx, net)),
        }
    }
    best.map(|(idx, _)| idx)
}
