pub mod fill;
mod traits;

use rust_decimal::{Decimal, RoundingStrategy};

pub use fill::{parse_fill, FillSummary, SymbolAssets};
pub use traits::{ExchangeGateway, OrderAck};

#[cfg(test)]
pub use traits::MockExchangeGateway;

/// Truncate a base quantity to `decimals` places; never rounds up.
pub fn floor_quantity(quantity: Decimal, decimals: u32) -> Decimal {
    if quantity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    quantity
        .round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
        .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_floor_quantity_truncates() {
        assert_eq!(floor_quantity(dec!(1.23456789), 6), dec!(1.234567));
        assert_eq!(floor_quantity(dec!(0.0000009), 6), Decimal::ZERO);
        assert_eq!(floor_quantity(dec!(2.5), 6), dec!(2.5));
        assert_eq!(floor_quantity(dec!(-1), 6), Decimal::ZERO);
    }
}
