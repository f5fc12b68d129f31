//! Fill extraction from market order responses.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

/// Quote assets recognised when splitting a symbol, longest first.
const KNOWN_QUOTES: &[&str] = &[
    "FDUSD", "USDT", "USDC", "TUSD", "BUSD", "BTC", "ETH", "BNB", "EUR", "TRY",
];

/// Base and quote asset codes of a trading pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolAssets {
    pub base: String,
    pub quote: String,
}

impl SymbolAssets {
    pub fn from_symbol(symbol: &str) -> Self {
        let symbol = symbol.trim().to_uppercase();
        for quote in KNOWN_QUOTES {
            if let Some(base) = symbol.strip_suffix(quote) {
                if !base.is_empty() {
                    return Self {
                        base: base.to_string(),
                        quote: quote.to_string(),
                    };
                }
            }
        }
        Self {
            base: symbol,
            quote: String::new(),
        }
    }
}

/// What actually executed, as far as the exchange told us.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillSummary {
    pub executed_qty: Decimal,
    pub quote_qty: Decimal,
    pub avg_fill_price: Decimal,
    /// Commission in quote, including base commission valued at the fill price
    pub fee_quote: Decimal,
    /// Commission charged in the base asset
    pub fee_base: Decimal,
}

fn decimal_field(value: &Value, key: &str) -> Decimal {
    match value.get(key) {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).unwrap_or_default(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

/// Summarize an order response body.
///
/// With a `fills` array the average is qty-weighted and commissions are
/// attributed by asset; commissions in any other asset are ignored. Without
/// fills the average comes from cumulative quote over executed quantity, or
/// `fallback_price` when either is missing.
pub fn parse_fill(body: &Value, fallback_price: Decimal, assets: &SymbolAssets) -> FillSummary {
    let executed_qty = decimal_field(body, "executedQty");
    let quote_qty = decimal_field(body, "cummulativeQuoteQty");

    let fills = body
        .get("fills")
        .and_then(Value::as_array)
        .filter(|f| !f.is_empty());

    let Some(fills) = fills else {
        let avg_fill_price = if quote_qty > Decimal::ZERO && executed_qty > Decimal::ZERO {
            quote_qty / executed_qty
        } else {
            fallback_price
        };
        return FillSummary {
            executed_qty,
            quote_qty,
            avg_fill_price,
            ..FillSummary::default()
        };
    };

    let mut qty_sum = Decimal::ZERO;
    let mut notional_sum = Decimal::ZERO;
    let mut fee_quote = Decimal::ZERO;
    let mut fee_base = Decimal::ZERO;

    for fill in fills {
        let price = decimal_field(fill, "price");
        let qty = decimal_field(fill, "qty");
        qty_sum += qty;
        notional_sum += price * qty;

        let commission = decimal_field(fill, "commission");
        if commission <= Decimal::ZERO {
            continue;
        }
        let asset = fill
            .get("commissionAsset")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();
        if !assets.quote.is_empty() && asset == assets.quote {
            fee_quote += commission;
        } else if asset == assets.base {
            fee_base += commission;
        }
    }

    let mut avg_fill_price = if qty_sum > Decimal::ZERO {
        notional_sum / qty_sum
    } else {
        Decimal::ZERO
    };
    if avg_fill_price.is_zero() {
        avg_fill_price = fallback_price;
    }
    fee_quote += fee_base * avg_fill_price;

    FillSummary {
        executed_qty,
        quote_qty,
        avg_fill_price,
        fee_quote,
        fee_base,
    }
}
