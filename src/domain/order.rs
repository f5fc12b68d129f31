use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange environment an order is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Mainnet,
    Testnet,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Mainnet => "mainnet",
            Venue::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Venue::Mainnet),
            "testnet" => Ok(Venue::Testnet),
            other => Err(format!("invalid venue: {}", other)),
        }
    }
}

/// Paper orders hit the exchange's validate-only endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[serde(alias = "test")]
    Paper,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Paper => "paper",
            ExecutionMode::Live => "live",
        }
    }

    pub fn is_paper(&self) -> bool {
        matches!(self, ExecutionMode::Paper)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" | "paper" | "dry-run" | "dry_run" => Ok(ExecutionMode::Paper),
            "live" => Ok(ExecutionMode::Live),
            other => Err(format!("invalid mode: {}", other)),
        }
    }
}

/// What the webhook asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Directive {
    Buy,
    Sell,
    /// Re-evaluate exits without a trading signal
    Tick,
}

impl Directive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Buy => "BUY",
            Directive::Sell => "SELL",
            Directive::Tick => "TICK",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Directive {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Directive::Buy),
            "SELL" => Ok(Directive::Sell),
            "TICK" => Ok(Directive::Tick),
            _ => Err("invalid side".to_string()),
        }
    }
}

/// Which legs a BUY may open or grow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    /// Core leg only
    #[default]
    Core,
    /// Core first, then scalp cycles
    Auto,
    Scalp,
}

impl StrategyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::Core => "core",
            StrategyMode::Auto => "auto",
            StrategyMode::Scalp => "scalp",
        }
    }

    pub fn allows_scalp(&self) -> bool {
        !matches!(self, StrategyMode::Core)
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "core" => Ok(StrategyMode::Core),
            "auto" => Ok(StrategyMode::Auto),
            "scalp" => Ok(StrategyMode::Scalp),
            other => Err(format!("invalid strategy: {}", other)),
        }
    }
}

/// Order side as sent to the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market orders are sized by quote spend (buys) or base quantity (sells)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum OrderSize {
    QuoteNotional(Decimal),
    BaseQuantity(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub size: OrderSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

impl MarketOrder {
    pub fn buy_notional(symbol: impl Into<String>, notional: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: OrderSide::Buy,
            size: OrderSize::QuoteNotional(notional),
            client_order_id: None,
        }
    }

    pub fn sell_quantity(symbol: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: OrderSide::Sell,
            size: OrderSize::BaseQuantity(quantity),
            client_order_id: None,
        }
    }

    pub fn with_client_order_id(mut self, client_order_id: Option<String>) -> Self {
        self.client_order_id = client_order_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_accepts_test_alias() {
        assert_eq!("test".parse::<ExecutionMode>().unwrap(), ExecutionMode::Paper);
        assert_eq!("LIVE".parse::<ExecutionMode>().unwrap(), ExecutionMode::Live);
        assert!("prod".parse::<ExecutionMode>().is_err());

        let mode: ExecutionMode = serde_json::from_str("\"test\"").unwrap();
        assert!(mode.is_paper());
    }

    #[test]
    fn test_directive_parse() {
        assert_eq!("buy".parse::<Directive>().unwrap(), Directive::Buy);
        assert_eq!(" Tick ".parse::<Directive>().unwrap(), Directive::Tick);
        assert_eq!("HOLD".parse::<Directive>().unwrap_err(), "invalid side");
    }

    #[test]
    fn test_strategy_mode_scalp_gate() {
        assert!(!StrategyMode::Core.allows_scalp());
        assert!(StrategyMode::Auto.allows_scalp());
        assert_eq!(StrategyMode::default(), StrategyMode::Core);
    }
}
