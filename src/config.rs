use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::domain::{StrategyMode, Venue};
use crate::strategy::DecisionParams;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub venues: VenueGateConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared webhook secret; empty rejects every execute call
    pub secret: String,
}

/// Which venue/mode combinations may be executed at all
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VenueGateConfig {
    pub allow_mainnet: bool,
    pub allow_live: bool,
}

/// Exit behaviour for profit-lock sells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExitMode {
    /// TICK and SELL may both market-sell
    #[default]
    Market,
    /// Only a SELL signal can sell; TICK only updates bookkeeping
    MarketOnSellSignal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub default_strategy: StrategyMode,
    pub symbol_allowlist: Vec<String>,
    /// Minimum gap between BUY actions
    pub cooldown_ms: i64,
    pub min_notional: Decimal,
    pub max_notional: Decimal,
    /// Default notional for core open / core DCA
    pub base_order_notional: Decimal,
    /// Default notional for scalp open / scalp DCA
    pub scalp_order_notional: Decimal,
    /// Cap on core + open cycle cost basis
    pub max_total_exposure: Decimal,
    /// Taker fee in basis points (10 = 0.10%)
    pub taker_fee_bps: Decimal,
    /// Net profit (after all fees) required to sell
    pub profit_lock_net: Decimal,
    /// Net profit that arms the trailing lock
    pub profit_lock_arm: Decimal,
    pub trail_pct: Decimal,
    pub dca_max: u32,
    pub dca_step_pct: Decimal,
    pub dca_cooldown_ms: i64,
    pub allow_scalp: bool,
    pub scalp_max_open: usize,
    pub allow_rebuy: bool,
    pub exit_mode: ExitMode,
    /// Base quantity precision sent to the exchange
    pub qty_decimals: u32,
    pub price_cache_ms: i64,
    /// Quote amount a realized sell may fall under target before it is logged as an error
    pub max_realized_shortfall: Decimal,
    /// Named override profile (`canary`)
    pub profile: Option<String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyMode::Core,
            symbol_allowlist: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "BNBUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            cooldown_ms: 15_000,
            min_notional: dec!(50),
            max_notional: dec!(250),
            base_order_notional: dec!(250),
            scalp_order_notional: dec!(250),
            max_total_exposure: dec!(2000),
            taker_fee_bps: dec!(10),
            profit_lock_net: dec!(1.0),
            profit_lock_arm: dec!(1.4),
            trail_pct: dec!(0.25),
            dca_max: 5,
            dca_step_pct: dec!(0.5),
            dca_cooldown_ms: 300_000,
            allow_scalp: true,
            scalp_max_open: 2,
            allow_rebuy: true,
            exit_mode: ExitMode::Market,
            qty_decimals: 6,
            price_cache_ms: 2_000,
            max_realized_shortfall: dec!(0.5),
            profile: None,
        }
    }
}

impl StrategyConfig {
    /// Taker fee as a fraction
    pub fn fee_rate(&self) -> Decimal {
        self.taker_fee_bps / dec!(10000)
    }

    /// Clamp a requested notional into `[min_notional, max_notional]`, using `fallback` when absent.
    pub fn clamp_notional(&self, requested: Option<Decimal>, fallback: Decimal) -> Decimal {
        requested
            .unwrap_or(fallback)
            .max(self.min_notional)
            .min(self.max_notional)
    }

    pub fn is_symbol_allowed(&self, symbol: &str) -> bool {
        let wanted = symbol.trim().to_uppercase();
        self.symbol_allowlist
            .iter()
            .any(|s| s.trim().to_uppercase() == wanted)
    }
}

/// Pause-only price-drop breaker
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub drop_pct: Decimal,
    pub window_ms: i64,
    pub pause_ms: i64,
    /// Also withhold profit-lock exits while paused
    pub block_exits: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            drop_pct: dec!(3.0),
            window_ms: 120_000,
            pause_ms: 600_000,
            block_exits: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// PostgreSQL connection URL
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub idempotency_ttl_ms: i64,
    /// Write position state for paper (test-endpoint) executions too
    pub persist_paper_state: bool,
    /// Per-call timeout for store operations
    pub timeout_ms: u64,
    /// Period of the expired-idempotency sweep while serving; 0 disables it
    pub cleanup_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 5,
            idempotency_ttl_ms: 86_400_000,
            persist_paper_state: false,
            timeout_ms: 8_000,
            cleanup_interval_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VenueCredentialsConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub mainnet: VenueCredentialsConfig,
    pub testnet: VenueCredentialsConfig,
    pub request_timeout_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            mainnet: VenueCredentialsConfig {
                base_url: "https://api-gcp.binance.com".to_string(),
                ..Default::default()
            },
            testnet: VenueCredentialsConfig {
                base_url: "https://testnet.binance.vision".to_string(),
                ..Default::default()
            },
            request_timeout_ms: 8_000,
        }
    }
}

impl ExchangeConfig {
    pub fn venue(&self, venue: Venue) -> &VenueCredentialsConfig {
        match venue {
            Venue::Mainnet => &self.mainnet,
            Venue::Testnet => &self.testnet,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("EXECUTOR_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // EXECUTOR__AUTH__SECRET, EXECUTOR__STRATEGY__SYMBOL_ALLOWLIST=BTCUSDT,ETHUSDT, ...
            .add_source(
                Environment::with_prefix("EXECUTOR")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("strategy.symbol_allowlist")
                    .try_parsing(true),
            );

        let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.apply_profile();
        Ok(cfg)
    }

    /// Apply a named override profile on top of the loaded values
    pub fn apply_profile(&mut self) {
        let is_canary = self
            .strategy
            .profile
            .as_deref()
            .is_some_and(|p| p.trim().eq_ignore_ascii_case("canary"));
        if !is_canary {
            return;
        }

        self.strategy.scalp_max_open = 1;
        self.strategy.dca_max = 0;
        self.strategy.max_total_exposure = dec!(25);
        self.strategy.max_notional = dec!(15);
        info!(
            profile = "canary",
            scalp_max_open = self.strategy.scalp_max_open,
            dca_max = self.strategy.dca_max,
            max_total_exposure = %self.strategy.max_total_exposure,
            max_notional = %self.strategy.max_notional,
            "profile override applied"
        );
    }

    /// Parameters for the pure decision functions
    pub fn decision_params(&self) -> DecisionParams {
        DecisionParams {
            fee_rate: self.strategy.fee_rate(),
            profit_lock_net: self.strategy.profit_lock_net,
            profit_lock_arm: self.strategy.profit_lock_arm,
            trail_pct: self.strategy.trail_pct,
            dca_max: self.strategy.dca_max,
            dca_step_pct: self.strategy.dca_step_pct,
            dca_cooldown_ms: self.strategy.dca_cooldown_ms,
            stop_drop_pct: self.circuit_breaker.drop_pct,
            stop_window_ms: self.circuit_breaker.window_ms,
            pause_ms: self.circuit_breaker.pause_ms,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let s = &self.strategy;

        if s.min_notional <= Decimal::ZERO {
            errors.push("min_notional must be positive".to_string());
        }
        if s.min_notional > s.max_notional {
            errors.push(format!(
                "min_notional ({}) must not exceed max_notional ({})",
                s.min_notional, s.max_notional
            ));
        }
        if s.taker_fee_bps < Decimal::ZERO || s.taker_fee_bps >= dec!(10000) {
            errors.push("taker_fee_bps must be in [0, 10000)".to_string());
        }
        if s.trail_pct <= Decimal::ZERO || s.trail_pct >= dec!(100) {
            errors.push("trail_pct must be between 0 and 100".to_string());
        }
        if s.dca_step_pct <= Decimal::ZERO || s.dca_step_pct >= dec!(100) {
            errors.push("dca_step_pct must be between 0 and 100".to_string());
        }
        if s.profit_lock_arm < s.profit_lock_net {
            errors.push("profit_lock_arm should not be below profit_lock_net".to_string());
        }
        if s.max_realized_shortfall < Decimal::ZERO {
            errors.push("max_realized_shortfall must not be negative".to_string());
        }
        if s.qty_decimals > 16 {
            errors.push("qty_decimals must be at most 16".to_string());
        }
        if self.circuit_breaker.drop_pct <= Decimal::ZERO {
            errors.push("circuit_breaker.drop_pct must be positive".to_string());
        }
        if self.store.backend == StoreBackend::Postgres
            && self
                .store
                .database_url
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            errors.push("store.database_url is required for the postgres backend".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
