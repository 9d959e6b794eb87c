use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;

use crate::types::DurationClass;

#[derive(Debug, Clone)]
pub struct Config {
    // API Credentials (CLOB L2 auth headers)
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,

    // Telegram
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Entry rules
    pub buy_threshold: Decimal,
    pub entry_seconds_5m: i64,
    pub entry_seconds_15m: i64,
    /// Do not enter with fewer seconds than this before close.
    pub min_entry_seconds: i64,
    pub max_spread: Decimal,
    pub trade_size_usdc: Decimal,

    // Cut-loss rules
    pub cutloss_pm_price: Decimal,
    pub cutloss_reference_pct: Decimal,

    // Reference trend
    pub trend_window_secs: i64,
    pub trend_epsilon_pct: Decimal,

    // Universe
    pub assets: Vec<String>,
    pub market_types: Vec<DurationClass>,

    // Polling cadences (seconds)
    pub market_poll_interval: u64,
    pub entry_poll_interval: u64,
    pub position_poll_interval: u64,
    pub outcome_poll_interval: u64,
    pub fill_poll_interval: u64,
    pub settlement_grace_secs: i64,
    pub settlement_slow_poll: u64,

    // Order submission retry budget
    pub order_max_retries: u32,

    // Mode
    pub dry_run: bool,
    pub log_level: String,
    pub starting_balance: Decimal,
    pub db_path: String,

    // Endpoints
    pub clob_url: String,
    pub gamma_url: String,
    pub binance_ws_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let assets: Vec<String> = env::var("ASSETS")
            .unwrap_or_else(|_| "BTC,ETH,SOL".to_string())
            .split(',')
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .collect();

        let market_types: Vec<DurationClass> = env::var("MARKET_TYPES")
            .unwrap_or_else(|_| "5m,15m".to_string())
            .split(',')
            .filter_map(DurationClass::parse)
            .collect();
        anyhow::ensure!(!market_types.is_empty(), "MARKET_TYPES parsed to nothing");

        Ok(Config {
            api_key: env::var("POLY_API_KEY").unwrap_or_default(),
            api_secret: env::var("POLY_API_SECRET").unwrap_or_default(),
            api_passphrase: env::var("POLY_API_PASSPHRASE").unwrap_or_default(),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),

            buy_threshold: parse_decimal("BUY_THRESHOLD", "0.97")?,
            entry_seconds_5m: parse_i64("ENTRY_SECONDS_5M", "120")?,
            entry_seconds_15m: parse_i64("ENTRY_SECONDS_15M", "300")?,
            min_entry_seconds: parse_i64("MIN_ENTRY_SECONDS", "5")?,
            max_spread: parse_decimal("MAX_SPREAD", "0.05")?,
            trade_size_usdc: parse_decimal("TRADE_SIZE_USDC", "10.0")?,

            cutloss_pm_price: parse_decimal("CUTLOSS_PM_PRICE", "0.80")?,
            cutloss_reference_pct: parse_decimal("CUTLOSS_BINANCE_PCT", "0.003")?,

            trend_window_secs: parse_i64("TREND_WINDOW_SECS", "60")?,
            trend_epsilon_pct: parse_decimal("TREND_EPSILON_PCT", "0.002")?,

            assets,
            market_types,

            market_poll_interval: parse_u64("MARKET_POLL_INTERVAL", "20")?,
            entry_poll_interval: parse_u64("ENTRY_POLL_INTERVAL", "1")?,
            position_poll_interval: parse_u64("POSITION_POLL_INTERVAL", "5")?,
            outcome_poll_interval: parse_u64("OUTCOME_POLL_INTERVAL", "10")?,
            fill_poll_interval: parse_u64("FILL_POLL_INTERVAL", "1")?,
            settlement_grace_secs: parse_i64("SETTLEMENT_GRACE_SECS", "120")?,
            settlement_slow_poll: parse_u64("SETTLEMENT_SLOW_POLL", "60")?,

            order_max_retries: parse_u64("ORDER_MAX_RETRIES", "3")? as u32,

            dry_run: env::var("DRY_RUN")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            starting_balance: parse_decimal("STARTING_BALANCE", "0")?,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "trades.db".to_string()),

            clob_url: "https://clob.polymarket.com".to_string(),
            gamma_url: "https://gamma-api.polymarket.com".to_string(),
            binance_ws_base: "wss://stream.binance.com:9443/ws".to_string(),
        })
    }

    /// Live trading requires CLOB credentials. Dry-run does not.
    pub fn validate(&self) -> Result<()> {
        if !self.dry_run {
            anyhow::ensure!(!self.api_key.is_empty(), "POLY_API_KEY not set");
            anyhow::ensure!(!self.api_secret.is_empty(), "POLY_API_SECRET not set");
            anyhow::ensure!(
                !self.api_passphrase.is_empty(),
                "POLY_API_PASSPHRASE not set"
            );
        }
        Ok(())
    }

    /// Entry window in seconds before close for a duration class.
    pub fn entry_window(&self, duration: DurationClass) -> i64 {
        match duration {
            DurationClass::FiveMin => self.entry_seconds_5m,
            DurationClass::FifteenMin => self.entry_seconds_15m,
        }
    }

    /// Binance stream symbol for an asset, e.g. BTC -> btcusdt.
    pub fn asset_symbol(&self, asset: &str) -> String {
        format!("{}USDT", asset).to_lowercase()
    }

    pub fn telegram_enabled(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }

    /// Fixed defaults for unit tests, bypassing the environment.
    #[cfg(test)]
    pub fn test_default() -> Config {
        use rust_decimal_macros::dec;
        Config {
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            buy_threshold: dec!(0.97),
            entry_seconds_5m: 120,
            entry_seconds_15m: 300,
            min_entry_seconds: 5,
            max_spread: dec!(0.05),
            trade_size_usdc: dec!(10),
            cutloss_pm_price: dec!(0.80),
            cutloss_reference_pct: dec!(0.003),
            trend_window_secs: 60,
            trend_epsilon_pct: dec!(0.002),
            assets: vec!["BTC".into(), "ETH".into(), "SOL".into()],
            market_types: vec![DurationClass::FiveMin, DurationClass::FifteenMin],
            market_poll_interval: 20,
            entry_poll_interval: 1,
            position_poll_interval: 5,
            outcome_poll_interval: 10,
            fill_poll_interval: 1,
            settlement_grace_secs: 120,
            settlement_slow_poll: 60,
            order_max_retries: 3,
            dry_run: true,
            log_level: "info".into(),
            starting_balance: dec!(100),
            db_path: "trades.db".into(),
            clob_url: "https://clob.polymarket.com".into(),
            gamma_url: "https://gamma-api.polymarket.com".into(),
            binance_ws_base: "wss://stream.binance.com:9443/ws".into(),
        }
    }
}

fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", key))
}

fn parse_i64(key: &str, default: &str) -> Result<i64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", key))
}

fn parse_u64(key: &str, default: &str) -> Result<u64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", key))
}
