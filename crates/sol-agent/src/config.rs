//! Configuration for sol-agent.
//!
//! Supports loading from a TOML file with environment variable overrides.
//! All orchestration and risk parameters are defined here; components take
//! their sub-config by value so tests can construct them directly.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Top-level configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Logging level ("trace".."error").
    pub log_level: String,

    /// Upstream RPC parameters.
    pub rpc: RpcConfig,

    /// Trading thresholds and sizing percentages.
    pub trading: TradingConfig,

    /// Risk-manager parameters.
    pub risk: RiskConfig,

    /// Control-loop pacing parameters.
    pub scheduler: SchedulerConfig,

    /// Wallet keystore location.
    pub wallet: WalletConfig,
}

/// Upstream Solana RPC parameters.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP endpoint of the RPC provider.
    pub url: String,

    /// Accounts per batched balance query.
    pub batch_size: usize,

    /// Local hard ceiling: calls per trailing second.
    pub max_calls_per_second: usize,

    /// Local hard ceiling: calls per trailing minute.
    pub max_calls_per_minute: usize,

    /// Retry attempts for transient RPC failures.
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries.
    pub retry_base_delay: Duration,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Balance cache TTL.
    pub balance_cache_ttl: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            batch_size: 15,
            max_calls_per_second: 10,
            max_calls_per_minute: 100,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            balance_cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Trading thresholds and per-risk sizing percentages.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Minimum balance for an account to be scanned (SOL).
    pub min_balance_sol: Decimal,

    /// Absolute sizing ceiling as a fraction of balance.
    pub max_position_pct: Decimal,

    /// Base sizing fraction for high-risk opportunities.
    pub high_risk_position_pct: Decimal,

    /// Base sizing fraction for medium-risk opportunities.
    pub medium_risk_position_pct: Decimal,

    /// Base sizing fraction for low-risk opportunities.
    pub low_risk_position_pct: Decimal,

    /// Expected profit above which a high-value notification fires (SOL).
    pub high_value_profit_sol: Decimal,

    /// Drop opportunities whose gas fee exceeds this fraction of profit.
    pub max_fee_profit_ratio: Decimal,

    /// Estimated gas fee used by the fee-ratio filter (SOL).
    pub estimated_gas_fee_sol: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_balance_sol: dec!(0.1),
            max_position_pct: dec!(0.10),
            high_risk_position_pct: dec!(0.05),
            medium_risk_position_pct: dec!(0.10),
            low_risk_position_pct: dec!(0.20),
            high_value_profit_sol: dec!(0.1),
            max_fee_profit_ratio: dec!(0.05),
            estimated_gas_fee_sol: dec!(0.000015),
        }
    }
}

/// Risk-manager parameters.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Daily loss fraction of the day's starting balance that trips the breaker.
    pub max_daily_loss_pct: Decimal,

    /// Consecutive losses that trigger the one-time allocation cut.
    pub consecutive_loss_threshold: u32,

    /// Multiplicative allocation reduction applied at the threshold.
    pub consecutive_loss_reduction: Decimal,

    /// Length of the daily-loss pause.
    pub daily_loss_pause: Duration,

    /// Rolling window length for allocation recomputation.
    pub allocation_window: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: dec!(0.20),
            consecutive_loss_threshold: 3,
            consecutive_loss_reduction: dec!(0.50),
            daily_loss_pause: Duration::from_secs(24 * 3600),
            allocation_window: 10,
        }
    }
}

/// Control-loop pacing parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Default inter-cycle delay. Clamped to [60, 86400] by `validate`.
    pub scan_interval: Duration,

    /// Floor for the adaptive inter-cycle delay.
    pub min_scan_interval: Duration,

    /// Consecutive zero-opportunity cycles before switching to the quiet interval.
    pub empty_scan_threshold: u32,

    /// Quiet interval used after `empty_scan_threshold` empty cycles.
    pub empty_scan_interval: Duration,

    /// Fractional interval increase after a rate-limit sighting.
    pub rate_limit_interval_increase: Decimal,

    /// Account count above which cycles are staggered into batches.
    pub stagger_threshold: usize,

    /// Accounts per stagger batch.
    pub stagger_batch_size: usize,

    /// Window over which staggered batches are spread.
    pub stagger_window: Duration,

    /// Timeout for the judgment-service call.
    pub decision_timeout: Duration,

    /// Timeout for a user approval round-trip.
    pub approval_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(300),
            min_scan_interval: Duration::from_secs(5),
            empty_scan_threshold: 10,
            empty_scan_interval: Duration::from_secs(30),
            rate_limit_interval_increase: dec!(0.50),
            stagger_threshold: 100,
            stagger_batch_size: 20,
            stagger_window: Duration::from_secs(60),
            decision_timeout: Duration::from_secs(30),
            approval_timeout: Duration::from_secs(60),
        }
    }
}

/// Wallet keystore location.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Path of the JSON keystore file.
    pub keystore_path: std::path::PathBuf,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keystore_path: std::path::PathBuf::from("data/keystore.json"),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            rpc: RpcConfig::default(),
            trading: TradingConfig::default(),
            risk: RiskConfig::default(),
            scheduler: SchedulerConfig::default(),
            wallet: WalletConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment variable overrides.
    ///
    /// Every key in the configuration surface can be set from the
    /// environment; malformed values are ignored in favor of the
    /// file/default value.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SOLANA_RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(v) = env_u64("SCAN_INTERVAL") {
            self.scheduler.scan_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("MIN_SCAN_INTERVAL") {
            self.scheduler.min_scan_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_decimal("MAX_POSITION_PCT") {
            self.trading.max_position_pct = v;
        }
        if let Some(v) = env_decimal("MAX_DAILY_LOSS_PCT") {
            self.risk.max_daily_loss_pct = v;
        }
        if let Some(v) = env_decimal("MIN_BALANCE_SOL") {
            self.trading.min_balance_sol = v;
        }
        if let Some(v) = env_decimal("HIGH_RISK_POSITION_PCT") {
            self.trading.high_risk_position_pct = v;
        }
        if let Some(v) = env_decimal("MEDIUM_RISK_POSITION_PCT") {
            self.trading.medium_risk_position_pct = v;
        }
        if let Some(v) = env_decimal("LOW_RISK_POSITION_PCT") {
            self.trading.low_risk_position_pct = v;
        }
        if let Some(v) = env_u64("CONSECUTIVE_LOSS_THRESHOLD") {
            self.risk.consecutive_loss_threshold = v as u32;
        }
        if let Some(v) = env_decimal("CONSECUTIVE_LOSS_REDUCTION") {
            self.risk.consecutive_loss_reduction = v;
        }
        if let Some(v) = env_u64("RPC_BATCH_SIZE") {
            self.rpc.batch_size = v as usize;
        }
        if let Some(v) = env_u64("SCAN_STAGGER_WINDOW") {
            self.scheduler.stagger_window = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("EMPTY_SCAN_THRESHOLD") {
            self.scheduler.empty_scan_threshold = v as u32;
        }
        if let Some(v) = env_u64("EMPTY_SCAN_INTERVAL") {
            self.scheduler.empty_scan_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_decimal("RATE_LIMIT_INTERVAL_INCREASE") {
            self.scheduler.rate_limit_interval_increase = v;
        }
        if let Ok(path) = std::env::var("WALLET_KEYSTORE_PATH") {
            self.wallet.keystore_path = path.into();
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_cli_overrides(&mut self, rpc_url: Option<String>, log_level: Option<String>) {
        if let Some(url) = rpc_url {
            self.rpc.url = url;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
    }

    /// Validate and normalize the configuration.
    ///
    /// The default scan interval is clamped to [60, 86400] seconds; the
    /// adaptive floor stays separate and may go as low as configured.
    pub fn validate(&mut self) -> Result<()> {
        let secs = self.scheduler.scan_interval.as_secs().clamp(60, 86_400);
        self.scheduler.scan_interval = Duration::from_secs(secs);

        if self.rpc.url.is_empty() {
            bail!("rpc.url must not be empty");
        }
        if self.rpc.batch_size == 0 {
            bail!("rpc.batch_size must be at least 1");
        }
        if self.rpc.max_calls_per_second == 0 || self.rpc.max_calls_per_minute == 0 {
            bail!("rate-limit ceilings must be at least 1");
        }

        for (name, pct) in [
            ("max_position_pct", self.trading.max_position_pct),
            ("high_risk_position_pct", self.trading.high_risk_position_pct),
            (
                "medium_risk_position_pct",
                self.trading.medium_risk_position_pct,
            ),
            ("low_risk_position_pct", self.trading.low_risk_position_pct),
            ("max_daily_loss_pct", self.risk.max_daily_loss_pct),
        ] {
            if pct <= Decimal::ZERO || pct > Decimal::ONE {
                bail!("{name} must be in (0, 1], got {pct}");
            }
        }

        if self.risk.consecutive_loss_threshold == 0 {
            bail!("consecutive_loss_threshold must be at least 1");
        }
        if self.risk.consecutive_loss_reduction <= Decimal::ZERO
            || self.risk.consecutive_loss_reduction >= Decimal::ONE
        {
            bail!("consecutive_loss_reduction must be in (0, 1)");
        }
        if self.scheduler.stagger_batch_size == 0 {
            bail!("stagger_batch_size must be at least 1");
        }
        if self.trading.min_balance_sol < Decimal::ZERO {
            bail!("min_balance_sol must not be negative");
        }

        Ok(())
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_decimal(key: &str) -> Option<Decimal> {
    std::env::var(key).ok()?.trim().parse().ok()
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    rpc: RpcToml,
    #[serde(default)]
    trading: TradingToml,
    #[serde(default)]
    risk: RiskToml,
    #[serde(default)]
    scheduler: SchedulerToml,
    #[serde(default)]
    wallet: WalletToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RpcToml {
    url: String,
    batch_size: usize,
    max_calls_per_second: usize,
    max_calls_per_minute: usize,
    max_retries: u32,
    retry_base_delay_ms: u64,
    request_timeout_secs: u64,
    balance_cache_ttl_secs: u64,
}

impl Default for RpcToml {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            batch_size: 15,
            max_calls_per_second: 10,
            max_calls_per_minute: 100,
            max_retries: 3,
            retry_base_delay_ms: 500,
            request_timeout_secs: 30,
            balance_cache_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TradingToml {
    min_balance_sol: f64,
    max_position_pct: f64,
    high_risk_position_pct: f64,
    medium_risk_position_pct: f64,
    low_risk_position_pct: f64,
    high_value_profit_sol: f64,
    max_fee_profit_ratio: f64,
    estimated_gas_fee_sol: f64,
}

impl Default for TradingToml {
    fn default() -> Self {
        Self {
            min_balance_sol: 0.1,
            max_position_pct: 0.10,
            high_risk_position_pct: 0.05,
            medium_risk_position_pct: 0.10,
            low_risk_position_pct: 0.20,
            high_value_profit_sol: 0.1,
            max_fee_profit_ratio: 0.05,
            estimated_gas_fee_sol: 0.000015,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RiskToml {
    max_daily_loss_pct: f64,
    consecutive_loss_threshold: u32,
    consecutive_loss_reduction: f64,
    daily_loss_pause_hours: u64,
    allocation_window: usize,
}

impl Default for RiskToml {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.20,
            consecutive_loss_threshold: 3,
            consecutive_loss_reduction: 0.50,
            daily_loss_pause_hours: 24,
            allocation_window: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SchedulerToml {
    scan_interval_secs: u64,
    min_scan_interval_secs: u64,
    empty_scan_threshold: u32,
    empty_scan_interval_secs: u64,
    rate_limit_interval_increase: f64,
    stagger_threshold: usize,
    stagger_batch_size: usize,
    stagger_window_secs: u64,
    decision_timeout_secs: u64,
    approval_timeout_secs: u64,
}

impl Default for SchedulerToml {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            min_scan_interval_secs: 5,
            empty_scan_threshold: 10,
            empty_scan_interval_secs: 30,
            rate_limit_interval_increase: 0.50,
            stagger_threshold: 100,
            stagger_batch_size: 20,
            stagger_window_secs: 60,
            decision_timeout_secs: 30,
            approval_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WalletToml {
    keystore_path: String,
}

impl Default for WalletToml {
    fn default() -> Self {
        Self {
            keystore_path: "data/keystore.json".to_string(),
        }
    }
}

/// Convert an f64 TOML value to Decimal, defaulting to zero on overflow.
fn f64_to_decimal(val: f64) -> Decimal {
    Decimal::try_from(val).unwrap_or(Decimal::ZERO)
}

impl From<TomlConfig> for AgentConfig {
    fn from(toml: TomlConfig) -> Self {
        Self {
            log_level: toml.general.log_level,
            rpc: RpcConfig {
                url: toml.rpc.url,
                batch_size: toml.rpc.batch_size,
                max_calls_per_second: toml.rpc.max_calls_per_second,
                max_calls_per_minute: toml.rpc.max_calls_per_minute,
                max_retries: toml.rpc.max_retries,
                retry_base_delay: Duration::from_millis(toml.rpc.retry_base_delay_ms),
                request_timeout: Duration::from_secs(toml.rpc.request_timeout_secs),
                balance_cache_ttl: Duration::from_secs(toml.rpc.balance_cache_ttl_secs),
            },
            trading: TradingConfig {
                min_balance_sol: f64_to_decimal(toml.trading.min_balance_sol),
                max_position_pct: f64_to_decimal(toml.trading.max_position_pct),
                high_risk_position_pct: f64_to_decimal(toml.trading.high_risk_position_pct),
                medium_risk_position_pct: f64_to_decimal(toml.trading.medium_risk_position_pct),
                low_risk_position_pct: f64_to_decimal(toml.trading.low_risk_position_pct),
                high_value_profit_sol: f64_to_decimal(toml.trading.high_value_profit_sol),
                max_fee_profit_ratio: f64_to_decimal(toml.trading.max_fee_profit_ratio),
                estimated_gas_fee_sol: f64_to_decimal(toml.trading.estimated_gas_fee_sol),
            },
            risk: RiskConfig {
                max_daily_loss_pct: f64_to_decimal(toml.risk.max_daily_loss_pct),
                consecutive_loss_threshold: toml.risk.consecutive_loss_threshold,
                consecutive_loss_reduction: f64_to_decimal(toml.risk.consecutive_loss_reduction),
                daily_loss_pause: Duration::from_secs(toml.risk.daily_loss_pause_hours * 3600),
                allocation_window: toml.risk.allocation_window,
            },
            scheduler: SchedulerConfig {
                scan_interval: Duration::from_secs(toml.scheduler.scan_interval_secs),
                min_scan_interval: Duration::from_secs(toml.scheduler.min_scan_interval_secs),
                empty_scan_threshold: toml.scheduler.empty_scan_threshold,
                empty_scan_interval: Duration::from_secs(toml.scheduler.empty_scan_interval_secs),
                rate_limit_interval_increase: f64_to_decimal(
                    toml.scheduler.rate_limit_interval_increase,
                ),
                stagger_threshold: toml.scheduler.stagger_threshold,
                stagger_batch_size: toml.scheduler.stagger_batch_size,
                stagger_window: Duration::from_secs(toml.scheduler.stagger_window_secs),
                decision_timeout: Duration::from_secs(toml.scheduler.decision_timeout_secs),
                approval_timeout: Duration::from_secs(toml.scheduler.approval_timeout_secs),
            },
            wallet: WalletConfig {
                keystore_path: toml.wallet.keystore_path.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.trading.min_balance_sol, dec!(0.1));
        assert_eq!(config.risk.consecutive_loss_threshold, 3);
        assert_eq!(config.rpc.max_calls_per_second, 10);
        assert_eq!(config.rpc.max_calls_per_minute, 100);
    }

    #[test]
    fn test_parse_toml_overrides() {
        let toml = r#"
            [general]
            log_level = "debug"

            [trading]
            min_balance_sol = 0.5
            low_risk_position_pct = 0.15

            [scheduler]
            scan_interval_secs = 600
        "#;
        let config = AgentConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.trading.min_balance_sol, dec!(0.5));
        assert_eq!(config.trading.low_risk_position_pct, dec!(0.15));
        assert_eq!(config.scheduler.scan_interval, Duration::from_secs(600));
        // Untouched sections keep defaults.
        assert_eq!(config.risk.max_daily_loss_pct, dec!(0.20));
    }

    #[test]
    fn test_validate_clamps_scan_interval() {
        let mut config = AgentConfig::default();
        config.scheduler.scan_interval = Duration::from_secs(10);
        config.validate().unwrap();
        assert_eq!(config.scheduler.scan_interval, Duration::from_secs(60));

        config.scheduler.scan_interval = Duration::from_secs(100_000);
        config.validate().unwrap();
        assert_eq!(config.scheduler.scan_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn test_validate_rejects_bad_percentages() {
        let mut config = AgentConfig::default();
        config.trading.max_position_pct = dec!(1.5);
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.risk.consecutive_loss_reduction = dec!(1.0);
        assert!(config.validate().is_err());
    }
}
