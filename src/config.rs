//! Bot configuration model.
//!
//! The full configuration tree is deserialized from a JSON document at
//! `ENGINE_CONFIG_PATH`, patched with `QUANTSAIL_*` environment overrides,
//! and cross-validated before the engine boots. Invalid configuration is
//! fatal at startup.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Execution mode for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    DryRun,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::DryRun => "dry-run",
            ExecutionMode::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    pub min_profit_usd: Decimal,
    pub taker_fee_bps: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::DryRun,
            min_profit_usd: dec!(0.10),
            taker_fee_bps: dec!(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub starting_cash_usd: Decimal,
    pub max_risk_per_trade_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            starting_cash_usd: dec!(10000),
            max_risk_per_trade_pct: dec!(2.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolsConfig {
    pub enabled: Vec<String>,
    pub max_concurrent_positions: usize,
}

impl Default for SymbolsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["BTC/USDT".to_string()],
            max_concurrent_positions: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub max_correlated_positions: usize,
    pub max_daily_trades: usize,
    pub max_daily_loss_usd: Decimal,
    pub max_portfolio_exposure_pct: Decimal,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            max_correlated_positions: 2,
            max_daily_trades: 20,
            max_daily_loss_usd: dec!(100),
            max_portfolio_exposure_pct: dec!(50),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub adx_period: usize,
    pub adx_threshold: Decimal,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            ema_fast: 12,
            ema_slow: 26,
            adx_period: 14,
            adx_threshold: dec!(25),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    pub bb_period: usize,
    pub bb_std_dev: Decimal,
    pub rsi_period: usize,
    pub rsi_oversold: Decimal,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_std_dev: dec!(2.0),
            rsi_period: 14,
            rsi_oversold: dec!(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutConfig {
    pub donchian_period: usize,
    pub atr_period: usize,
    pub atr_filter_mult: Decimal,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            donchian_period: 20,
            atr_period: 14,
            atr_filter_mult: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VwapReversionConfig {
    pub enabled: bool,
    pub deviation_entry_pct: Decimal,
    pub rsi_period: usize,
    pub rsi_oversold: Decimal,
    pub obv_confirmation: bool,
}

impl Default for VwapReversionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deviation_entry_pct: dec!(1.0),
            rsi_period: 14,
            rsi_oversold: dec!(35),
            obv_confirmation: true,
        }
    }
}

/// Per-symbol override of ensemble parameters. Unset fields fall back to the
/// global ensemble values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleOverride {
    pub min_agreement: Option<usize>,
    pub confidence_threshold: Option<f64>,
    pub weighted_threshold: Option<f64>,
    pub weight_trend: Option<f64>,
    pub weight_mean_reversion: Option<f64>,
    pub weight_breakout: Option<f64>,
    pub weight_vwap: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleMode {
    Agreement,
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub mode: EnsembleMode,
    pub min_agreement: usize,
    pub confidence_threshold: f64,
    pub weighted_threshold: f64,
    pub weight_trend: f64,
    pub weight_mean_reversion: f64,
    pub weight_breakout: f64,
    pub weight_vwap: f64,
    pub per_coin_overrides: HashMap<String, EnsembleOverride>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            mode: EnsembleMode::Agreement,
            min_agreement: 2,
            confidence_threshold: 0.6,
            weighted_threshold: 0.3,
            weight_trend: 1.0,
            weight_mean_reversion: 1.0,
            weight_breakout: 1.0,
            weight_vwap: 1.0,
            per_coin_overrides: HashMap::new(),
        }
    }
}

/// Per-symbol regime threshold override. Keys match by symbol prefix
/// (e.g. "BTC" matches "BTC/USDT").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeOverride {
    pub adx_threshold: Option<Decimal>,
    pub atr_threshold_pct: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub enabled: bool,
    pub adx_period: usize,
    pub adx_threshold: Decimal,
    pub atr_period: usize,
    pub atr_threshold_pct: Decimal,
    pub per_symbol_overrides: HashMap<String, RegimeOverride>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            adx_period: 14,
            adx_threshold: dec!(20),
            atr_period: 14,
            atr_threshold_pct: dec!(0.5),
            per_symbol_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    pub trend: TrendConfig,
    pub mean_reversion: MeanReversionConfig,
    pub breakout: BreakoutConfig,
    pub vwap_reversion: VwapReversionConfig,
    pub ensemble: EnsembleConfig,
    pub regime: RegimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopLossConfig {
    /// "fixed_pct" or "atr"
    pub method: String,
    pub fixed_pct: Decimal,
    pub atr_period: usize,
    pub atr_multiplier: Decimal,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            method: "atr".to_string(),
            fixed_pct: dec!(2.0),
            atr_period: 14,
            atr_multiplier: dec!(2.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeProfitConfig {
    /// "fixed_pct" or "risk_reward"
    pub method: String,
    pub fixed_pct: Decimal,
    pub risk_reward_ratio: Decimal,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            method: "risk_reward".to_string(),
            fixed_pct: dec!(4.0),
            risk_reward_ratio: dec!(2.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingStopConfig {
    pub enabled: bool,
    /// "pct", "atr", or "chandelier"
    pub method: String,
    pub activation_pct: Decimal,
    pub trail_pct: Decimal,
    pub atr_period: usize,
    pub atr_multiplier: Decimal,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: "pct".to_string(),
            activation_pct: dec!(1.0),
            trail_pct: dec!(1.0),
            atr_period: 14,
            atr_multiplier: dec!(2.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    Fixed,
    RiskPct,
    Kelly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSizingConfig {
    pub method: SizingMethod,
    pub fixed_quantity: Decimal,
    pub risk_pct: Decimal,
    pub max_position_pct: Decimal,
    pub kelly_fraction: Decimal,
}

impl Default for PositionSizingConfig {
    fn default() -> Self {
        Self {
            method: SizingMethod::RiskPct,
            fixed_quantity: dec!(0.001),
            risk_pct: dec!(1.0),
            max_position_pct: dec!(20.0),
            kelly_fraction: dec!(0.25),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityBreakerConfig {
    pub enabled: bool,
    pub atr_multiple_pause: Decimal,
    pub pause_minutes: i64,
}

impl Default for VolatilityBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            atr_multiple_pause: dec!(3.0),
            pause_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadBreakerConfig {
    pub enabled: bool,
    pub max_spread_bps: Decimal,
    pub pause_minutes: i64,
}

impl Default for SpreadBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_spread_bps: dec!(50),
            pause_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsecutiveLossesBreakerConfig {
    pub enabled: bool,
    pub max_losses: usize,
    pub pause_minutes: i64,
}

impl Default for ConsecutiveLossesBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_losses: 3,
            pause_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsBreakerConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersConfig {
    pub volatility: VolatilityBreakerConfig,
    pub spread_slippage: SpreadBreakerConfig,
    pub consecutive_losses: ConsecutiveLossesBreakerConfig,
    pub news: NewsBreakerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub enabled: bool,
    pub cooldown_minutes: i64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DailySymbolLimitConfig {
    pub enabled: bool,
    pub max_consecutive_losses: usize,
}

impl Default for DailySymbolLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_consecutive_losses: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreakSizerConfig {
    pub enabled: bool,
    pub min_consecutive_losses: usize,
    pub reduction_factor: Decimal,
}

impl Default for StreakSizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_consecutive_losses: 2,
            reduction_factor: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DailyLockMode {
    Stop,
    Overdrive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyConfig {
    pub enabled: bool,
    pub mode: DailyLockMode,
    pub target_usd: Decimal,
    pub overdrive_trailing_buffer_usd: Decimal,
    /// IANA timezone name defining the trading day boundary.
    pub timezone: String,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: DailyLockMode::Stop,
            target_usd: dec!(100),
            overdrive_trailing_buffer_usd: dec!(10),
            timezone: "UTC".to_string(),
        }
    }
}

/// Root configuration for the engine and API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub execution: ExecutionConfig,
    pub risk: RiskConfig,
    pub symbols: SymbolsConfig,
    pub portfolio: PortfolioConfig,
    pub strategies: StrategiesConfig,
    pub stop_loss: StopLossConfig,
    pub take_profit: TakeProfitConfig,
    pub trailing_stop: TrailingStopConfig,
    pub position_sizing: PositionSizingConfig,
    pub breakers: BreakersConfig,
    pub cooldown: CooldownConfig,
    pub daily_symbol_limit: DailySymbolLimitConfig,
    pub streak_sizer: StreakSizerConfig,
    pub daily: DailyConfig,
}

impl BotConfig {
    /// Cross-field validation. Called once at boot; failure is fatal.
    pub fn validate(&self) -> Result<()> {
        let trend = &self.strategies.trend;
        if trend.ema_fast >= trend.ema_slow {
            bail!(
                "strategies.trend: ema_fast ({}) must be < ema_slow ({})",
                trend.ema_fast,
                trend.ema_slow
            );
        }
        if self.risk.max_risk_per_trade_pct > self.portfolio.max_portfolio_exposure_pct {
            bail!(
                "risk.max_risk_per_trade_pct ({}) must be <= portfolio.max_portfolio_exposure_pct ({})",
                self.risk.max_risk_per_trade_pct,
                self.portfolio.max_portfolio_exposure_pct
            );
        }
        if self.portfolio.max_daily_loss_usd > dec!(2) * self.daily.target_usd {
            bail!(
                "portfolio.max_daily_loss_usd ({}) must be <= 2 x daily.target_usd ({})",
                self.portfolio.max_daily_loss_usd,
                self.daily.target_usd
            );
        }
        if self.symbols.enabled.is_empty() {
            bail!("symbols.enabled must list at least one symbol");
        }
        if self.position_sizing.kelly_fraction <= Decimal::ZERO
            || self.position_sizing.kelly_fraction > Decimal::ONE
        {
            bail!("position_sizing.kelly_fraction must be in (0, 1]");
        }
        if self.streak_sizer.reduction_factor <= Decimal::ZERO
            || self.streak_sizer.reduction_factor > Decimal::ONE
        {
            bail!("streak_sizer.reduction_factor must be in (0, 1]");
        }
        for (name, v) in [
            ("ensemble.confidence_threshold", self.strategies.ensemble.confidence_threshold),
            ("ensemble.weighted_threshold", self.strategies.ensemble.weighted_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                bail!("strategies.{name} must be in [0, 1]");
            }
        }
        self.daily
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| anyhow::anyhow!("daily.timezone: unknown timezone '{}'", self.daily.timezone))?;
        Ok(())
    }

    pub fn daily_timezone(&self) -> chrono_tz::Tz {
        // Validated at boot; default to UTC if something slipped through.
        self.daily
            .timezone
            .parse::<chrono_tz::Tz>()
            .unwrap_or(chrono_tz::UTC)
    }
}

/// Load configuration: JSON file (if `ENGINE_CONFIG_PATH` is set), then
/// `QUANTSAIL_*` env overrides, then validation.
pub fn load_config() -> Result<BotConfig> {
    let mut value = match std::env::var("ENGINE_CONFIG_PATH") {
        Ok(path) => {
            let raw = std::fs::read_to_string(Path::new(&path))
                .with_context(|| format!("failed to read config file {path}"))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config file {path}"))?
        }
        Err(_) => serde_json::to_value(BotConfig::default())?,
    };

    apply_env_overrides(&mut value)?;

    let config: BotConfig =
        serde_json::from_value(value).context("invalid configuration document")?;
    config.validate()?;
    Ok(config)
}

/// Apply `QUANTSAIL_<SECTION>_<FIELD>` single-field overrides onto the raw
/// config document. Path segments are matched greedily against existing keys
/// so sections containing underscores (e.g. `daily_symbol_limit`) resolve.
fn apply_env_overrides(value: &mut serde_json::Value) -> Result<()> {
    // Make sure defaulted sections exist as objects before patching into them.
    if let serde_json::Value::Object(root) = value {
        let defaults = serde_json::to_value(BotConfig::default())?;
        if let serde_json::Value::Object(default_map) = defaults {
            for (k, v) in default_map {
                root.entry(k).or_insert(v);
            }
        }
    }

    for (key, raw) in std::env::vars() {
        let Some(path) = key.strip_prefix("QUANTSAIL_") else {
            continue;
        };
        let path = path.to_lowercase();
        if let Err(e) = apply_override(value, &path, &raw) {
            bail!("invalid override {key}={raw}: {e}");
        }
    }
    Ok(())
}

fn apply_override(value: &mut serde_json::Value, path: &str, raw: &str) -> Result<()> {
    let obj = value
        .as_object_mut()
        .context("config root is not an object")?;

    // Greedy longest-match of the leading segments against existing keys.
    let mut matched: Option<(String, String)> = None;
    for (idx, _) in path.match_indices('_').chain(std::iter::once((path.len(), ""))) {
        let head = &path[..idx];
        if obj.contains_key(head) {
            let rest = path.get(idx + 1..).unwrap_or("").to_string();
            matched = Some((head.to_string(), rest));
        }
    }

    let (head, rest) = matched.with_context(|| format!("no config key matches '{path}'"))?;
    let parsed: serde_json::Value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));

    if rest.is_empty() {
        obj.insert(head, parsed);
        return Ok(());
    }
    let child = obj
        .get_mut(&head)
        .with_context(|| format!("missing section '{head}'"))?;
    if child.is_object() {
        apply_override(child, &rest, raw)
    } else {
        bail!("'{head}' is not a section");
    }
}

/// Runtime environment shared by the engine and API, read once at boot.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub master_key: Option<String>,
    pub binance_api_key: Option<String>,
    pub binance_secret: Option<String>,
    pub binance_testnet: bool,
    pub max_ticks: Option<u64>,
    pub port: u16,
    pub jwt_secret: String,
}

impl EnvSettings {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "./quantsail.db".to_string());
        // Tolerate a sqlite:// URL prefix; the repository wants a path.
        let database_url = database_url
            .strip_prefix("sqlite://")
            .unwrap_or(&database_url)
            .to_string();

        Self {
            database_url,
            redis_url: std::env::var("REDIS_URL").ok(),
            master_key: std::env::var("MASTER_KEY").ok(),
            binance_api_key: std::env::var("BINANCE_API_KEY").ok(),
            binance_secret: std::env::var("BINANCE_SECRET").ok(),
            binance_testnet: std::env::var("BINANCE_TESTNET")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            max_ticks: std::env::var("MAX_TICKS").ok().and_then(|v| v.parse().ok()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "quantsail-dev-secret".to_string()),
        }
    }
}
