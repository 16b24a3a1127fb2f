//! Configuration for simulation runs and performance analysis.

use crate::types::ParameterVector;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Parameter names that override [`BacktestConfig`] fields when present in a
/// parameter vector.
pub const OVERRIDE_STOP_LOSS: &str = "stop_loss_percent";
pub const OVERRIDE_TAKE_PROFIT: &str = "take_profit_percent";
pub const OVERRIDE_MAX_POSITION_SIZE: &str = "max_position_size";
pub const OVERRIDE_COMMISSION: &str = "commission";
pub const OVERRIDE_SLIPPAGE: &str = "slippage";

/// Configuration for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Candles before this instant are ignored.
    pub start_date: Option<DateTime<Utc>>,
    /// Candles after this instant are ignored.
    pub end_date: Option<DateTime<Utc>>,
    pub initial_balance: Decimal,
    /// Commission as a fraction of traded notional.
    pub commission: Decimal,
    /// Adverse fill shift as a fraction of price.
    pub slippage: Decimal,
    /// Maximum notional of one entry as a fraction of free cash.
    pub max_position_size: Decimal,
    /// Stop distance from entry as a fraction, `None` disables.
    pub stop_loss_percent: Option<Decimal>,
    /// Target distance from entry as a fraction, `None` disables.
    pub take_profit_percent: Option<Decimal>,
    pub max_concurrent_trades: usize,
    /// Minimum time between two entries.
    pub min_trade_interval_ms: i64,
    /// Whether a sell signal while flat opens a short.
    pub allow_short: bool,
    /// Entry signals below this confidence are ignored.
    pub min_confidence: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            initial_balance: Decimal::new(100_000, 0),
            commission: Decimal::new(5, 4),  // 0.05%
            slippage: Decimal::new(5, 4),    // 0.05%
            max_position_size: Decimal::ONE, // 100% of free cash
            stop_loss_percent: Some(Decimal::new(5, 2)),
            take_profit_percent: Some(Decimal::new(10, 2)),
            max_concurrent_trades: 1,
            min_trade_interval_ms: 0,
            allow_short: false,
            min_confidence: 0.0,
        }
    }
}

impl BacktestConfig {
    /// A cost-free configuration, handy for tests and benchmarks.
    pub fn frictionless(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            commission: Decimal::ZERO,
            slippage: Decimal::ZERO,
            ..Default::default()
        }
    }

    /// Load configuration from `LAB_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            start_date: env_parse_opt::<DateTime<Utc>>("LAB_START_DATE")?,
            end_date: env_parse_opt::<DateTime<Utc>>("LAB_END_DATE")?,
            initial_balance: env_parse("LAB_INITIAL_BALANCE", defaults.initial_balance)?,
            commission: env_parse("LAB_COMMISSION", defaults.commission)?,
            slippage: env_parse("LAB_SLIPPAGE", defaults.slippage)?,
            max_position_size: env_parse("LAB_MAX_POSITION_SIZE", defaults.max_position_size)?,
            stop_loss_percent: env_parse_opt("LAB_STOP_LOSS_PERCENT")?.or(defaults.stop_loss_percent),
            take_profit_percent: env_parse_opt("LAB_TAKE_PROFIT_PERCENT")?
                .or(defaults.take_profit_percent),
            max_concurrent_trades: env_parse("LAB_MAX_CONCURRENT_TRADES", defaults.max_concurrent_trades)?,
            min_trade_interval_ms: env_parse("LAB_MIN_TRADE_INTERVAL_MS", defaults.min_trade_interval_ms)?,
            allow_short: env_parse("LAB_ALLOW_SHORT", defaults.allow_short)?,
            min_confidence: env_parse("LAB_MIN_CONFIDENCE", defaults.min_confidence)?,
        })
    }

    /// Check that the configuration can drive a simulation.
    pub fn validate(&self) -> Result<()> {
        if self.initial_balance <= Decimal::ZERO {
            return Err(Error::config("initial_balance must be positive"));
        }
        if self.commission < Decimal::ZERO || self.slippage < Decimal::ZERO {
            return Err(Error::config("commission and slippage must not be negative"));
        }
        if self.max_position_size <= Decimal::ZERO {
            return Err(Error::config("max_position_size must be positive"));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(Error::config("start_date is after end_date"));
            }
        }
        Ok(())
    }

    /// Copy of this configuration with reserved parameter names applied.
    ///
    /// A non-positive stop or target disables it.
    pub fn with_overrides(&self, params: &ParameterVector) -> Self {
        let mut config = self.clone();
        if let Some(v) = params.get(OVERRIDE_STOP_LOSS) {
            config.stop_loss_percent = (*v > Decimal::ZERO).then_some(*v);
        }
        if let Some(v) = params.get(OVERRIDE_TAKE_PROFIT) {
            config.take_profit_percent = (*v > Decimal::ZERO).then_some(*v);
        }
        if let Some(v) = params.get(OVERRIDE_MAX_POSITION_SIZE) {
            config.max_position_size = *v;
        }
        if let Some(v) = params.get(OVERRIDE_COMMISSION) {
            config.commission = *v;
        }
        if let Some(v) = params.get(OVERRIDE_SLIPPAGE) {
            config.slippage = *v;
        }
        config
    }
}

/// Configuration for the performance analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Return periods per year used to annualize volatility and ratios.
    pub periods_per_year: f64,
    /// Annual risk-free rate subtracted from returns in Sharpe/Sortino.
    pub risk_free_rate: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            periods_per_year: 252.0,
            risk_free_rate: 0.0,
        }
    }
}

impl AnalyzerConfig {
    pub fn with_periods_per_year(periods_per_year: f64) -> Self {
        Self {
            periods_per_year,
            ..Default::default()
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn env_parse_opt<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("{} has an invalid value: {}", key, raw))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BacktestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_balance, Decimal::new(100_000, 0));
        assert_eq!(config.max_concurrent_trades, 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = BacktestConfig {
            initial_balance: Decimal::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BacktestConfig {
            commission: Decimal::new(-1, 3),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_from_parameters() {
        let mut params = ParameterVector::new();
        params.insert(OVERRIDE_STOP_LOSS.to_string(), Decimal::new(2, 2));
        params.insert(OVERRIDE_TAKE_PROFIT.to_string(), Decimal::ZERO);
        params.insert("lookback".to_string(), Decimal::new(10, 0));

        let config = BacktestConfig::default().with_overrides(&params);
        assert_eq!(config.stop_loss_percent, Some(Decimal::new(2, 2)));
        assert_eq!(config.take_profit_percent, None);
        assert_eq!(config.max_position_size, Decimal::ONE);
    }

    #[test]
    fn test_env_parse_falls_back_to_default() {
        let value: usize = env_parse("LAB_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
        let value: Option<Decimal> = env_parse_opt("LAB_TEST_UNSET_VARIABLE").unwrap();
        assert!(value.is_none());
    }
}
