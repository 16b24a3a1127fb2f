//! Lab configuration: data settings plus every component's config.

use backtest_core::{AnalyzerConfig, BacktestConfig, Error, Result, TimeResolution};
use optimizer::{OptimizationConfig, WalkForwardConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::comparison::CompositeWeights;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Directory of `<symbol>_<resolution>.csv` files.
    pub data_dir: PathBuf,
    /// TimescaleDB connection, used instead of CSV files when set.
    pub database_url: Option<String>,
    pub symbol: String,
    pub resolution: TimeResolution,
    /// Days of history to load, ending now.
    pub lookback_days: i64,
    /// Registered strategy name.
    pub strategy: String,
    pub backtest: BacktestConfig,
    pub analyzer: AnalyzerConfig,
    pub optimization: OptimizationConfig,
    pub walk_forward: Option<WalkForwardConfig>,
    pub weights: CompositeWeights,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_url: None,
            symbol: "BTC-KRW".to_string(),
            resolution: TimeResolution::Hour,
            lookback_days: 90,
            strategy: "momentum".to_string(),
            backtest: BacktestConfig::default(),
            analyzer: AnalyzerConfig::with_periods_per_year(TimeResolution::Hour.periods_per_year()),
            optimization: OptimizationConfig::default(),
            walk_forward: None,
            weights: CompositeWeights::default(),
        }
    }
}

impl LabConfig {
    /// Load from `LAB_*` environment variables (and `.env`).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let resolution = match env::var("LAB_RESOLUTION") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.resolution,
        };
        let mut optimization = defaults.optimization;
        if let Ok(raw) = env::var("LAB_OBJECTIVE") {
            optimization.objective = raw.parse().map_err(|e| Error::config(format!("LAB_OBJECTIVE: {}", e)))?;
        }
        if let Ok(raw) = env::var("LAB_WORKERS") {
            optimization.workers = Some(
                raw.trim()
                    .parse()
                    .map_err(|_| Error::config(format!("LAB_WORKERS has an invalid value: {}", raw)))?,
            );
        }

        let config = Self {
            data_dir: env::var("LAB_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            database_url: env::var("LAB_DATABASE_URL")
                .or_else(|_| env::var("DATABASE_URL"))
                .ok(),
            symbol: env::var("LAB_SYMBOL").unwrap_or(defaults.symbol),
            resolution,
            lookback_days: match env::var("LAB_LOOKBACK_DAYS") {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| Error::config(format!("LAB_LOOKBACK_DAYS has an invalid value: {}", raw)))?,
                Err(_) => defaults.lookback_days,
            },
            strategy: env::var("LAB_STRATEGY").unwrap_or(defaults.strategy),
            backtest: BacktestConfig::from_env()?,
            analyzer: AnalyzerConfig::with_periods_per_year(resolution.periods_per_year()),
            optimization,
            walk_forward: defaults.walk_forward,
            weights: defaults.weights,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML/JSON/YAML file, then apply `LAB__*` overrides
    /// (double underscore separates nested keys, e.g. `LAB__BACKTEST__COMMISSION`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("LAB").prefix_separator("__").separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::config("symbol must not be empty"));
        }
        if self.lookback_days <= 0 {
            return Err(Error::config("lookback_days must be positive"));
        }
        self.backtest.validate()?;
        self.weights.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimizer::Objective;
    use rust_decimal::Decimal;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = LabConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analyzer.periods_per_year, TimeResolution::Hour.periods_per_year());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
symbol = "ETH-KRW"
resolution = "day"
strategy = "buy_and_hold"

[backtest]
commission = "0.001"

[optimization]
objective = "profit"

[optimization.parameters.lookback]
min = "5"
max = "20"
step = "5"

[walk_forward]
anchored = true
"#
        )
        .unwrap();

        let config = LabConfig::from_file(file.path()).unwrap();
        assert_eq!(config.symbol, "ETH-KRW");
        assert_eq!(config.resolution, TimeResolution::Day);
        assert_eq!(config.backtest.commission, Decimal::new(1, 3));
        assert_eq!(config.optimization.objective, Objective::Profit);
        assert_eq!(config.optimization.parameters["lookback"].count(), 4);
        assert!(config.walk_forward.unwrap().anchored);
        assert_eq!(config.lookback_days, 90);
    }

    #[test]
    fn test_validate_rejects_empty_symbol() {
        let config = LabConfig {
            symbol: " ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
