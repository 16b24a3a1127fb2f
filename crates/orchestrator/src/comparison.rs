//! Multi-strategy comparison by weighted composite score.

use backtest_core::{Error, ParameterVector, Result};
use backtester::{BacktestResult, PerformanceMetrics};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Profit factors above this count as the maximum.
const PROFIT_FACTOR_CAP: f64 = 3.0;

/// Weights of the composite ranking score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeWeights {
    pub total_return: f64,
    pub sharpe: f64,
    pub win_rate: f64,
    /// Applied as a penalty on max drawdown.
    pub drawdown: f64,
    pub profit_factor: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            total_return: 0.30,
            sharpe: 0.25,
            win_rate: 0.15,
            drawdown: 0.20,
            profit_factor: 0.10,
        }
    }
}

impl CompositeWeights {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            self.total_return,
            self.sharpe,
            self.win_rate,
            self.drawdown,
            self.profit_factor,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::config("composite weights must be finite and non-negative"));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::config("at least one composite weight must be positive"));
        }
        Ok(())
    }

    /// Weighted blend of return, Sharpe, win rate, drawdown penalty and
    /// capped profit factor.
    pub fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        let profit_factor = metrics.profit_factor.clamp(0.0, PROFIT_FACTOR_CAP) / PROFIT_FACTOR_CAP;
        let score = self.total_return * metrics.total_return
            + self.sharpe * metrics.sharpe_ratio
            + self.win_rate * metrics.win_rate
            - self.drawdown * metrics.max_drawdown
            + self.profit_factor * profit_factor;
        if score.is_finite() {
            score
        } else {
            0.0
        }
    }
}

/// A strategy to include in a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    /// Registered strategy name.
    pub name: String,
    #[serde(default)]
    pub parameters: ParameterVector,
}

impl StrategySpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: ParameterVector::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterVector) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    /// 1 is best.
    pub rank: usize,
    pub name: String,
    pub parameters: ParameterVector,
    pub composite_score: f64,
    pub metrics: PerformanceMetrics,
    pub result: BacktestResult,
}

/// Sort by composite score descending, ties by name, and assign ranks.
pub fn rank_entries(entries: &mut [ComparisonEntry]) {
    entries.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.parameters.cmp(&b.parameters))
    });
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
}
