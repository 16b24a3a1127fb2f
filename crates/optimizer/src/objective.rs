//! Objective metrics that rank parameter vectors.

use backtester::PerformanceMetrics;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::outcome::OptimizationResult;

/// Whether larger or smaller scores are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Maximize,
    Minimize,
}

/// Scalar metric a search optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Total return.
    Profit,
    /// Sharpe ratio.
    #[default]
    Sharpe,
    WinRate,
    /// Max drawdown, minimized.
    Drawdown,
    Sortino,
    Calmar,
    ProfitFactor,
}

impl Objective {
    pub fn direction(&self) -> Direction {
        match self {
            Objective::Drawdown => Direction::Minimize,
            _ => Direction::Maximize,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::Profit => "profit",
            Objective::Sharpe => "sharpe",
            Objective::WinRate => "win_rate",
            Objective::Drawdown => "drawdown",
            Objective::Sortino => "sortino",
            Objective::Calmar => "calmar",
            Objective::ProfitFactor => "profit_factor",
        }
    }

    /// Raw objective value.
    pub fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        let value = match self {
            Objective::Profit => metrics.total_return,
            Objective::Sharpe => metrics.sharpe_ratio,
            Objective::WinRate => metrics.win_rate,
            Objective::Drawdown => metrics.max_drawdown,
            Objective::Sortino => metrics.sortino_ratio,
            Objective::Calmar => metrics.calmar_ratio,
            Objective::ProfitFactor => metrics.profit_factor,
        };
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }

    /// Score signed so that larger is always better.
    pub fn fitness(&self, score: f64) -> f64 {
        match self.direction() {
            Direction::Maximize => score,
            Direction::Minimize => -score,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Objective {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "profit" | "return" => Ok(Objective::Profit),
            "sharpe" => Ok(Objective::Sharpe),
            "win_rate" | "winrate" => Ok(Objective::WinRate),
            "drawdown" => Ok(Objective::Drawdown),
            "sortino" => Ok(Objective::Sortino),
            "calmar" => Ok(Objective::Calmar),
            "profit_factor" | "profitfactor" => Ok(Objective::ProfitFactor),
            other => anyhow::bail!("unknown objective: {}", other),
        }
    }
}

/// Best first: by fitness descending, ties by parameter vector ascending.
pub fn compare_results(a: &OptimizationResult, b: &OptimizationResult) -> Ordering {
    b.fitness
        .partial_cmp(&a.fitness)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.parameters.cmp(&b.parameters))
}

/// Sort results best first.
pub fn rank(results: &mut [OptimizationResult]) {
    results.sort_by(compare_results);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_and_fitness() {
        assert_eq!(Objective::Sharpe.direction(), Direction::Maximize);
        assert_eq!(Objective::Drawdown.direction(), Direction::Minimize);
        assert_eq!(Objective::Drawdown.fitness(0.2), -0.2);
        assert_eq!(Objective::Profit.fitness(0.2), 0.2);
    }

    #[test]
    fn test_score_reads_metric() {
        let metrics = PerformanceMetrics {
            total_return: 0.12,
            max_drawdown: 0.05,
            win_rate: 0.6,
            sharpe_ratio: f64::NAN,
            ..Default::default()
        };
        assert_eq!(Objective::Profit.score(&metrics), 0.12);
        assert_eq!(Objective::Drawdown.score(&metrics), 0.05);
        assert_eq!(Objective::WinRate.score(&metrics), 0.6);
        assert_eq!(Objective::Sharpe.score(&metrics), 0.0);
    }

    #[test]
    fn test_parse_objective() {
        assert_eq!("winRate".parse::<Objective>().unwrap(), Objective::WinRate);
        assert_eq!("profit-factor".parse::<Objective>().unwrap(), Objective::ProfitFactor);
        assert!("alpha".parse::<Objective>().is_err());
    }
}
