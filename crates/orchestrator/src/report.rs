//! Aggregate analysis report and threshold-based recommendations.

use backtest_core::{format_params, ParameterVector, Result};
use backtester::{export, BacktestResult, DataQualityReport, PerformanceMetrics};
use chrono::{DateTime, Utc};
use optimizer::{OptimizationOutcome, OptimizationStatus, WalkForwardReport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::benchmark::BenchmarkReport;
use crate::comparison::ComparisonEntry;

const EXCELLENT_SHARPE: f64 = 1.5;
const WEAK_SHARPE: f64 = 0.5;
const HIGH_DRAWDOWN: f64 = 0.20;
const LOW_WIN_RATE: f64 = 0.40;
const MIN_TRADES: usize = 10;
const HIGH_OVERFITTING: f64 = 0.5;
const LOW_WALK_FORWARD_ROBUSTNESS: f64 = 0.5;
const LOW_DATA_QUALITY: f64 = 0.8;
/// Optimized results kept in the report.
const TOP_RESULTS: usize = 10;

/// A single backtest with its metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub strategy: String,
    pub result: BacktestResult,
    pub metrics: PerformanceMetrics,
}

/// A parameter vector and its objective score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredParameters {
    pub parameters: ParameterVector,
    pub score: f64,
}

/// Optimization summary plus a re-run of the best parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedRun {
    pub status: OptimizationStatus,
    pub evaluated: usize,
    pub failed: usize,
    pub overfitting_score: f64,
    pub robustness_score: f64,
    pub convergence: Vec<f64>,
    pub truncated: bool,
    pub elapsed_ms: u64,
    /// Best first.
    pub top_results: Vec<ScoredParameters>,
    pub best_parameters: Option<ParameterVector>,
    /// Backtest of `best_parameters`.
    pub best: Option<RunReport>,
}

impl OptimizedRun {
    pub fn from_outcome(outcome: &OptimizationOutcome, best: Option<RunReport>) -> Self {
        Self {
            status: outcome.status,
            evaluated: outcome.evaluated,
            failed: outcome.failed,
            overfitting_score: outcome.overfitting_score,
            robustness_score: outcome.robustness_score,
            convergence: outcome.convergence.clone(),
            truncated: outcome.truncated,
            elapsed_ms: outcome.elapsed_ms,
            top_results: outcome
                .results
                .iter()
                .take(TOP_RESULTS)
                .map(|r| ScoredParameters {
                    parameters: r.parameters.clone(),
                    score: r.score,
                })
                .collect(),
            best_parameters: outcome.best().map(|r| r.parameters.clone()),
            best,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullAnalysisReport {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub symbol: String,
    pub strategy: String,
    pub candles: usize,
    pub data_quality: DataQualityReport,
    pub baseline: RunReport,
    pub optimized: Option<OptimizedRun>,
    pub comparison: Vec<ComparisonEntry>,
    pub benchmark: BenchmarkReport,
    pub walk_forward: Option<WalkForwardReport>,
    pub recommendations: Vec<String>,
}

impl FullAnalysisReport {
    pub fn to_json(&self) -> Result<String> {
        export::to_json_pretty(self)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        export::write_json(path, self)
    }
}

/// Threshold checks over the pieces of an analysis.
pub fn recommendations(
    baseline: &RunReport,
    optimized: Option<&OptimizedRun>,
    benchmark: &BenchmarkReport,
    walk_forward: Option<&WalkForwardReport>,
    data_quality: &DataQualityReport,
) -> Vec<String> {
    let metrics = &baseline.metrics;
    let mut notes = Vec::new();

    if metrics.sharpe_ratio > EXCELLENT_SHARPE {
        notes.push(format!(
            "Excellent risk-adjusted return (Sharpe {:.2})",
            metrics.sharpe_ratio
        ));
    } else if metrics.sharpe_ratio < WEAK_SHARPE {
        notes.push(format!(
            "Weak risk-adjusted return (Sharpe {:.2}); review entry and exit rules",
            metrics.sharpe_ratio
        ));
    }

    if metrics.max_drawdown > HIGH_DRAWDOWN {
        notes.push(format!(
            "High max drawdown of {:.1}%; consider tighter stops or smaller positions",
            metrics.max_drawdown_pct
        ));
    }

    if metrics.total_trades > 0 && metrics.win_rate < LOW_WIN_RATE {
        notes.push(format!(
            "Low win rate of {:.1}%; winners must be much larger than losers",
            metrics.win_rate * 100.0
        ));
    }

    if metrics.total_trades < MIN_TRADES {
        notes.push(format!(
            "Only {} trades; too few for statistically meaningful results",
            metrics.total_trades
        ));
    }

    if let Some(optimized) = optimized {
        if optimized.overfitting_score > HIGH_OVERFITTING {
            notes.push(format!(
                "Results are sensitive to parameters (overfitting score {:.2}); prefer robust regions",
                optimized.overfitting_score
            ));
        }
        if let (Some(best), Some(params)) = (&optimized.best, &optimized.best_parameters) {
            if best.result.total_return > baseline.result.total_return {
                notes.push(format!(
                    "Optimized parameters [{}] improve return from {:.2}% to {:.2}%",
                    format_params(params),
                    baseline.result.total_return_pct(),
                    best.result.total_return_pct()
                ));
            }
        }
    }

    if let Some(walk_forward) = walk_forward {
        if !walk_forward.segments.is_empty() && walk_forward.robustness < LOW_WALK_FORWARD_ROBUSTNESS {
            notes.push(format!(
                "Only {:.0}% of walk-forward windows held up out of sample",
                walk_forward.robustness * 100.0
            ));
        }
    }

    if data_quality.score < LOW_DATA_QUALITY {
        notes.push(format!(
            "Data quality score {:.2} is low ({} missing candles); results may be unreliable",
            data_quality.score, data_quality.missing
        ));
    }

    if benchmark.excess_return < 0.0 {
        notes.push(format!(
            "Underperforms buy-and-hold by {:.2}%",
            -benchmark.excess_return * 100.0
        ));
    }

    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn run(metrics: PerformanceMetrics, total_return: f64) -> RunReport {
        RunReport {
            strategy: "momentum".to_string(),
            result: BacktestResult {
                strategy_name: "momentum".to_string(),
                parameters: ParameterVector::new(),
                start_time: None,
                end_time: None,
                candles_processed: 0,
                initial_balance: Decimal::new(100_000, 0),
                final_balance: Decimal::new(100_000, 0),
                net_profit: Decimal::ZERO,
                total_return,
                total_trades: metrics.total_trades,
                winning_trades: metrics.winning_trades,
                losing_trades: metrics.losing_trades,
                win_rate: metrics.win_rate,
                max_drawdown: metrics.max_drawdown,
                total_commission: Decimal::ZERO,
                total_slippage: Decimal::ZERO,
                skipped_candles: 0,
                strategy_errors: 0,
                rejected_signals: 0,
                errors: Vec::new(),
                strategy_metrics: Default::default(),
                trades: Vec::new(),
                equity_curve: Vec::new(),
            },
            metrics,
        }
    }

    fn quality(score: f64) -> DataQualityReport {
        DataQualityReport {
            total: 100,
            expected: 100,
            missing: 0,
            duplicates: 0,
            invalid: 0,
            out_of_order: 0,
            gaps: Vec::new(),
            completeness: 1.0,
            score,
        }
    }

    fn bench(excess_return: f64) -> BenchmarkReport {
        BenchmarkReport {
            start_price: Decimal::ONE_HUNDRED,
            end_price: Decimal::ONE_HUNDRED,
            strategy_return: 0.0,
            benchmark_return: 0.0,
            excess_return,
            strategy_max_drawdown: 0.0,
            benchmark_max_drawdown: 0.0,
            outperformed: excess_return > 0.0,
        }
    }

    #[test]
    fn test_strong_run_gets_praise_only() {
        let metrics = PerformanceMetrics {
            sharpe_ratio: 2.1,
            max_drawdown: 0.05,
            max_drawdown_pct: 5.0,
            total_trades: 40,
            winning_trades: 24,
            losing_trades: 16,
            win_rate: 0.6,
            ..Default::default()
        };
        let notes = recommendations(&run(metrics, 0.2), None, &bench(0.05), None, &quality(0.95));
        assert_eq!(notes.len(), 1);
        assert!(notes[0].starts_with("Excellent risk-adjusted return"));
    }

    #[test]
    fn test_weak_run_collects_warnings() {
        let metrics = PerformanceMetrics {
            sharpe_ratio: 0.1,
            max_drawdown: 0.35,
            max_drawdown_pct: 35.0,
            total_trades: 4,
            winning_trades: 1,
            losing_trades: 3,
            win_rate: 0.25,
            ..Default::default()
        };
        let notes = recommendations(&run(metrics, -0.1), None, &bench(-0.2), None, &quality(0.5));
        assert_eq!(notes.len(), 6);
        assert!(notes.iter().any(|n| n.contains("Weak risk-adjusted")));
        assert!(notes.iter().any(|n| n.contains("High max drawdown")));
        assert!(notes.iter().any(|n| n.contains("Low win rate")));
        assert!(notes.iter().any(|n| n.contains("Only 4 trades")));
        assert!(notes.iter().any(|n| n.contains("Data quality")));
        assert!(notes.iter().any(|n| n.contains("Underperforms buy-and-hold")));
    }

    #[test]
    fn test_optimization_notes() {
        let baseline_metrics = PerformanceMetrics {
            sharpe_ratio: 1.0,
            total_trades: 20,
            win_rate: 0.5,
            ..Default::default()
        };
        let baseline = run(baseline_metrics.clone(), 0.01);
        let mut params = ParameterVector::new();
        params.insert("lookback".to_string(), Decimal::new(10, 0));
        let optimized = OptimizedRun {
            status: OptimizationStatus::Completed,
            evaluated: 9,
            failed: 0,
            overfitting_score: 0.9,
            robustness_score: 0.8,
            convergence: Vec::new(),
            truncated: false,
            elapsed_ms: 1,
            top_results: Vec::new(),
            best_parameters: Some(params),
            best: Some(run(baseline_metrics, 0.05)),
        };

        let notes = recommendations(&baseline, Some(&optimized), &bench(0.0), None, &quality(1.0));
        assert!(notes.iter().any(|n| n.contains("overfitting score 0.90")));
        assert!(notes.iter().any(|n| n.contains("lookback=10") && n.contains("1.00% to 5.00%")));
    }
}
