//! Walk-forward validation: optimize on a training window, test on the
//! window that follows, roll forward.

use backtest_core::{Candle, ParameterVector};
use backtester::analyzer::mean;
use backtester::{BacktestResult, StrategyFactory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::control::{OptimizationStatus, ProgressUpdate, SearchControl};
use crate::diagnostics::stability;
use crate::evaluator::Evaluation;
use crate::objective::Objective;
use crate::search::ParameterOptimizer;

/// Window length as a share of the data or a candle count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSpec {
    Fraction(f64),
    Periods(usize),
}

impl WindowSpec {
    /// Number of candles for a series of `total` candles.
    pub fn resolve(&self, total: usize) -> usize {
        match *self {
            WindowSpec::Fraction(f) if f.is_finite() && f > 0.0 => (total as f64 * f.min(1.0)).floor() as usize,
            WindowSpec::Fraction(_) => 0,
            WindowSpec::Periods(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub training: WindowSpec,
    pub testing: WindowSpec,
    /// Distance between window starts, defaults to the testing length.
    pub step: Option<WindowSpec>,
    /// Training windows all start at the first candle.
    pub anchored: bool,
    /// Segments degrading more than this count as not robust.
    pub max_degradation: f64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            training: WindowSpec::Fraction(0.3),
            testing: WindowSpec::Fraction(0.1),
            step: None,
            anchored: false,
            max_degradation: 0.5,
        }
    }
}

/// Candle index ranges of one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBounds {
    pub train: Range<usize>,
    pub test: Range<usize>,
}

/// One optimized-then-tested window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardSegment {
    pub index: usize,
    pub train_range: Range<usize>,
    pub test_range: Range<usize>,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub parameters: ParameterVector,
    pub in_sample: BacktestResult,
    pub out_of_sample: BacktestResult,
    pub in_sample_score: f64,
    pub out_of_sample_score: f64,
    /// `(is - oos) / |is|` on fitness; negative when out-of-sample did better.
    pub degradation: f64,
    pub optimization_status: OptimizationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub objective: Objective,
    pub segments: Vec<WalkForwardSegment>,
    /// `1 / (1 + CV)` of out-of-sample returns.
    pub stability: f64,
    /// Share of segments within `max_degradation`.
    pub robustness: f64,
    pub mean_degradation: f64,
    pub mean_in_sample_score: f64,
    pub mean_out_of_sample_score: f64,
    /// Out-of-sample returns compounded across segments.
    pub out_of_sample_return: f64,
    /// Mean out-of-sample score over mean in-sample score.
    pub efficiency: f64,
    /// Windows that produced no usable parameters.
    pub skipped_windows: usize,
    pub status: OptimizationStatus,
    pub elapsed_ms: u64,
}

impl WalkForwardReport {
    fn empty(objective: Objective, status: OptimizationStatus) -> Self {
        Self {
            objective,
            segments: Vec::new(),
            stability: 0.0,
            robustness: 0.0,
            mean_degradation: 0.0,
            mean_in_sample_score: 0.0,
            mean_out_of_sample_score: 0.0,
            out_of_sample_return: 0.0,
            efficiency: 0.0,
            skipped_windows: 0,
            status,
            elapsed_ms: 0,
        }
    }
}

pub fn degradation(in_sample_fitness: f64, out_of_sample_fitness: f64) -> f64 {
    if in_sample_fitness == 0.0 || !in_sample_fitness.is_finite() || !out_of_sample_fitness.is_finite() {
        return 0.0;
    }
    (in_sample_fitness - out_of_sample_fitness) / in_sample_fitness.abs()
}

pub struct WalkForwardValidator {
    config: WalkForwardConfig,
}

impl WalkForwardValidator {
    pub fn new(config: WalkForwardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    /// Window layout for `total` candles; empty when the data is shorter
    /// than one training plus one testing window.
    pub fn windows(&self, total: usize) -> Vec<WindowBounds> {
        let train_len = self.config.training.resolve(total);
        let test_len = self.config.testing.resolve(total);
        let step = self.config.step.map_or(test_len, |s| s.resolve(total));
        if train_len == 0 || test_len == 0 || step == 0 {
            return Vec::new();
        }

        let mut windows = Vec::new();
        let mut start = 0usize;
        loop {
            let Some(train_end) = start.checked_add(train_len) else { break };
            let Some(test_end) = train_end.checked_add(test_len) else { break };
            if test_end > total {
                break;
            }
            let train_start = if self.config.anchored { 0 } else { start };
            windows.push(WindowBounds {
                train: train_start..train_end,
                test: train_end..test_end,
            });
            match start.checked_add(step) {
                Some(next) => start = next,
                None => break,
            }
        }
        windows
    }

    /// Optimize each training window and test the winner out of sample.
    ///
    /// The control is checked between windows; segments finished before a
    /// stop are kept.
    pub fn run(
        &self,
        candles: &[Candle],
        factory: StrategyFactory,
        optimizer: &ParameterOptimizer,
        control: &SearchControl,
    ) -> WalkForwardReport {
        let started = Instant::now();
        let objective = optimizer.config().objective;
        let windows = self.windows(candles.len());

        if windows.is_empty() {
            warn!(
                candles = candles.len(),
                training = ?self.config.training,
                testing = ?self.config.testing,
                "Not enough data for a walk-forward window"
            );
            return WalkForwardReport::empty(objective, OptimizationStatus::InsufficientData);
        }

        info!(windows = windows.len(), anchored = self.config.anchored, "Starting walk-forward validation");

        let mut segments = Vec::new();
        let mut skipped = 0;
        let mut stopped = None;

        for (index, bounds) in windows.iter().enumerate() {
            if let Some(status) = control.check() {
                stopped = Some(status);
                break;
            }

            let train = &candles[bounds.train.clone()];
            let test = &candles[bounds.test.clone()];
            let outcome = optimizer.optimize(train, factory.clone(), control);
            if outcome.status.is_interrupted() {
                stopped = Some(outcome.status);
                break;
            }

            let Some(best) = outcome.best() else {
                warn!(window = index, status = ?outcome.status, "No parameters found for window");
                skipped += 1;
                continue;
            };

            let out_of_sample = match optimizer.evaluate(test, factory.clone(), &best.parameters) {
                Evaluation::Scored(result) => result,
                _ => {
                    warn!(window = index, "Out-of-sample run failed");
                    skipped += 1;
                    continue;
                }
            };

            let segment = WalkForwardSegment {
                index,
                train_range: bounds.train.clone(),
                test_range: bounds.test.clone(),
                train_start: train[0].timestamp,
                train_end: train[train.len() - 1].timestamp,
                test_start: test[0].timestamp,
                test_end: test[test.len() - 1].timestamp,
                parameters: best.parameters.clone(),
                in_sample: best.result.clone(),
                in_sample_score: best.score,
                out_of_sample_score: out_of_sample.score,
                degradation: degradation(best.fitness, out_of_sample.fitness),
                out_of_sample: out_of_sample.result,
                optimization_status: outcome.status,
            };
            debug!(
                window = index,
                in_sample = segment.in_sample_score,
                out_of_sample = segment.out_of_sample_score,
                degradation = segment.degradation,
                "Window validated"
            );
            segments.push(segment);

            control.report(ProgressUpdate {
                stage: "walk_forward",
                completed: index + 1,
                total: windows.len(),
                best_fitness: None,
            });
        }

        let status = match stopped {
            Some(status) => status,
            None if segments.is_empty() => OptimizationStatus::NoValidCombinations,
            None => OptimizationStatus::Completed,
        };

        let report = self.aggregate(objective, segments, skipped, status, started);
        info!(
            segments = report.segments.len(),
            skipped = report.skipped_windows,
            stability = report.stability,
            robustness = report.robustness,
            efficiency = report.efficiency,
            status = ?report.status,
            "Walk-forward validation completed"
        );
        report
    }

    fn aggregate(
        &self,
        objective: Objective,
        segments: Vec<WalkForwardSegment>,
        skipped_windows: usize,
        status: OptimizationStatus,
        started: Instant,
    ) -> WalkForwardReport {
        let mut report = WalkForwardReport::empty(objective, status);
        report.skipped_windows = skipped_windows;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        if segments.is_empty() {
            return report;
        }

        let returns: Vec<f64> = segments.iter().map(|s| s.out_of_sample.total_return).collect();
        let degradations: Vec<f64> = segments.iter().map(|s| s.degradation).collect();
        let in_sample: Vec<f64> = segments.iter().map(|s| s.in_sample_score).collect();
        let out_of_sample: Vec<f64> = segments.iter().map(|s| s.out_of_sample_score).collect();

        let within = degradations
            .iter()
            .filter(|d| **d <= self.config.max_degradation)
            .count();

        report.stability = stability(&returns);
        report.robustness = within as f64 / segments.len() as f64;
        report.mean_degradation = mean(&degradations);
        report.mean_in_sample_score = mean(&in_sample);
        report.mean_out_of_sample_score = mean(&out_of_sample);
        report.out_of_sample_return = returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;
        report.efficiency = if report.mean_in_sample_score.abs() < f64::EPSILON {
            0.0
        } else {
            report.mean_out_of_sample_score / report.mean_in_sample_score
        };
        if !report.efficiency.is_finite() {
            report.efficiency = 0.0;
        }
        report.segments = segments;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizationConfig;
    use backtest_core::{AnalyzerConfig, BacktestConfig};
    use backtester::BuyAndHoldStrategy;
    use backtester::Strategy;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn series(closes: &[i64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle::flat(start + Duration::hours(i as i64), Decimal::new(*c, 0), Decimal::ONE))
            .collect()
    }

    fn buy_and_hold() -> StrategyFactory {
        Arc::new(|_: &ParameterVector| Ok(Box::new(BuyAndHoldStrategy::default()) as Box<dyn Strategy>))
    }

    fn optimizer() -> ParameterOptimizer {
        let mut backtest = BacktestConfig::frictionless(Decimal::new(100_000, 0));
        backtest.stop_loss_percent = None;
        backtest.take_profit_percent = None;
        ParameterOptimizer::new(
            OptimizationConfig::new(Objective::Profit)
                .with_parameter("size", Decimal::ONE, Decimal::ONE, Decimal::ONE)
                .with_workers(1),
            backtest,
            AnalyzerConfig::default(),
        )
    }

    #[test]
    fn test_window_layout() {
        let validator = WalkForwardValidator::new(WalkForwardConfig {
            training: WindowSpec::Periods(4),
            testing: WindowSpec::Periods(2),
            ..Default::default()
        });
        let windows = validator.windows(10);
        assert_eq!(
            windows,
            vec![
                WindowBounds { train: 0..4, test: 4..6 },
                WindowBounds { train: 2..6, test: 6..8 },
                WindowBounds { train: 4..8, test: 8..10 },
            ]
        );

        let anchored = WalkForwardValidator::new(WalkForwardConfig {
            training: WindowSpec::Periods(4),
            testing: WindowSpec::Periods(2),
            anchored: true,
            ..Default::default()
        });
        assert_eq!(anchored.windows(10)[2].train, 0..8);
    }

    #[test]
    fn test_fraction_windows() {
        let validator = WalkForwardValidator::new(WalkForwardConfig::default());
        let windows = validator.windows(100);
        assert_eq!(windows[0].train, 0..30);
        assert_eq!(windows[0].test, 30..40);
        assert_eq!(windows.len(), 7);
    }

    #[test]
    fn test_short_data_yields_no_segments() {
        let validator = WalkForwardValidator::new(WalkForwardConfig {
            training: WindowSpec::Periods(10),
            testing: WindowSpec::Periods(5),
            ..Default::default()
        });
        let data = series(&[100, 101, 102, 103]);
        let report = validator.run(&data, buy_and_hold(), &optimizer(), &SearchControl::new());
        assert!(report.segments.is_empty());
        assert_eq!(report.status, OptimizationStatus::InsufficientData);
        assert_eq!(report.stability, 0.0);
    }

    #[test]
    fn test_negative_degradation_when_out_of_sample_wins() {
        let validator = WalkForwardValidator::new(WalkForwardConfig {
            training: WindowSpec::Periods(6),
            testing: WindowSpec::Periods(4),
            ..Default::default()
        });
        // Flat-ish training window, strong rally in the test window
        let data = series(&[100, 100, 101, 100, 101, 102, 105, 110, 115, 120]);
        let report = validator.run(&data, buy_and_hold(), &optimizer(), &SearchControl::new());

        assert_eq!(report.status, OptimizationStatus::Completed);
        assert_eq!(report.segments.len(), 1);
        let segment = &report.segments[0];
        assert!(segment.out_of_sample_score > segment.in_sample_score);
        assert!(segment.degradation < 0.0);
        assert_eq!(report.robustness, 1.0);
        assert!(report.efficiency > 1.0);
        assert_eq!(segment.test_range, 6..10);
    }

    #[test]
    fn test_cancelled_between_windows() {
        let validator = WalkForwardValidator::new(WalkForwardConfig {
            training: WindowSpec::Periods(4),
            testing: WindowSpec::Periods(2),
            ..Default::default()
        });
        let control = SearchControl::new();
        control.cancel();
        let data = series(&[100, 101, 102, 103, 104, 105, 106, 107]);
        let report = validator.run(&data, buy_and_hold(), &optimizer(), &control);
        assert_eq!(report.status, OptimizationStatus::Cancelled);
        assert!(report.segments.is_empty());
    }

    #[test]
    fn test_oversized_windows_do_not_overflow() {
        let validator = WalkForwardValidator::new(WalkForwardConfig {
            training: WindowSpec::Periods(usize::MAX),
            testing: WindowSpec::Periods(2),
            ..Default::default()
        });
        assert!(validator.windows(10).is_empty());

        let huge_step = WalkForwardValidator::new(WalkForwardConfig {
            training: WindowSpec::Periods(4),
            testing: WindowSpec::Periods(2),
            step: Some(WindowSpec::Periods(usize::MAX)),
            ..Default::default()
        });
        assert_eq!(huge_step.windows(10).len(), 1);

        let data = series(&[100, 101, 102, 103]);
        let report = validator.run(&data, buy_and_hold(), &optimizer(), &SearchControl::new());
        assert_eq!(report.status, OptimizationStatus::InsufficientData);
    }

    #[test]
    fn test_degradation_helper() {
        assert_eq!(degradation(0.0, 1.0), 0.0);
        assert!((degradation(2.0, 1.0) - 0.5).abs() < 1e-12);
        assert!(degradation(-1.0, 0.5) < 0.0);
    }
}
