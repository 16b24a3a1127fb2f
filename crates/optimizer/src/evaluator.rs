//! Runs backtests for parameter vectors on a bounded worker pool.

use backtest_core::{format_params, AnalyzerConfig, BacktestConfig, Candle, ParameterVector};
use backtester::{PerformanceAnalyzer, SimulationEngine, StrategyFactory};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

use crate::control::{OptimizationStatus, ProgressUpdate, SearchControl};
use crate::objective::Objective;
use crate::outcome::OptimizationResult;

/// Result of one attempted evaluation.
#[derive(Debug, Clone)]
pub enum Evaluation {
    Scored(Box<OptimizationResult>),
    /// Strategy or configuration could not be built from the parameters.
    Failed,
    /// Not started because the search was stopped.
    NotRun,
}

/// A batch of evaluations in input order.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub evaluations: Vec<Evaluation>,
    /// Set when some evaluations were not started.
    pub stopped: Option<OptimizationStatus>,
}

/// Bounded pool with `workers` threads, or one per core.
///
/// `None` when the pool cannot be built; callers then run sequentially.
pub fn worker_pool(workers: Option<usize>) -> Option<rayon::ThreadPool> {
    let threads = workers.unwrap_or_else(rayon::current_num_threads).max(1);
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!(error = %e, "Failed to build worker pool, evaluating sequentially");
            None
        }
    }
}

/// Evaluates parameter vectors against one candle slice.
///
/// Every evaluation builds its own strategy and simulation context, so
/// workers share nothing but the read-only candles.
pub struct Evaluator<'a> {
    candles: &'a [Candle],
    factory: StrategyFactory,
    backtest: BacktestConfig,
    analyzer: PerformanceAnalyzer,
    objective: Objective,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> Evaluator<'a> {
    /// Build an evaluator with `workers` threads, or one per core.
    pub fn new(
        candles: &'a [Candle],
        factory: StrategyFactory,
        backtest: BacktestConfig,
        analyzer: AnalyzerConfig,
        objective: Objective,
        workers: Option<usize>,
    ) -> Self {
        Self {
            candles,
            factory,
            backtest,
            analyzer: PerformanceAnalyzer::new(analyzer),
            objective,
            pool: worker_pool(workers),
        }
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn candles(&self) -> &'a [Candle] {
        self.candles
    }

    /// Backtest and score one parameter vector.
    pub fn evaluate(&self, params: &ParameterVector) -> Evaluation {
        let config = self.backtest.with_overrides(params);
        if let Err(e) = config.validate() {
            warn!(params = %format_params(params), error = %e, "Skipping invalid configuration");
            return Evaluation::Failed;
        }

        let mut strategy = match (self.factory)(params) {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!(params = %format_params(params), error = %e, "Skipping combination");
                return Evaluation::Failed;
            }
        };

        let mut result = SimulationEngine::new(config).run(self.candles, strategy.as_mut());
        result.parameters = params.clone();
        let metrics = self.analyzer.calculate_metrics(&result);
        let score = self.objective.score(&metrics);

        Evaluation::Scored(Box::new(OptimizationResult {
            parameters: params.clone(),
            result,
            metrics,
            score,
            fitness: self.objective.fitness(score),
        }))
    }

    /// Evaluate a batch in parallel, preserving input order.
    ///
    /// The control is checked before each evaluation starts.
    pub fn evaluate_batch(
        &self,
        batch: &[ParameterVector],
        control: &SearchControl,
        stage: &'static str,
    ) -> BatchOutcome {
        let completed = AtomicUsize::new(0);
        let total = batch.len();

        let task = |params: &ParameterVector| -> Evaluation {
            if control.check().is_some() {
                return Evaluation::NotRun;
            }
            let evaluation = self.evaluate(params);
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            control.report(ProgressUpdate {
                stage,
                completed: done,
                total,
                best_fitness: None,
            });
            evaluation
        };

        let evaluations: Vec<Evaluation> = match &self.pool {
            Some(pool) => pool.install(|| batch.par_iter().map(&task).collect()),
            None => batch.iter().map(&task).collect(),
        };

        let stopped = evaluations
            .iter()
            .any(|e| matches!(e, Evaluation::NotRun))
            .then(|| control.check().unwrap_or(OptimizationStatus::Cancelled));

        BatchOutcome { evaluations, stopped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtester::StrategyKind;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn candles() -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        [100, 102, 104, 103, 107, 110, 108, 112]
            .iter()
            .enumerate()
            .map(|(i, c)| Candle::flat(start + Duration::hours(i as i64), Decimal::new(*c, 0), Decimal::ONE))
            .collect()
    }

    fn momentum() -> StrategyFactory {
        Arc::new(|params: &ParameterVector| StrategyKind::Momentum.build(params))
    }

    fn params(lookback: i64) -> ParameterVector {
        let mut params = ParameterVector::new();
        params.insert("lookback".to_string(), Decimal::new(lookback, 0));
        params.insert("threshold".to_string(), Decimal::new(1, 2));
        params
    }

    #[test]
    fn test_evaluate_scores_result() {
        let data = candles();
        let evaluator = Evaluator::new(
            &data,
            momentum(),
            BacktestConfig::default(),
            AnalyzerConfig::default(),
            Objective::Profit,
            Some(1),
        );

        match evaluator.evaluate(&params(2)) {
            Evaluation::Scored(r) => {
                assert_eq!(r.score, r.metrics.total_return);
                assert_eq!(r.result.parameters, params(2));
            }
            other => panic!("unexpected evaluation: {:?}", other),
        }
        assert!(matches!(evaluator.evaluate(&params(0)), Evaluation::Failed));
    }

    #[test]
    fn test_batch_preserves_order() {
        let data = candles();
        let evaluator = Evaluator::new(
            &data,
            momentum(),
            BacktestConfig::default(),
            AnalyzerConfig::default(),
            Objective::Sharpe,
            Some(4),
        );

        let batch: Vec<ParameterVector> = (1..=6).map(params).collect();
        let outcome = evaluator.evaluate_batch(&batch, &SearchControl::new(), "test");
        assert!(outcome.stopped.is_none());
        for (params, evaluation) in batch.iter().zip(&outcome.evaluations) {
            match evaluation {
                Evaluation::Scored(r) => assert_eq!(&r.parameters, params),
                other => panic!("unexpected evaluation: {:?}", other),
            }
        }
    }

    #[test]
    fn test_cancelled_batch_runs_nothing() {
        let data = candles();
        let evaluator = Evaluator::new(
            &data,
            momentum(),
            BacktestConfig::default(),
            AnalyzerConfig::default(),
            Objective::Sharpe,
            Some(2),
        );
        let control = SearchControl::new();
        control.cancel();

        let outcome = evaluator.evaluate_batch(&[params(2), params(3)], &control, "test");
        assert_eq!(outcome.stopped, Some(OptimizationStatus::Cancelled));
        assert!(outcome.evaluations.iter().all(|e| matches!(e, Evaluation::NotRun)));
    }
}
