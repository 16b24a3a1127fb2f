//! Parameter optimizer entry point.

use backtest_core::{AnalyzerConfig, BacktestConfig, Candle, ParameterVector};
use backtester::StrategyFactory;

use crate::config::OptimizationConfig;
use crate::control::SearchControl;
use crate::evaluator::{Evaluation, Evaluator};
use crate::outcome::OptimizationOutcome;
use crate::{genetic, grid};

/// Searches a strategy's parameter space against one candle series.
#[derive(Debug, Clone, Default)]
pub struct ParameterOptimizer {
    config: OptimizationConfig,
    backtest: BacktestConfig,
    analyzer: AnalyzerConfig,
}

impl ParameterOptimizer {
    pub fn new(config: OptimizationConfig, backtest: BacktestConfig, analyzer: AnalyzerConfig) -> Self {
        Self {
            config,
            backtest,
            analyzer,
        }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn backtest_config(&self) -> &BacktestConfig {
        &self.backtest
    }

    pub fn analyzer_config(&self) -> &AnalyzerConfig {
        &self.analyzer
    }

    /// Evaluator bound to `candles` with this optimizer's settings.
    pub fn evaluator<'a>(&self, candles: &'a [Candle], factory: StrategyFactory) -> Evaluator<'a> {
        Evaluator::new(
            candles,
            factory,
            self.backtest.clone(),
            self.analyzer.clone(),
            self.config.objective,
            self.config.workers,
        )
    }

    /// Genetic search when configured, otherwise the full grid.
    pub fn optimize(
        &self,
        candles: &[Candle],
        factory: StrategyFactory,
        control: &SearchControl,
    ) -> OptimizationOutcome {
        match &self.config.genetic {
            Some(_) => self.genetic_search(candles, factory, control),
            None => self.grid_search(candles, factory, control),
        }
    }

    pub fn grid_search(
        &self,
        candles: &[Candle],
        factory: StrategyFactory,
        control: &SearchControl,
    ) -> OptimizationOutcome {
        let evaluator = self.evaluator(candles, factory);
        grid::grid_search(
            &evaluator,
            &self.config.parameters,
            self.config.max_combinations,
            control,
        )
    }

    /// Genetic search with the configured settings, or the defaults.
    pub fn genetic_search(
        &self,
        candles: &[Candle],
        factory: StrategyFactory,
        control: &SearchControl,
    ) -> OptimizationOutcome {
        let evaluator = self.evaluator(candles, factory);
        let genetic = self.config.genetic.clone().unwrap_or_default();
        genetic::genetic_search(&evaluator, &self.config.parameters, &genetic, control)
    }

    /// Backtest and score a single parameter vector on one thread.
    pub fn evaluate(&self, candles: &[Candle], factory: StrategyFactory, params: &ParameterVector) -> Evaluation {
        Evaluator::new(
            candles,
            factory,
            self.backtest.clone(),
            self.analyzer.clone(),
            self.config.objective,
            Some(1),
        )
        .evaluate(params)
    }
}
