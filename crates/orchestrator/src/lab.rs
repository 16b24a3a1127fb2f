//! Orchestrator composing simulation, analysis, optimization and validation.

use anyhow::{Context, Result};
use backtest_core::{AnalyzerConfig, BacktestConfig, Candle, ParameterVector};
use backtester::{
    interpolate_gaps, sanitize, CandleSource, DataQualityReport, DataQuery,
    HistoricalDataStore, PerformanceAnalyzer, SimulationEngine, StrategyRegistry,
};
use chrono::Utc;
use optimizer::{
    worker_pool, OptimizationConfig, ParameterOptimizer, SearchControl, WalkForwardConfig, WalkForwardReport,
    WalkForwardValidator,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::benchmark::{self, BenchmarkReport};
use crate::comparison::{rank_entries, ComparisonEntry, CompositeWeights, StrategySpec};
use crate::config::LabConfig;
use crate::report::{recommendations, FullAnalysisReport, OptimizedRun, RunReport};

/// What a full analysis should cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Registered strategy name.
    pub strategy: String,
    /// Baseline parameters.
    #[serde(default)]
    pub parameters: ParameterVector,
    /// Search to run; skipped when absent or without parameters.
    #[serde(default)]
    pub optimization: Option<OptimizationConfig>,
    #[serde(default)]
    pub walk_forward: Option<WalkForwardConfig>,
    /// Other strategies to rank alongside the baseline.
    #[serde(default)]
    pub compare: Vec<StrategySpec>,
}

impl AnalysisRequest {
    pub fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            parameters: ParameterVector::new(),
            optimization: None,
            walk_forward: None,
            compare: Vec::new(),
        }
    }

    /// Request covering everything a [`LabConfig`] describes.
    pub fn from_config(config: &LabConfig) -> Self {
        Self {
            strategy: config.strategy.clone(),
            parameters: ParameterVector::new(),
            optimization: (!config.optimization.parameters.is_empty()).then(|| config.optimization.clone()),
            walk_forward: config.walk_forward.clone(),
            compare: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: StrategyRegistry,
    backtest: BacktestConfig,
    analyzer: AnalyzerConfig,
    weights: CompositeWeights,
    /// Threads for strategy comparison, one per core when unset.
    workers: Option<usize>,
}

impl Orchestrator {
    pub fn new(registry: StrategyRegistry, backtest: BacktestConfig, analyzer: AnalyzerConfig) -> Self {
        Self {
            registry,
            backtest,
            analyzer,
            weights: CompositeWeights::default(),
            workers: None,
        }
    }

    /// Built-in strategies with the configured backtest, analyzer and weights.
    pub fn from_config(config: &LabConfig) -> Self {
        Self::new(
            StrategyRegistry::with_builtins(),
            config.backtest.clone(),
            config.analyzer.clone(),
        )
        .with_weights(config.weights)
        .with_workers(config.optimization.workers)
    }

    pub fn with_weights(mut self, weights: CompositeWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut StrategyRegistry {
        &mut self.registry
    }

    /// Run one backtest and analyze it.
    pub fn run_backtest(&self, candles: &[Candle], strategy: &str, params: &ParameterVector) -> Result<RunReport> {
        let config = self.backtest.with_overrides(params);
        config.validate().context("invalid backtest configuration")?;
        let mut instance = self
            .registry
            .create(strategy, params)
            .with_context(|| format!("failed to build strategy '{}'", strategy))?;

        let mut result = SimulationEngine::new(config).run(candles, instance.as_mut());
        result.parameters = params.clone();
        let metrics = PerformanceAnalyzer::new(self.analyzer.clone()).calculate_metrics(&result);

        Ok(RunReport {
            strategy: strategy.to_string(),
            result,
            metrics,
        })
    }

    /// Optimize, then re-run the best parameters in full.
    pub fn optimize_and_backtest(
        &self,
        candles: &[Candle],
        strategy: &str,
        config: &OptimizationConfig,
        control: &SearchControl,
    ) -> Result<OptimizedRun> {
        let factory = self.registry.factory(strategy)?;
        let optimizer = ParameterOptimizer::new(config.clone(), self.backtest.clone(), self.analyzer.clone());
        let outcome = optimizer.optimize(candles, factory, control);

        let best = match outcome.best() {
            Some(best) => Some(self.run_backtest(candles, strategy, &best.parameters)?),
            None => {
                warn!(strategy, status = ?outcome.status, "Optimization produced no usable parameters");
                None
            }
        };
        Ok(OptimizedRun::from_outcome(&outcome, best))
    }

    /// Backtest each strategy in parallel and rank them by composite score.
    ///
    /// Strategies that cannot be built are logged and left out.
    pub fn compare_strategies(&self, candles: &[Candle], specs: &[StrategySpec]) -> Vec<ComparisonEntry> {
        let evaluate = |spec: &StrategySpec| match self.run_backtest(candles, &spec.name, &spec.parameters) {
            Ok(run) => Some(ComparisonEntry {
                rank: 0,
                name: spec.name.clone(),
                parameters: spec.parameters.clone(),
                composite_score: self.weights.score(&run.metrics),
                metrics: run.metrics,
                result: run.result,
            }),
            Err(e) => {
                warn!(strategy = %spec.name, error = %e, "Skipping strategy in comparison");
                None
            }
        };

        let mut entries: Vec<ComparisonEntry> = match worker_pool(self.workers) {
            Some(pool) => pool.install(|| specs.par_iter().filter_map(&evaluate).collect()),
            None => specs.iter().filter_map(&evaluate).collect(),
        };
        rank_entries(&mut entries);
        entries
    }

    pub fn benchmark(&self, candles: &[Candle], run: &RunReport) -> BenchmarkReport {
        benchmark::benchmark(candles, &run.result)
    }

    pub fn walk_forward(
        &self,
        candles: &[Candle],
        strategy: &str,
        optimization: &OptimizationConfig,
        walk_forward: &WalkForwardConfig,
        control: &SearchControl,
    ) -> Result<WalkForwardReport> {
        let factory = self.registry.factory(strategy)?;
        let optimizer = ParameterOptimizer::new(optimization.clone(), self.backtest.clone(), self.analyzer.clone());
        Ok(WalkForwardValidator::new(walk_forward.clone()).run(candles, factory, &optimizer, control))
    }

    /// Every requested step over candles that are already loaded.
    pub fn analyze(
        &self,
        symbol: &str,
        candles: &[Candle],
        data_quality: DataQualityReport,
        request: &AnalysisRequest,
        control: &SearchControl,
    ) -> Result<FullAnalysisReport> {
        if candles.len() < 2 {
            warn!(symbol, candles = candles.len(), "Analyzing fewer than two candles");
        }

        let baseline = self.run_backtest(candles, &request.strategy, &request.parameters)?;

        let optimized = match &request.optimization {
            Some(config) if !config.parameters.is_empty() => {
                Some(self.optimize_and_backtest(candles, &request.strategy, config, control)?)
            }
            _ => None,
        };

        let mut specs = vec![StrategySpec::new(&request.strategy).with_parameters(request.parameters.clone())];
        if let Some(params) = optimized.as_ref().and_then(|o| o.best_parameters.clone()) {
            if params != request.parameters {
                specs.push(StrategySpec::new(&request.strategy).with_parameters(params));
            }
        }
        specs.extend(request.compare.iter().cloned());
        let comparison = self.compare_strategies(candles, &specs);

        let benchmark = self.benchmark(candles, &baseline);

        let walk_forward = match (&request.walk_forward, &request.optimization) {
            (Some(wf), Some(config)) if !config.parameters.is_empty() => {
                Some(self.walk_forward(candles, &request.strategy, config, wf, control)?)
            }
            (Some(_), _) => {
                warn!("Walk-forward requested without an optimization config; skipping");
                None
            }
            _ => None,
        };

        let recommendations = recommendations(
            &baseline,
            optimized.as_ref(),
            &benchmark,
            walk_forward.as_ref(),
            &data_quality,
        );

        let report = FullAnalysisReport {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            symbol: symbol.to_string(),
            strategy: request.strategy.clone(),
            candles: candles.len(),
            data_quality,
            baseline,
            optimized,
            comparison,
            benchmark,
            walk_forward,
            recommendations,
        };

        info!(
            report_id = %report.id,
            symbol,
            strategy = %report.strategy,
            total_return = report.baseline.result.total_return,
            recommendations = report.recommendations.len(),
            "Analysis completed"
        );
        Ok(report)
    }

    /// Load data, then run [`Orchestrator::analyze`] on a blocking thread.
    pub async fn full_analysis<S: CandleSource>(
        &self,
        store: &HistoricalDataStore<S>,
        query: &DataQuery,
        request: AnalysisRequest,
        control: SearchControl,
    ) -> Result<FullAnalysisReport> {
        let (raw, data_quality) = store
            .load_with_quality(query)
            .await
            .with_context(|| format!("failed to load candles for {}", query.symbol))?;
        let (clean, dropped) = sanitize(&raw);
        let candles = interpolate_gaps(&clean, query.resolution);
        info!(
            symbol = %query.symbol,
            loaded = raw.len(),
            dropped,
            prepared = candles.len(),
            quality = data_quality.score,
            "Historical data prepared"
        );

        let orchestrator = self.clone();
        let symbol = query.symbol.clone();
        tokio::task::spawn_blocking(move || {
            orchestrator.analyze(&symbol, &candles, data_quality, &request, &control)
        })
        .await
        .context("analysis task failed")?
    }
}
