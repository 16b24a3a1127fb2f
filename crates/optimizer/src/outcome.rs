//! Search results.

use backtest_core::ParameterVector;
use backtester::{BacktestResult, PerformanceMetrics};
use serde::{Deserialize, Serialize};

use crate::control::OptimizationStatus;
use crate::objective::Objective;

/// One evaluated parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub parameters: ParameterVector,
    pub result: BacktestResult,
    pub metrics: PerformanceMetrics,
    /// Objective value.
    pub score: f64,
    /// Score signed so larger is better.
    pub fitness: f64,
}

/// Ranked output of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub objective: Objective,
    /// Best first.
    pub results: Vec<OptimizationResult>,
    /// Every evaluation of a genetic search in evaluation order. Empty for grid search.
    pub history: Vec<OptimizationResult>,
    pub status: OptimizationStatus,
    pub evaluated: usize,
    /// Combinations skipped because the strategy or config could not be built.
    pub failed: usize,
    pub overfitting_score: f64,
    pub robustness_score: f64,
    /// Best fitness per generation.
    pub convergence: Vec<f64>,
    pub elapsed_ms: u64,
    /// Grid combinations beyond `max_combinations` were not evaluated.
    pub truncated: bool,
}

impl OptimizationOutcome {
    /// An outcome with nothing evaluated.
    pub fn empty(objective: Objective, status: OptimizationStatus) -> Self {
        Self {
            objective,
            results: Vec::new(),
            history: Vec::new(),
            status,
            evaluated: 0,
            failed: 0,
            overfitting_score: 0.0,
            robustness_score: 0.0,
            convergence: Vec::new(),
            elapsed_ms: 0,
            truncated: false,
        }
    }

    /// The top-ranked result.
    pub fn best(&self) -> Option<&OptimizationResult> {
        self.results.first()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
