//! Orchestrator
//!
//! End-to-end workflows over the backtesting stack: single runs,
//! optimize-then-rebacktest, strategy comparison, buy-and-hold benchmarks,
//! walk-forward validation and a combined analysis report with
//! recommendations.

pub mod benchmark;
pub mod comparison;
pub mod config;
pub mod lab;
pub mod report;

pub use benchmark::{benchmark, buy_and_hold_drawdown, buy_and_hold_return, BenchmarkReport};
pub use comparison::{rank_entries, ComparisonEntry, CompositeWeights, StrategySpec};
pub use config::LabConfig;
pub use lab::{AnalysisRequest, Orchestrator};
pub use report::{recommendations, FullAnalysisReport, OptimizedRun, RunReport, ScoredParameters};
