//! Optimizer
//!
//! Parameter search for backtested strategies.
//!
//! # Features
//!
//! - **Grid Search**: Exhaustive cartesian product of parameter ranges
//! - **Genetic Search**: Seeded evolutionary search with elitism and an evaluation cache
//! - **Diagnostics**: Overfitting and robustness scores over evaluated vectors
//! - **Walk-Forward**: Rolling or anchored optimize-then-test validation
//! - **Search Control**: Cancellation, time budget and progress callbacks
//!
//! Evaluations run on a bounded rayon pool. Each one owns its strategy and
//! simulation state, so results are collected in input order with no locking.

pub mod config;
pub mod control;
pub mod diagnostics;
pub mod evaluator;
pub mod genetic;
pub mod grid;
pub mod objective;
pub mod outcome;
pub mod search;
pub mod walk_forward;

pub use config::{GeneticConfig, OptimizationConfig};
pub use control::{OptimizationStatus, ProgressCallback, ProgressUpdate, SearchControl};
pub use diagnostics::{overfitting_score, robustness_score};
pub use evaluator::{worker_pool, BatchOutcome, Evaluation, Evaluator};
pub use genetic::{genetic_search, genetic_search_with_rng};
pub use grid::{count_combinations, generate_combinations, grid_search};
pub use objective::{rank, Direction, Objective};
pub use outcome::{OptimizationOutcome, OptimizationResult};
pub use search::ParameterOptimizer;
pub use walk_forward::{
    WalkForwardConfig, WalkForwardReport, WalkForwardSegment, WalkForwardValidator, WindowBounds,
    WindowSpec,
};
