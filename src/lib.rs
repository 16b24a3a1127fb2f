//! Backtest Lab: strategy backtesting, analysis and parameter optimization
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the workspace. For actual functionality, use the individual crates:
//!
//! - `backtest-core`: Candles, signals, positions, trades, errors, configuration
//! - `backtester`: Historical data store, strategy trait, simulation engine, analyzer, export
//! - `optimizer`: Grid and genetic search, diagnostics, walk-forward validation
//! - `orchestrator`: Comparison, benchmarks, full analysis reports, `backtest-lab` CLI

pub use backtest_core as core;
pub use backtester as engine;
pub use optimizer as search;
pub use orchestrator as lab;
