//! Backtest Core Library
//!
//! Shared types, error taxonomy and configuration for the backtesting
//! workspace: candles, signals, positions, trades, equity points and
//! parameter vectors.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AnalyzerConfig, BacktestConfig};
pub use error::{Error, Result};
pub use types::*;
