//! Backtester
//!
//! Historical simulation framework for testing trading strategies on candles.
//!
//! # Features
//!
//! - **Strategy Trait**: Narrow capability interface plus a name-keyed registry
//! - **Historical Data Store**: CSV, TimescaleDB and synthetic candle sources behind a cache
//! - **Simulation Engine**: Deterministic tick loop with slippage, commission and risk checks
//! - **Performance Analyzer**: Risk-adjusted ratios, tail risk and trade statistics
//! - **Export**: JSON reports and CSV candle/trade files
//!
//! # Example
//!
//! ```ignore
//! use backtester::{
//!     CsvCandleSource, DataQuery, HistoricalDataStore, MomentumStrategy,
//!     PerformanceAnalyzer, SimulationEngine,
//! };
//!
//! let store = HistoricalDataStore::new(CsvCandleSource::new("data"));
//! let query = DataQuery::last_days("BTC-KRW", 30).resolution(TimeResolution::Hour);
//! let candles = store.load_clean(&query).await?;
//!
//! let engine = SimulationEngine::new(BacktestConfig::default());
//! let mut strategy = MomentumStrategy::new(20, 0.02)?;
//! let result = engine.run(&candles, &mut strategy);
//!
//! let metrics = PerformanceAnalyzer::default().calculate_metrics(&result);
//! println!("Return: {:.2}%  Sharpe: {:.2}", metrics.total_return_pct, metrics.sharpe_ratio);
//! ```

pub mod analyzer;
pub mod data_store;
pub mod export;
pub mod simulator;
pub mod strategy;

// Re-exports
pub use analyzer::{PerformanceAnalyzer, PerformanceMetrics, PeriodReturn};
pub use data_store::{
    assess_quality, interpolate_gaps, sanitize, CandleBatch, CandleSource, CsvCandleSource, DataQualityReport,
    DataQuery, Gap, HistoricalDataStore, PgCandleSource, SyntheticCandleSource,
};
pub use simulator::{BacktestResult, EngineState, SimulationContext, SimulationEngine};
pub use strategy::{
    BuyAndHoldStrategy, Fill, HoldStrategy, MarketContext, MomentumStrategy, Strategy,
    StrategyFactory, StrategyKind, StrategyRegistry,
};
