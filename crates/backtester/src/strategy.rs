//! Strategy capability contract and a registry for composing strategies by name.

use anyhow::{bail, Result};
use backtest_core::{
    param_f64, param_usize, Candle, ExitReason, ParameterVector, PositionId, PositionSide, Signal,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Read-only view of the simulation handed to a strategy each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub timestamp: DateTime<Utc>,
    /// Index of the candle in the input series.
    pub candle_index: usize,
    pub cash: Decimal,
    /// Equity as of the previous tick.
    pub equity: Decimal,
    pub open_positions: usize,
    /// Side of the oldest open position, if any.
    pub position_side: Option<PositionSide>,
}

/// Notification of an executed entry or exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub position_id: PositionId,
    pub side: PositionSide,
    pub timestamp: DateTime<Utc>,
    /// Executed price after slippage.
    pub price: Decimal,
    pub amount: Decimal,
    pub commission: Decimal,
    /// `None` for entries.
    pub exit_reason: Option<ExitReason>,
}

impl Fill {
    pub fn is_entry(&self) -> bool {
        self.exit_reason.is_none()
    }
}

/// Trading strategy driven tick by tick by the simulation engine.
pub trait Strategy: Send {
    /// Strategy name.
    fn name(&self) -> &str;

    /// Parameters the strategy was built with.
    fn parameters(&self) -> ParameterVector {
        ParameterVector::new()
    }

    /// Feed a new candle into the strategy's internal state.
    fn update_market_data(&mut self, candle: &Candle);

    /// Produce the signal for the current candle.
    fn generate_signal(&mut self, candle: &Candle, context: &MarketContext) -> Result<Signal>;

    /// Called when an entry or exit is executed.
    fn on_fill(&mut self, _fill: &Fill) {}

    /// Strategy-specific statistics reported with the result.
    fn performance_metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

/// Builds a strategy from a parameter vector.
pub type StrategyFactory = Arc<dyn Fn(&ParameterVector) -> Result<Box<dyn Strategy>> + Send + Sync>;

/// Never trades.
#[derive(Debug, Default, Clone)]
pub struct HoldStrategy;

impl Strategy for HoldStrategy {
    fn name(&self) -> &str {
        "hold"
    }

    fn update_market_data(&mut self, _candle: &Candle) {}

    fn generate_signal(&mut self, _candle: &Candle, _context: &MarketContext) -> Result<Signal> {
        Ok(Signal::hold())
    }
}

/// Buys once on the first tick it can and holds until the end.
#[derive(Debug, Default, Clone)]
pub struct BuyAndHoldStrategy {
    entered: bool,
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn update_market_data(&mut self, _candle: &Candle) {}

    fn generate_signal(&mut self, _candle: &Candle, _context: &MarketContext) -> Result<Signal> {
        if self.entered {
            Ok(Signal::hold())
        } else {
            Ok(Signal::buy(1.0, "initial entry"))
        }
    }

    fn on_fill(&mut self, fill: &Fill) {
        if fill.is_entry() {
            self.entered = true;
        }
    }
}

/// Rate-of-change momentum.
///
/// Buys when the close has risen more than `threshold` over `lookback`
/// candles and sells when it has fallen by more than `threshold`.
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    lookback: usize,
    threshold: f64,
    closes: VecDeque<Decimal>,
    signals: usize,
}

impl MomentumStrategy {
    pub const DEFAULT_LOOKBACK: usize = 20;
    pub const DEFAULT_THRESHOLD: f64 = 0.02;

    pub fn new(lookback: usize, threshold: f64) -> Result<Self> {
        if lookback == 0 {
            bail!("momentum lookback must be at least 1");
        }
        if !(threshold.is_finite() && threshold > 0.0) {
            bail!("momentum threshold must be positive, got {}", threshold);
        }
        Ok(Self {
            lookback,
            threshold,
            closes: VecDeque::with_capacity(lookback + 1),
            signals: 0,
        })
    }

    /// Build from `lookback` and `threshold` parameters, defaulting missing ones.
    pub fn from_params(params: &ParameterVector) -> Result<Self> {
        Self::new(
            param_usize(params, "lookback").unwrap_or(Self::DEFAULT_LOOKBACK),
            param_f64(params, "threshold").unwrap_or(Self::DEFAULT_THRESHOLD),
        )
    }

    fn momentum(&self) -> Option<f64> {
        if self.closes.len() <= self.lookback {
            return None;
        }
        let oldest = *self.closes.front()?;
        let latest = *self.closes.back()?;
        if oldest <= Decimal::ZERO {
            return None;
        }
        ((latest - oldest) / oldest).to_f64()
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn parameters(&self) -> ParameterVector {
        let mut params = ParameterVector::new();
        params.insert("lookback".to_string(), Decimal::from(self.lookback as u64));
        params.insert(
            "threshold".to_string(),
            Decimal::from_str(&self.threshold.to_string()).unwrap_or_default(),
        );
        params
    }

    fn update_market_data(&mut self, candle: &Candle) {
        self.closes.push_back(candle.close);
        while self.closes.len() > self.lookback + 1 {
            self.closes.pop_front();
        }
    }

    fn generate_signal(&mut self, _candle: &Candle, _context: &MarketContext) -> Result<Signal> {
        let Some(momentum) = self.momentum() else {
            return Ok(Signal::hold());
        };

        let confidence = (momentum.abs() / (self.threshold * 2.0)).min(1.0);
        let signal = if momentum > self.threshold {
            Signal::buy(confidence, &format!("momentum {:.4} above threshold", momentum))
        } else if momentum < -self.threshold {
            Signal::sell(confidence, &format!("momentum {:.4} below threshold", momentum))
        } else {
            return Ok(Signal::hold());
        };

        self.signals += 1;
        Ok(signal)
    }

    fn performance_metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("signals_generated".to_string(), self.signals as f64);
        metrics
    }
}

/// Built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Hold,
    BuyAndHold,
    Momentum,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [StrategyKind::Hold, StrategyKind::BuyAndHold, StrategyKind::Momentum];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Hold => "hold",
            StrategyKind::BuyAndHold => "buy_and_hold",
            StrategyKind::Momentum => "momentum",
        }
    }

    /// Build an instance of this strategy.
    pub fn build(&self, params: &ParameterVector) -> Result<Box<dyn Strategy>> {
        let strategy: Box<dyn Strategy> = match self {
            StrategyKind::Hold => Box::new(HoldStrategy),
            StrategyKind::BuyAndHold => Box::new(BuyAndHoldStrategy::default()),
            StrategyKind::Momentum => Box::new(MomentumStrategy::from_params(params)?),
        };
        Ok(strategy)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "hold" => Ok(StrategyKind::Hold),
            "buy_and_hold" | "buyandhold" => Ok(StrategyKind::BuyAndHold),
            "momentum" => Ok(StrategyKind::Momentum),
            other => bail!("unknown strategy: {}", other),
        }
    }
}

/// Name to factory table used to create strategies at composition time.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every [`StrategyKind`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in StrategyKind::ALL {
            registry.register(kind.as_str(), move |params| kind.build(params));
        }
        registry
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ParameterVector) -> Result<Box<dyn Strategy>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Factory registered under `name`.
    pub fn factory(&self, name: &str) -> Result<StrategyFactory> {
        match self.factories.get(name) {
            Some(factory) => Ok(Arc::clone(factory)),
            None => bail!("no strategy registered as '{}'", name),
        }
    }

    /// Build the strategy registered under `name`.
    pub fn create(&self, name: &str, params: &ParameterVector) -> Result<Box<dyn Strategy>> {
        (self.factory(name)?)(params)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}
