//! Deterministic single-threaded simulation engine with slippage and commission.

use backtest_core::{
    BacktestConfig, Candle, EquityPoint, ExitReason, ParameterVector, Position, PositionId, PositionSide,
    Signal, SignalAction, Trade,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::strategy::{Fill, MarketContext, Strategy};

/// Strategy error messages kept on a result.
const MAX_ERROR_LOG: usize = 100;

/// Decimal places kept when sizing an entry.
const AMOUNT_DP: u32 = 8;

/// Lifecycle of a simulation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Flushing,
    Done,
}

/// Output of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Strategy name.
    pub strategy_name: String,
    /// Strategy parameters.
    pub parameters: ParameterVector,
    /// First processed candle.
    pub start_time: Option<DateTime<Utc>>,
    /// Last processed candle.
    pub end_time: Option<DateTime<Utc>>,
    /// Candles that went through the tick loop.
    pub candles_processed: usize,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    /// Final minus initial balance.
    pub net_profit: Decimal,
    /// Net profit as a fraction of the initial balance.
    pub total_return: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    /// Largest peak-to-trough decline as a fraction, in [0, 1].
    pub max_drawdown: f64,
    pub total_commission: Decimal,
    pub total_slippage: Decimal,
    /// Malformed or out-of-order candles.
    pub skipped_candles: usize,
    /// Ticks whose signal was dropped because the strategy failed.
    pub strategy_errors: usize,
    /// Entry signals refused by a risk check.
    pub rejected_signals: usize,
    /// First few strategy error messages.
    pub errors: Vec<String>,
    /// Statistics reported by the strategy.
    pub strategy_metrics: BTreeMap<String, f64>,
    /// Closed trades in closing order.
    pub trades: Vec<Trade>,
    /// One point per processed candle.
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestResult {
    /// Check if the backtest was profitable.
    pub fn is_profitable(&self) -> bool {
        self.final_balance > self.initial_balance
    }

    /// Total return as a percentage.
    pub fn total_return_pct(&self) -> f64 {
        self.total_return * 100.0
    }

    /// Max drawdown as a percentage.
    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown * 100.0
    }
}

/// Exclusively owned per-run state.
///
/// A fresh context is created for every run; optimizer workers never share one.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    state: EngineState,
    pub cash: Decimal,
    /// Open positions keyed by id. Ids increase monotonically within a run.
    pub positions: BTreeMap<PositionId, Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    /// Running equity peak, starting at the initial balance.
    pub peak: Decimal,
    pub last_entry: Option<DateTime<Utc>>,
    pub last_candle: Option<Candle>,
    pub candles_processed: usize,
    pub skipped_candles: usize,
    pub strategy_errors: usize,
    pub rejected_signals: usize,
    pub total_commission: Decimal,
    pub total_slippage: Decimal,
    pub errors: Vec<String>,
    next_position_id: u64,
    next_trade_id: u64,
}

impl SimulationContext {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            state: EngineState::Idle,
            cash: initial_balance,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            peak: initial_balance,
            last_entry: None,
            last_candle: None,
            candles_processed: 0,
            skipped_candles: 0,
            strategy_errors: 0,
            rejected_signals: 0,
            total_commission: Decimal::ZERO,
            total_slippage: Decimal::ZERO,
            errors: Vec::new(),
            next_position_id: 1,
            next_trade_id: 1,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Cash plus mark-to-market value of open positions.
    pub fn equity(&self, price: Decimal) -> Decimal {
        let position_value: Decimal = self.positions.values().map(|p| p.market_value(price)).sum();
        self.cash + position_value
    }

    /// Open positions on `side`, oldest first.
    pub fn position_ids(&self, side: PositionSide) -> Vec<PositionId> {
        self.positions
            .values()
            .filter(|p| p.side == side)
            .map(|p| p.id)
            .collect()
    }

    fn market_context(&self, index: usize, candle: &Candle) -> MarketContext {
        MarketContext {
            timestamp: candle.timestamp,
            candle_index: index,
            cash: self.cash,
            equity: self
                .equity_curve
                .last()
                .map(|p| p.equity)
                .unwrap_or(self.cash),
            open_positions: self.positions.len(),
            position_side: self.positions.values().next().map(|p| p.side),
        }
    }

    fn record_equity(&mut self, timestamp: DateTime<Utc>, price: Decimal) {
        let equity = self.equity(price);
        self.peak = self.peak.max(equity);
        let drawdown = (self.peak - equity).max(Decimal::ZERO);
        let drawdown_percent = if self.peak > Decimal::ZERO {
            (drawdown / self.peak).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        self.equity_curve.push(EquityPoint {
            timestamp,
            balance: self.cash,
            equity,
            peak: self.peak,
            drawdown,
            drawdown_percent,
        });
    }

    fn record_error(&mut self, message: String) {
        self.strategy_errors += 1;
        if self.errors.len() < MAX_ERROR_LOG {
            self.errors.push(message);
        }
    }
}

/// Runs a strategy over an ordered candle series.
#[derive(Debug, Clone)]
pub struct SimulationEngine {
    config: BacktestConfig,
}

impl SimulationEngine {
    /// Create a new simulation engine.
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run a backtest on a fresh context.
    pub fn run(&self, candles: &[Candle], strategy: &mut dyn Strategy) -> BacktestResult {
        let mut context = SimulationContext::new(self.config.initial_balance);
        self.run_with_context(candles, strategy, &mut context)
    }

    /// Run a backtest on a caller-owned context.
    ///
    /// A context that is not `Idle` is reset first. After the call it is
    /// `Done` and holds the final state for inspection.
    pub fn run_with_context(
        &self,
        candles: &[Candle],
        strategy: &mut dyn Strategy,
        context: &mut SimulationContext,
    ) -> BacktestResult {
        if context.state != EngineState::Idle {
            *context = SimulationContext::new(self.config.initial_balance);
        }

        debug!(
            strategy = strategy.name(),
            candles = candles.len(),
            initial_balance = %context.cash,
            "Starting backtest"
        );

        context.state = EngineState::Running;
        for (index, candle) in candles.iter().enumerate() {
            if !self.in_range(candle.timestamp) {
                continue;
            }
            if let Err(e) = candle.validate() {
                context.skipped_candles += 1;
                debug!(timestamp = %candle.timestamp, error = %e, "Skipping malformed candle");
                continue;
            }
            if let Some(last) = &context.last_candle {
                if candle.timestamp <= last.timestamp {
                    context.skipped_candles += 1;
                    debug!(timestamp = %candle.timestamp, "Skipping out-of-order candle");
                    continue;
                }
            }

            self.process_tick(index, candle, strategy, context);
        }

        context.state = EngineState::Flushing;
        self.close_all_positions(context, strategy);

        context.state = EngineState::Done;
        let result = self.calculate_results(strategy, context);

        info!(
            strategy = %result.strategy_name,
            return_pct = result.total_return_pct(),
            max_drawdown = result.max_drawdown,
            trades = result.total_trades,
            skipped = result.skipped_candles,
            errors = result.strategy_errors,
            "Backtest completed"
        );

        result
    }

    fn in_range(&self, timestamp: DateTime<Utc>) -> bool {
        self.config.start_date.map_or(true, |start| timestamp >= start)
            && self.config.end_date.map_or(true, |end| timestamp <= end)
    }

    fn process_tick(
        &self,
        index: usize,
        candle: &Candle,
        strategy: &mut dyn Strategy,
        context: &mut SimulationContext,
    ) {
        context.candles_processed += 1;

        strategy.update_market_data(candle);
        let market = context.market_context(index, candle);
        let signal = match strategy.generate_signal(candle, &market) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(
                    strategy = strategy.name(),
                    timestamp = %candle.timestamp,
                    error = %e,
                    "Strategy failed, dropping signal for this tick"
                );
                context.record_error(format!("{}: {}", candle.timestamp, e));
                None
            }
        };

        // Exits take priority over new entries on the same tick
        self.check_exits(candle, strategy, context);

        // The point is marked before this candle's signal fills, so the
        // first point always holds the initial balance.
        context.record_equity(candle.timestamp, candle.close);

        if let Some(signal) = signal {
            self.execute_signal(&signal, candle, strategy, context);
        }

        context.last_candle = Some(candle.clone());
    }

    fn check_exits(&self, candle: &Candle, strategy: &mut dyn Strategy, context: &mut SimulationContext) {
        let triggered: Vec<(PositionId, ExitReason)> = context
            .positions
            .values()
            .filter_map(|p| {
                if p.stop_hit(candle.close) {
                    Some((p.id, ExitReason::StopLoss))
                } else if p.target_hit(candle.close) {
                    Some((p.id, ExitReason::TakeProfit))
                } else {
                    None
                }
            })
            .collect();

        for (id, reason) in triggered {
            self.execute_close(id, candle.close, candle.timestamp, reason, strategy, context);
        }
    }

    fn execute_signal(
        &self,
        signal: &Signal,
        candle: &Candle,
        strategy: &mut dyn Strategy,
        context: &mut SimulationContext,
    ) {
        let side = match signal.action {
            SignalAction::Buy => PositionSide::Long,
            SignalAction::Sell => PositionSide::Short,
            SignalAction::Hold => return,
        };
        let price = if signal.price > Decimal::ZERO {
            signal.price
        } else {
            candle.close
        };

        let opposite = context.position_ids(side.opposite());
        let reversed = !opposite.is_empty();
        for id in opposite {
            self.execute_close(id, price, candle.timestamp, ExitReason::SignalReversal, strategy, context);
        }

        if side == PositionSide::Short && !self.config.allow_short {
            if !reversed {
                self.reject(context, signal, "short selling disabled");
            }
            return;
        }

        self.execute_entry(signal, side, price, candle.timestamp, strategy, context);
    }

    fn execute_entry(
        &self,
        signal: &Signal,
        side: PositionSide,
        price: Decimal,
        timestamp: DateTime<Utc>,
        strategy: &mut dyn Strategy,
        context: &mut SimulationContext,
    ) {
        if signal.confidence < self.config.min_confidence {
            return self.reject(context, signal, "confidence below minimum");
        }
        if context.positions.len() >= self.config.max_concurrent_trades {
            return self.reject(context, signal, "max concurrent trades reached");
        }
        if let Some(last) = context.last_entry {
            if (timestamp - last).num_milliseconds() < self.config.min_trade_interval_ms {
                return self.reject(context, signal, "min trade interval not elapsed");
            }
        }

        let fill_price = self.fill_price(price, side, true);
        if fill_price <= Decimal::ZERO {
            return self.reject(context, signal, "non-positive fill price");
        }

        let amount = if signal.amount > Decimal::ZERO {
            signal.amount
        } else {
            let budget = self.config.max_position_size * context.cash;
            (budget / (fill_price * (Decimal::ONE + self.config.commission)))
                .round_dp_with_strategy(AMOUNT_DP, RoundingStrategy::ToZero)
        };
        if amount <= Decimal::ZERO {
            return self.reject(context, signal, "position size rounds to zero");
        }

        let notional = fill_price * amount;
        let commission = notional * self.config.commission;
        if notional > self.config.max_position_size * context.cash {
            return self.reject(context, signal, "exceeds max position size");
        }
        if context.cash < notional + commission {
            return self.reject(context, signal, "insufficient balance");
        }

        let slippage = (fill_price - price).abs() * amount;
        let (stop_loss, take_profit) = self.exit_levels(signal, side, fill_price);
        let id = PositionId(context.next_position_id);
        context.next_position_id += 1;

        // Shorts lock their notional as collateral, longs pay for the asset
        context.cash -= notional + commission;
        context.total_commission += commission;
        context.total_slippage += slippage;
        context.last_entry = Some(timestamp);
        context.positions.insert(
            id,
            Position {
                id,
                side,
                amount,
                entry_price: fill_price,
                entry_timestamp: timestamp,
                entry_commission: commission,
                entry_slippage: slippage,
                stop_loss,
                take_profit,
                order_ref: (!signal.reason.is_empty()).then(|| signal.reason.clone()),
            },
        );

        debug!(
            position = %id,
            side = side.as_str(),
            price = %fill_price,
            amount = %amount,
            "Opened position"
        );

        strategy.on_fill(&Fill {
            position_id: id,
            side,
            timestamp,
            price: fill_price,
            amount,
            commission,
            exit_reason: None,
        });
    }

    fn execute_close(
        &self,
        id: PositionId,
        price: Decimal,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
        strategy: &mut dyn Strategy,
        context: &mut SimulationContext,
    ) {
        let Some(position) = context.positions.remove(&id) else {
            return;
        };

        let fill_price = self.fill_price(price, position.side, false);
        let notional = fill_price * position.amount;
        let commission = notional * self.config.commission;
        let slippage = (fill_price - price).abs() * position.amount;

        let proceeds = match position.side {
            PositionSide::Long => notional - commission,
            PositionSide::Short => {
                let gross = position.entry_value() + position.unrealized_pnl(fill_price) - commission;
                gross.max(Decimal::ZERO)
            }
        };
        context.cash += proceeds;
        context.total_commission += commission;
        context.total_slippage += slippage;

        let cost_basis = position.entry_value() + position.entry_commission;
        let pnl = proceeds - cost_basis;
        let return_pct = if cost_basis > Decimal::ZERO {
            (pnl / cost_basis).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let trade = Trade {
            id: context.next_trade_id,
            position_id: id,
            side: position.side,
            entry_price: position.entry_price,
            exit_price: fill_price,
            amount: position.amount,
            entry_timestamp: position.entry_timestamp,
            exit_timestamp: timestamp,
            commission: position.entry_commission + commission,
            slippage: position.entry_slippage + slippage,
            pnl,
            return_pct,
            holding_period_ms: (timestamp - position.entry_timestamp).num_milliseconds(),
            exit_reason: reason,
        };
        context.next_trade_id += 1;

        debug!(
            position = %id,
            reason = %reason,
            price = %fill_price,
            pnl = %pnl,
            "Closed position"
        );

        strategy.on_fill(&Fill {
            position_id: id,
            side: position.side,
            timestamp,
            price: fill_price,
            amount: position.amount,
            commission,
            exit_reason: Some(reason),
        });
        context.trades.push(trade);
    }

    /// Liquidate everything at the final processed candle.
    fn close_all_positions(&self, context: &mut SimulationContext, strategy: &mut dyn Strategy) {
        let Some(last) = context.last_candle.clone() else {
            return;
        };
        if context.positions.is_empty() {
            return;
        }

        let ids: Vec<PositionId> = context.positions.keys().copied().collect();
        for id in ids {
            self.execute_close(id, last.close, last.timestamp, ExitReason::EndOfBacktest, strategy, context);
        }

        // Restate the final point so it reflects realized cash
        context.equity_curve.pop();
        context.record_equity(last.timestamp, last.close);
    }

    /// Price shifted against the trader.
    fn fill_price(&self, price: Decimal, side: PositionSide, entry: bool) -> Decimal {
        let buying = matches!(
            (side, entry),
            (PositionSide::Long, true) | (PositionSide::Short, false)
        );
        if buying {
            price * (Decimal::ONE + self.config.slippage)
        } else {
            price * (Decimal::ONE - self.config.slippage)
        }
    }

    /// Stop and target prices for a new position.
    fn exit_levels(&self, signal: &Signal, side: PositionSide, entry: Decimal) -> (Option<Decimal>, Option<Decimal>) {
        let (down, up) = match side {
            PositionSide::Long => (Decimal::NEGATIVE_ONE, Decimal::ONE),
            PositionSide::Short => (Decimal::ONE, Decimal::NEGATIVE_ONE),
        };
        let stop = signal
            .stop_loss
            .or_else(|| self.config.stop_loss_percent.map(|pct| entry * (Decimal::ONE + down * pct)));
        let target = signal
            .take_profit
            .or_else(|| self.config.take_profit_percent.map(|pct| entry * (Decimal::ONE + up * pct)));
        (stop, target)
    }

    fn reject(&self, context: &mut SimulationContext, signal: &Signal, reason: &str) {
        context.rejected_signals += 1;
        debug!(action = ?signal.action, reason, "Rejected signal");
    }

    fn calculate_results(&self, strategy: &dyn Strategy, context: &SimulationContext) -> BacktestResult {
        let initial = self.config.initial_balance;
        let final_balance = context.cash;
        let net_profit = final_balance - initial;
        let total_return = if initial > Decimal::ZERO {
            (net_profit / initial).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let total_trades = context.trades.len();
        let winning_trades = context.trades.iter().filter(|t| t.is_win()).count();
        let losing_trades = total_trades - winning_trades;
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        let max_drawdown = context
            .equity_curve
            .iter()
            .map(|p| p.drawdown_percent)
            .fold(0.0_f64, f64::max)
            .clamp(0.0, 1.0);

        BacktestResult {
            strategy_name: strategy.name().to_string(),
            parameters: strategy.parameters(),
            start_time: context.equity_curve.first().map(|p| p.timestamp),
            end_time: context.equity_curve.last().map(|p| p.timestamp),
            candles_processed: context.candles_processed,
            initial_balance: initial,
            final_balance,
            net_profit,
            total_return,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            max_drawdown,
            total_commission: context.total_commission,
            total_slippage: context.total_slippage,
            skipped_candles: context.skipped_candles,
            strategy_errors: context.strategy_errors,
            rejected_signals: context.rejected_signals,
            errors: context.errors.clone(),
            strategy_metrics: strategy.performance_metrics(),
            trades: context.trades.clone(),
            equity_curve: context.equity_curve.clone(),
        }
    }
}
