//! Position, trade and equity records owned by a simulation run.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

/// Stable identifier of a position inside one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl std::fmt::Display for PositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub side: PositionSide,
    pub amount: Decimal,
    /// Fill price including slippage.
    pub entry_price: Decimal,
    pub entry_timestamp: DateTime<Utc>,
    /// Commission paid on entry.
    pub entry_commission: Decimal,
    /// Slippage cost paid on entry.
    pub entry_slippage: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Reference to the signal reason that opened the position.
    pub order_ref: Option<String>,
}

impl Position {
    /// Notional value at entry.
    pub fn entry_value(&self) -> Decimal {
        self.entry_price * self.amount
    }

    /// Unrealized P&L at `price`, before exit costs.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (price - self.entry_price) * self.amount,
            PositionSide::Short => (self.entry_price - price) * self.amount,
        }
    }

    /// Mark-to-market value counted towards equity.
    ///
    /// Shorts lock their entry notional as collateral, so their value is the
    /// collateral plus unrealized P&L, floored at zero.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => self.amount * price,
            PositionSide::Short => (self.entry_value() + self.unrealized_pnl(price)).max(Decimal::ZERO),
        }
    }

    /// Whether the stop-loss level is reached at `price`.
    pub fn stop_hit(&self, price: Decimal) -> bool {
        match (self.stop_loss, self.side) {
            (Some(stop), PositionSide::Long) => price <= stop,
            (Some(stop), PositionSide::Short) => price >= stop,
            (None, _) => false,
        }
    }

    /// Whether the take-profit level is reached at `price`.
    pub fn target_hit(&self, price: Decimal) -> bool {
        match (self.take_profit, self.side) {
            (Some(target), PositionSide::Long) => price >= target,
            (Some(target), PositionSide::Short) => price <= target,
            (None, _) => false,
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    SignalReversal,
    EndOfBacktest,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop loss",
            ExitReason::TakeProfit => "take profit",
            ExitReason::SignalReversal => "signal reversal",
            ExitReason::EndOfBacktest => "end of backtest",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Sequence number within the run, starting at 1.
    pub id: u64,
    pub position_id: PositionId,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub amount: Decimal,
    pub entry_timestamp: DateTime<Utc>,
    pub exit_timestamp: DateTime<Utc>,
    /// Entry plus exit commission.
    pub commission: Decimal,
    /// Entry plus exit slippage cost.
    pub slippage: Decimal,
    /// Realized P&L net of commission.
    pub pnl: Decimal,
    /// P&L relative to the entry notional.
    pub return_pct: f64,
    /// Holding period in milliseconds.
    pub holding_period_ms: i64,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }

    pub fn holding_period_hours(&self) -> f64 {
        self.holding_period_ms as f64 / 3_600_000.0
    }
}

/// One point of the equity curve, recorded per processed candle.
///
/// Marked at the candle's close after stop exits and before that candle's
/// signal fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    /// Free cash.
    pub balance: Decimal,
    /// Cash plus mark-to-market value of open positions.
    pub equity: Decimal,
    /// Running peak equity.
    pub peak: Decimal,
    /// Absolute decline from peak.
    pub drawdown: Decimal,
    /// Fractional decline from peak, in [0, 1].
    pub drawdown_percent: f64,
}
