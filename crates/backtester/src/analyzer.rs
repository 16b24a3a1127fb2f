//! Performance metrics derived from a [`BacktestResult`].

use backtest_core::{AnalyzerConfig, EquityPoint, Trade};
use chrono::Datelike;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::simulator::BacktestResult;

/// Return over one calendar month or year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReturn {
    /// `2024-03` for months, `2024` for years.
    pub period: String,
    pub start_equity: Decimal,
    pub end_equity: Decimal,
    /// Fractional return over the period.
    pub return_pct: f64,
}

/// Read-only metrics for one backtest.
///
/// Fractions are in [0, 1] unless the field name ends in `_pct`.
/// Every field is 0 when its inputs are degenerate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Returns
    pub net_profit: Decimal,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub annualized_return: f64,

    // Risk
    /// Annualized standard deviation of period returns.
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Total return percent over max drawdown percent.
    pub calmar_ratio: f64,
    /// Annualized return over max drawdown.
    pub annualized_calmar: f64,
    pub recovery_factor: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    /// Longest run of consecutive points below the peak.
    pub max_drawdown_duration: usize,
    /// Mean drawdown over points below the peak.
    pub average_drawdown: f64,
    /// Points below the peak.
    pub drawdown_periods: usize,
    /// Value at Risk at 95% confidence, as a non-negative loss.
    pub var_95: f64,
    /// Conditional VaR at 95%, never below `var_95`.
    pub cvar_95: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub ulcer_index: f64,

    // Trades
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    /// Gross profit over gross loss, 0 without losing trades.
    pub profit_factor: f64,
    /// Expected return per trade.
    pub expectancy: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub best_trade_return: f64,
    pub worst_trade_return: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_holding_period_hours: f64,
    pub min_holding_period_hours: f64,
    pub max_holding_period_hours: f64,
    pub total_commission: Decimal,
    pub total_slippage: Decimal,

    // Breakdown
    pub monthly_returns: Vec<PeriodReturn>,
    pub yearly_returns: Vec<PeriodReturn>,
}

/// Computes [`PerformanceMetrics`] from results.
#[derive(Debug, Clone, Default)]
pub struct PerformanceAnalyzer {
    config: AnalyzerConfig,
}

impl PerformanceAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Derive all metrics from a result.
    pub fn calculate_metrics(&self, result: &BacktestResult) -> PerformanceMetrics {
        let ppy = self.config.periods_per_year.max(0.0);
        let returns = period_returns(&result.equity_curve);

        let total_return = result.total_return;
        let annualized_return = if !returns.is_empty() && 1.0 + total_return > 0.0 {
            finite((1.0 + total_return).powf(ppy / returns.len() as f64) - 1.0)
        } else {
            0.0
        };

        let max_drawdown = result.max_drawdown;
        let total_return_pct = total_return * 100.0;
        let max_drawdown_pct = max_drawdown * 100.0;
        let calmar_ratio = if max_drawdown_pct > 0.0 {
            finite(total_return_pct / max_drawdown_pct)
        } else {
            0.0
        };
        let (annualized_calmar, recovery_factor) = if max_drawdown > 0.0 {
            (finite(annualized_return / max_drawdown), finite(total_return / max_drawdown))
        } else {
            (0.0, 0.0)
        };

        let (volatility, sharpe_ratio, sortino_ratio) = self.calculate_risk_metrics(&returns);
        let (var_95, cvar_95) = calculate_var_cvar(&returns);
        let (skewness, kurtosis) = calculate_moments(&returns);
        let drawdowns = calculate_drawdown_stats(&result.equity_curve);

        let mut metrics = PerformanceMetrics {
            net_profit: result.net_profit,
            total_return,
            total_return_pct,
            annualized_return,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            annualized_calmar,
            recovery_factor,
            max_drawdown,
            max_drawdown_pct,
            max_drawdown_duration: drawdowns.max_duration,
            average_drawdown: drawdowns.average,
            drawdown_periods: drawdowns.periods,
            var_95,
            cvar_95,
            skewness,
            kurtosis,
            ulcer_index: drawdowns.ulcer_index,
            total_commission: result.total_commission,
            total_slippage: result.total_slippage,
            monthly_returns: calculate_period_returns(result, |p| {
                format!("{:04}-{:02}", p.timestamp.year(), p.timestamp.month())
            }),
            yearly_returns: calculate_period_returns(result, |p| format!("{:04}", p.timestamp.year())),
            ..Default::default()
        };

        self.apply_trade_stats(&mut metrics, &result.trades);
        metrics
    }

    fn calculate_risk_metrics(&self, returns: &[f64]) -> (f64, f64, f64) {
        if returns.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let ppy = self.config.periods_per_year.max(0.0);
        let risk_free = if ppy > 0.0 {
            self.config.risk_free_rate / ppy
        } else {
            0.0
        };
        let excess = mean(returns) - risk_free;
        let std_dev = std_dev(returns);

        let volatility = finite(std_dev * ppy.sqrt());
        let sharpe = if std_dev > 0.0 {
            finite(excess / std_dev * ppy.sqrt())
        } else {
            0.0
        };

        // Sortino ratio (only downside deviation)
        let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).map(|&r| r * r).collect();
        let sortino = if downside.is_empty() {
            0.0
        } else {
            let downside_dev = (downside.iter().sum::<f64>() / downside.len() as f64).sqrt();
            if downside_dev > 0.0 {
                finite(excess / downside_dev * ppy.sqrt())
            } else {
                0.0
            }
        };

        (volatility, sharpe, sortino)
    }

    /// Scan the trade list once for trade-level statistics.
    fn apply_trade_stats(&self, metrics: &mut PerformanceMetrics, trades: &[Trade]) {
        if trades.is_empty() {
            return;
        }

        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;
        let mut win_returns = Vec::new();
        let mut loss_returns = Vec::new();
        let mut streak_wins = 0;
        let mut streak_losses = 0;
        let mut best = f64::NEG_INFINITY;
        let mut worst = f64::INFINITY;
        let mut hold_min = f64::INFINITY;
        let mut hold_max: f64 = 0.0;
        let mut hold_total = 0.0;

        for trade in trades {
            if trade.is_win() {
                gross_profit += trade.pnl;
                win_returns.push(trade.return_pct);
                metrics.largest_win = metrics.largest_win.max(trade.pnl);
                streak_wins += 1;
                streak_losses = 0;
                metrics.max_consecutive_wins = metrics.max_consecutive_wins.max(streak_wins);
            } else {
                gross_loss += trade.pnl.abs();
                loss_returns.push(trade.return_pct);
                metrics.largest_loss = metrics.largest_loss.min(trade.pnl);
                streak_losses += 1;
                streak_wins = 0;
                metrics.max_consecutive_losses = metrics.max_consecutive_losses.max(streak_losses);
            }

            best = best.max(trade.return_pct);
            worst = worst.min(trade.return_pct);
            let hours = trade.holding_period_hours();
            hold_min = hold_min.min(hours);
            hold_max = hold_max.max(hours);
            hold_total += hours;
        }

        let total = trades.len();
        metrics.total_trades = total;
        metrics.winning_trades = win_returns.len();
        metrics.losing_trades = loss_returns.len();
        metrics.win_rate = win_returns.len() as f64 / total as f64;
        metrics.profit_factor = if gross_loss > Decimal::ZERO {
            (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        metrics.avg_win = mean(&win_returns);
        metrics.avg_loss = mean(&loss_returns);
        metrics.expectancy = finite(metrics.win_rate * metrics.avg_win + (1.0 - metrics.win_rate) * metrics.avg_loss);
        metrics.best_trade_return = finite(best);
        metrics.worst_trade_return = finite(worst);
        metrics.avg_holding_period_hours = hold_total / total as f64;
        metrics.min_holding_period_hours = finite(hold_min);
        metrics.max_holding_period_hours = hold_max;
    }
}

/// Simple returns between successive equity points.
pub fn period_returns(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev > Decimal::ZERO {
                ((w[1].equity - prev) / prev).to_f64().unwrap_or(0.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation, 0 for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    finite(variance.sqrt())
}

/// Standard deviation over absolute mean, `None` when the mean is ~0.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let m = mean(values);
    if m.abs() < f64::EPSILON {
        None
    } else {
        Some(std_dev(values) / m.abs())
    }
}

/// Map NaN and infinities to 0.
pub fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Historical VaR and CVaR at 95% as non-negative loss magnitudes.
fn calculate_var_cvar(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let index = ((sorted.len() as f64 * 0.05).floor() as usize).min(sorted.len() - 1);
    let var_95 = (-sorted[index]).max(0.0);
    let tail = &sorted[..=index];
    let cvar_95 = (-mean(tail)).max(var_95);

    (finite(var_95), finite(cvar_95))
}

/// Third and fourth standardized moments.
fn calculate_moments(returns: &[f64]) -> (f64, f64) {
    let sigma = std_dev(returns);
    if sigma <= 0.0 {
        return (0.0, 0.0);
    }

    let m = mean(returns);
    let n = returns.len() as f64;
    let m3 = returns.iter().map(|r| (r - m).powi(3)).sum::<f64>() / n;
    let m4 = returns.iter().map(|r| (r - m).powi(4)).sum::<f64>() / n;

    (finite(m3 / sigma.powi(3)), finite(m4 / sigma.powi(4)))
}

struct DrawdownStats {
    max_duration: usize,
    average: f64,
    periods: usize,
    ulcer_index: f64,
}

fn calculate_drawdown_stats(curve: &[EquityPoint]) -> DrawdownStats {
    let mut max_duration = 0;
    let mut current = 0;
    let mut underwater = Vec::new();
    let mut squared_pct = 0.0;

    for point in curve {
        let dd = point.drawdown_percent;
        squared_pct += (dd * 100.0).powi(2);
        if dd > 0.0 {
            underwater.push(dd);
            current += 1;
            max_duration = max_duration.max(current);
        } else {
            current = 0;
        }
    }

    let ulcer_index = if curve.is_empty() {
        0.0
    } else {
        finite((squared_pct / curve.len() as f64).sqrt())
    };

    DrawdownStats {
        max_duration,
        average: mean(&underwater),
        periods: underwater.len(),
        ulcer_index,
    }
}

/// Group the equity curve into calendar buckets keyed by `key`.
///
/// Each bucket starts from the equity the previous bucket ended with.
fn calculate_period_returns<F>(result: &BacktestResult, key: F) -> Vec<PeriodReturn>
where
    F: Fn(&EquityPoint) -> String,
{
    let mut periods: Vec<PeriodReturn> = Vec::new();
    let mut start_equity = result.initial_balance;

    for point in &result.equity_curve {
        let label = key(point);
        match periods.last_mut() {
            Some(current) if current.period == label => current.end_equity = point.equity,
            _ => {
                if let Some(previous) = periods.last() {
                    start_equity = previous.end_equity;
                }
                periods.push(PeriodReturn {
                    period: label,
                    start_equity,
                    end_equity: point.equity,
                    return_pct: 0.0,
                });
            }
        }
    }

    for period in &mut periods {
        period.return_pct = if period.start_equity > Decimal::ZERO {
            ((period.end_equity - period.start_equity) / period.start_equity)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };
    }

    periods
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtest_core::{ExitReason, PositionId, PositionSide};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 30, 0, 0, 0).unwrap()
    }

    fn curve(equities: &[i64]) -> Vec<EquityPoint> {
        let mut peak = Decimal::ZERO;
        equities
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let equity = Decimal::new(*e, 0);
                peak = peak.max(equity);
                let drawdown = peak - equity;
                EquityPoint {
                    timestamp: start() + Duration::days(i as i64),
                    balance: equity,
                    equity,
                    peak,
                    drawdown,
                    drawdown_percent: (drawdown / peak).to_f64().unwrap(),
                }
            })
            .collect()
    }

    fn trade(pnl: i64, return_pct: f64, hours: i64) -> Trade {
        Trade {
            id: 1,
            position_id: PositionId(1),
            side: PositionSide::Long,
            entry_price: Decimal::new(100, 0),
            exit_price: Decimal::new(100, 0),
            amount: Decimal::ONE,
            entry_timestamp: start(),
            exit_timestamp: start() + Duration::hours(hours),
            commission: Decimal::ZERO,
            slippage: Decimal::ZERO,
            pnl: Decimal::new(pnl, 0),
            return_pct,
            holding_period_ms: Duration::hours(hours).num_milliseconds(),
            exit_reason: ExitReason::SignalReversal,
        }
    }

    fn result(equities: &[i64], trades: Vec<Trade>) -> BacktestResult {
        let equity_curve = curve(equities);
        let initial = Decimal::new(equities[0], 0);
        let final_balance = Decimal::new(*equities.last().unwrap(), 0);
        let max_drawdown = equity_curve.iter().map(|p| p.drawdown_percent).fold(0.0, f64::max);
        let winning = trades.iter().filter(|t| t.is_win()).count();
        BacktestResult {
            strategy_name: "test".to_string(),
            parameters: Default::default(),
            start_time: equity_curve.first().map(|p| p.timestamp),
            end_time: equity_curve.last().map(|p| p.timestamp),
            candles_processed: equities.len(),
            initial_balance: initial,
            final_balance,
            net_profit: final_balance - initial,
            total_return: ((final_balance - initial) / initial).to_f64().unwrap(),
            total_trades: trades.len(),
            winning_trades: winning,
            losing_trades: trades.len() - winning,
            win_rate: 0.0,
            max_drawdown,
            total_commission: Decimal::ZERO,
            total_slippage: Decimal::ZERO,
            skipped_candles: 0,
            strategy_errors: 0,
            rejected_signals: 0,
            errors: Vec::new(),
            strategy_metrics: Default::default(),
            trades,
            equity_curve,
        }
    }

    #[test]
    fn test_flat_curve_is_all_zero() {
        let metrics = PerformanceAnalyzer::default().calculate_metrics(&result(&[1000, 1000, 1000], vec![]));
        assert_eq!(metrics.volatility, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.sortino_ratio, 0.0);
        assert_eq!(metrics.calmar_ratio, 0.0);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.var_95, 0.0);
        assert_eq!(metrics.ulcer_index, 0.0);
    }

    #[test]
    fn test_single_point_has_no_dispersion() {
        let metrics = PerformanceAnalyzer::default().calculate_metrics(&result(&[1000], vec![]));
        assert_eq!(metrics.volatility, 0.0);
        assert_eq!(metrics.skewness, 0.0);
        assert_eq!(metrics.kurtosis, 0.0);
        assert_eq!(metrics.annualized_return, 0.0);
    }

    #[test]
    fn test_calmar_is_return_over_drawdown_percent() {
        let r = result(&[1000, 1100, 990, 1200], vec![]);
        let metrics = PerformanceAnalyzer::default().calculate_metrics(&r);

        assert!(metrics.max_drawdown_pct > 0.0);
        let expected = metrics.total_return_pct / metrics.max_drawdown_pct;
        assert!((metrics.calmar_ratio - expected).abs() < 1e-9);
        // 20% return over a 10% drawdown
        assert!((metrics.calmar_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_ratios() {
        let r = result(&[1000, 1100, 990, 1200], vec![]);
        let metrics = PerformanceAnalyzer::new(AnalyzerConfig::with_periods_per_year(1.0)).calculate_metrics(&r);

        let returns = [0.1, -0.1, 1200.0 / 990.0 - 1.0];
        let m = returns.iter().sum::<f64>() / 3.0;
        let sd = (returns.iter().map(|x| (x - m).powi(2)).sum::<f64>() / 3.0).sqrt();
        assert!((metrics.volatility - sd).abs() < 1e-9);
        assert!((metrics.sharpe_ratio - m / sd).abs() < 1e-9);
        // Downside deviation uses the single negative return
        assert!((metrics.sortino_ratio - m / 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_var_cvar_are_non_negative_and_ordered() {
        let returns = [-0.05, -0.02, 0.01, 0.03, -0.04, 0.02];
        let (var, cvar) = calculate_var_cvar(&returns);
        assert!((var - 0.05).abs() < 1e-12);
        assert!(cvar >= var);

        let (var, cvar) = calculate_var_cvar(&[0.01, 0.02]);
        assert_eq!(var, 0.0);
        assert_eq!(cvar, 0.0);
    }

    #[test]
    fn test_moments_of_symmetric_returns() {
        let (skew, kurt) = calculate_moments(&[-0.01, 0.01, -0.01, 0.01]);
        assert!(skew.abs() < 1e-12);
        assert!((kurt - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_stats() {
        let stats = calculate_drawdown_stats(&curve(&[100, 90, 80, 100, 95]));
        assert_eq!(stats.max_duration, 2);
        assert_eq!(stats.periods, 3);
        // sqrt((0 + 100 + 400 + 0 + 25) / 5)
        assert!((stats.ulcer_index - 105.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_trade_statistics() {
        let trades = vec![
            trade(300, 0.03, 2),
            trade(200, 0.02, 4),
            trade(-100, -0.01, 6),
            trade(-50, -0.005, 1),
            trade(100, 0.01, 3),
        ];
        let metrics = PerformanceAnalyzer::default().calculate_metrics(&result(&[1000, 1450], trades));

        assert_eq!(metrics.total_trades, 5);
        assert_eq!(metrics.winning_trades + metrics.losing_trades, metrics.total_trades);
        assert!((metrics.win_rate - 0.6).abs() < 1e-12);
        assert!((metrics.profit_factor - 600.0 / 150.0).abs() < 1e-9);
        assert_eq!(metrics.largest_win, Decimal::new(300, 0));
        assert_eq!(metrics.largest_loss, Decimal::new(-100, 0));
        assert_eq!(metrics.max_consecutive_wins, 2);
        assert_eq!(metrics.max_consecutive_losses, 2);
        assert!((metrics.avg_holding_period_hours - 3.2).abs() < 1e-9);
        assert_eq!(metrics.min_holding_period_hours, 1.0);
        assert_eq!(metrics.max_holding_period_hours, 6.0);
        assert!((metrics.best_trade_return - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_profit_factor_without_losses_is_zero() {
        let metrics = PerformanceAnalyzer::default().calculate_metrics(&result(&[1000, 1100], vec![trade(100, 0.1, 1)]));
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.win_rate, 1.0);
    }

    #[test]
    fn test_monthly_breakdown() {
        // Jan 30, Jan 31, Feb 1, Feb 2
        let r = result(&[1000, 1100, 1210, 1100], vec![]);
        let metrics = PerformanceAnalyzer::default().calculate_metrics(&r);

        assert_eq!(metrics.monthly_returns.len(), 2);
        assert_eq!(metrics.monthly_returns[0].period, "2024-01");
        assert!((metrics.monthly_returns[0].return_pct - 0.1).abs() < 1e-12);
        assert_eq!(metrics.monthly_returns[1].start_equity, Decimal::new(1100, 0));
        assert_eq!(metrics.monthly_returns[1].end_equity, Decimal::new(1100, 0));
        assert_eq!(metrics.yearly_returns.len(), 1);
    }

    #[test]
    fn test_helpers_handle_degenerate_input() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[1.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[0.0, 0.0]), None);
        assert_eq!(finite(f64::NAN), 0.0);
        assert_eq!(finite(f64::INFINITY), 0.0);
    }
}
