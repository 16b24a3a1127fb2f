//! Buy-and-hold reference computed straight from candle closes.

use backtest_core::Candle;
use backtester::BacktestResult;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub start_price: Decimal,
    pub end_price: Decimal,
    pub strategy_return: f64,
    /// `end / start - 1` over the period.
    pub benchmark_return: f64,
    pub excess_return: f64,
    pub strategy_max_drawdown: f64,
    /// Largest peak-to-trough fall of the close series.
    pub benchmark_max_drawdown: f64,
    pub outperformed: bool,
}

/// Return from the first to the last close, 0 for fewer than two candles.
pub fn buy_and_hold_return(candles: &[Candle]) -> f64 {
    let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
        return 0.0;
    };
    if candles.len() < 2 || first.close <= Decimal::ZERO {
        return 0.0;
    }
    ((last.close - first.close) / first.close).to_f64().unwrap_or(0.0)
}

/// Max drawdown of the close series as a fraction of the running peak.
pub fn buy_and_hold_drawdown(candles: &[Candle]) -> f64 {
    let mut peak = Decimal::ZERO;
    let mut max_drawdown = 0.0;
    for candle in candles {
        if candle.close > peak {
            peak = candle.close;
        }
        if peak > Decimal::ZERO {
            let drawdown = ((peak - candle.close) / peak).to_f64().unwrap_or(0.0);
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }
    max_drawdown
}

/// Compare a backtest against holding the instrument over the same candles.
pub fn benchmark(candles: &[Candle], result: &BacktestResult) -> BenchmarkReport {
    let benchmark_return = buy_and_hold_return(candles);
    let excess_return = result.total_return - benchmark_return;
    BenchmarkReport {
        start_price: candles.first().map_or(Decimal::ZERO, |c| c.close),
        end_price: candles.last().map_or(Decimal::ZERO, |c| c.close),
        strategy_return: result.total_return,
        benchmark_return,
        excess_return,
        strategy_max_drawdown: result.max_drawdown,
        benchmark_max_drawdown: buy_and_hold_drawdown(candles),
        outperformed: excess_return > 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[i64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle::flat(start + Duration::days(i as i64), Decimal::new(*c, 0), Decimal::ONE))
            .collect()
    }

    #[test]
    fn test_buy_and_hold_return() {
        assert!((buy_and_hold_return(&series(&[100, 90, 120])) - 0.2).abs() < 1e-12);
        assert_eq!(buy_and_hold_return(&series(&[100])), 0.0);
        assert_eq!(buy_and_hold_return(&[]), 0.0);
    }

    #[test]
    fn test_buy_and_hold_drawdown() {
        // Peak 120, trough 90
        let dd = buy_and_hold_drawdown(&series(&[100, 120, 90, 130]));
        assert!((dd - 0.25).abs() < 1e-12);
        assert_eq!(buy_and_hold_drawdown(&series(&[1, 2, 3])), 0.0);
    }
}
