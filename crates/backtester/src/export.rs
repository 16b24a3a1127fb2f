//! JSON and CSV export of results and candle series.

use backtest_core::{Candle, Error, Result, Trade};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

pub const CANDLE_HEADER: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

pub const TRADE_HEADER: [&str; 9] = [
    "id",
    "timestamp",
    "side",
    "price",
    "amount",
    "profit",
    "profitPercent",
    "holdingPeriod",
    "exitReason",
];

/// Serialize any report as pretty-printed JSON.
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Write a report as pretty-printed JSON.
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    std::fs::write(path, to_json_pretty(value)?)?;
    Ok(())
}

/// Render candles as CSV with RFC 3339 timestamps.
pub fn candles_to_csv(candles: &[Candle]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CANDLE_HEADER)?;
    for candle in candles {
        writer.write_record([
            candle.timestamp.to_rfc3339(),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
        ])?;
    }
    finish(writer)
}

/// Parse candles from CSV.
///
/// Timestamps may be RFC 3339 or epoch milliseconds. Rows that cannot be
/// parsed are skipped and logged; the second value counts them.
pub fn candles_from_csv(body: &str) -> (Vec<Candle>, usize) {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());
    let mut candles = Vec::new();
    let mut rejected = 0;

    for (line, record) in reader.records().enumerate() {
        let row = line + 2;
        match record.map_err(Error::from).and_then(|record| parse_candle(&record, row)) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                rejected += 1;
                warn!(row, error = %e, "Skipping unparseable candle row");
            }
        }
    }

    (candles, rejected)
}

fn parse_candle(record: &csv::StringRecord, row: usize) -> Result<Candle> {
    let field = |i: usize| record.get(i).unwrap_or_default();
    Ok(Candle {
        timestamp: parse_timestamp(field(0))
            .ok_or_else(|| Error::Data(format!("row {}: bad timestamp '{}'", row, field(0))))?,
        open: parse_decimal(field(1), row)?,
        high: parse_decimal(field(2), row)?,
        low: parse_decimal(field(3), row)?,
        close: parse_decimal(field(4), row)?,
        volume: parse_decimal(field(5), row)?,
    })
}

/// Render trades as CSV.
///
/// `timestamp` and `price` refer to the exit; `holdingPeriod` is in milliseconds.
pub fn trades_to_csv(trades: &[Trade]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(TRADE_HEADER)?;
    for trade in trades {
        writer.write_record([
            trade.id.to_string(),
            trade.exit_timestamp.to_rfc3339(),
            trade.side.as_str().to_string(),
            trade.exit_price.to_string(),
            trade.amount.to_string(),
            trade.pnl.to_string(),
            format!("{:.4}", trade.return_pct * 100.0),
            trade.holding_period_ms.to_string(),
            trade.exit_reason.to_string(),
        ])?;
    }
    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| Error::Data(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn parse_decimal(raw: &str, row: usize) -> Result<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| Error::Data(format!("row {}: bad number '{}'", row, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtest_core::{ExitReason, PositionId, PositionSide};
    use chrono::Duration;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_candle_csv_header_and_parse() {
        let candles = vec![Candle::new(
            ts(),
            Decimal::new(100, 0),
            Decimal::new(110, 0),
            Decimal::new(95, 0),
            Decimal::new(1055, 1),
            Decimal::new(12, 0),
        )];
        let body = candles_to_csv(&candles).unwrap();
        assert!(body.starts_with("timestamp,open,high,low,close,volume\n"));
        assert_eq!(candles_from_csv(&body), (candles, 0));
    }

    #[test]
    fn test_candles_accept_epoch_millis() {
        let body = "timestamp,open,high,low,close,volume\n1704067200000,1,2,0.5,1.5,10\n";
        let (candles, rejected) = candles_from_csv(body);
        assert_eq!(rejected, 0);
        assert_eq!(candles[0].timestamp, ts());
        assert_eq!(candles[0].low, Decimal::new(5, 1));
    }

    #[test]
    fn test_bad_rows_are_skipped_and_counted() {
        let body = "timestamp,open,high,low,close,volume\n\
                    2024-01-01T00:00:00Z,1,2,0.5,1.5,10\n\
                    2024-01-01T01:00:00Z,1.5,2,1,1.8,12\n\
                    2024-01-01T02:00:00Z,abc,2,0.5,1.5,10\n\
                    yesterday,1,2,0.5,1.5,10\n\
                    2024-01-01T04:00:00Z,1,2\n\
                    2024-01-01T05:00:00Z,1.8,2.2,1.7,2,9\n";
        let (candles, rejected) = candles_from_csv(body);
        assert_eq!(rejected, 3);
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[2].close, Decimal::new(2, 0));
        assert_eq!(parse_decimal("abc", 4).unwrap_err().to_string(), "Invalid market data: row 4: bad number 'abc'");
    }

    #[test]
    fn test_trade_csv() {
        let trade = Trade {
            id: 7,
            position_id: PositionId(3),
            side: PositionSide::Long,
            entry_price: Decimal::new(100, 0),
            exit_price: Decimal::new(110, 0),
            amount: Decimal::ONE,
            entry_timestamp: ts(),
            exit_timestamp: ts() + Duration::hours(1),
            commission: Decimal::ZERO,
            slippage: Decimal::ZERO,
            pnl: Decimal::TEN,
            return_pct: 0.1,
            holding_period_ms: 3_600_000,
            exit_reason: ExitReason::TakeProfit,
        };
        let body = trades_to_csv(&[trade]).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next(),
            Some("id,timestamp,side,price,amount,profit,profitPercent,holdingPeriod,exitReason")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("7,2024-01-01T01:00:00+00:00,long,110,1,10,10.0000,3600000,take profit"));
    }

    #[test]
    fn test_json_is_pretty() {
        let json = to_json_pretty(&vec![1, 2]).unwrap();
        assert!(json.contains('\n'));
    }
}
