//! Price candles and time resolutions.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time.
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Create a new candle.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A flat candle where every price equals `price`.
    pub fn flat(timestamp: DateTime<Utc>, price: Decimal, volume: Decimal) -> Self {
        Self::new(timestamp, price, price, price, price, volume)
    }

    /// Check the OHLCV invariants.
    pub fn validate(&self) -> Result<()> {
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(Error::Data(format!(
                "non-positive price at {}",
                self.timestamp
            )));
        }
        if self.high < self.low {
            return Err(Error::Data(format!(
                "high {} below low {} at {}",
                self.high, self.low, self.timestamp
            )));
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(Error::Data(format!(
                "open/close outside high/low range at {}",
                self.timestamp
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(Error::Data(format!(
                "negative volume at {}",
                self.timestamp
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// (high + low + close) / 3.
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::new(3, 0)
    }
}

/// Time resolution for candle aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeResolution {
    /// 1 minute
    Minute,
    /// 5 minutes
    Minute5,
    /// 15 minutes
    Minute15,
    /// 1 hour
    #[default]
    Hour,
    /// 4 hours
    Hour4,
    /// 1 day
    Day,
}

impl TimeResolution {
    /// Get the interval as a chrono Duration.
    pub fn to_duration(&self) -> Duration {
        match self {
            TimeResolution::Minute => Duration::minutes(1),
            TimeResolution::Minute5 => Duration::minutes(5),
            TimeResolution::Minute15 => Duration::minutes(15),
            TimeResolution::Hour => Duration::hours(1),
            TimeResolution::Hour4 => Duration::hours(4),
            TimeResolution::Day => Duration::days(1),
        }
    }

    /// Get the PostgreSQL interval string.
    pub fn to_pg_interval(&self) -> &str {
        match self {
            TimeResolution::Minute => "1 minute",
            TimeResolution::Minute5 => "5 minutes",
            TimeResolution::Minute15 => "15 minutes",
            TimeResolution::Hour => "1 hour",
            TimeResolution::Hour4 => "4 hours",
            TimeResolution::Day => "1 day",
        }
    }

    /// Short label used in file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeResolution::Minute => "1m",
            TimeResolution::Minute5 => "5m",
            TimeResolution::Minute15 => "15m",
            TimeResolution::Hour => "1h",
            TimeResolution::Hour4 => "4h",
            TimeResolution::Day => "1d",
        }
    }

    /// Bars per year for a market that trades around the clock.
    pub fn periods_per_year(&self) -> f64 {
        let per_day = Duration::days(1).num_seconds() as f64 / self.to_duration().num_seconds() as f64;
        per_day * 365.0
    }
}

impl std::fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TimeResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "minute" => Ok(Self::Minute),
            "5m" | "minute5" => Ok(Self::Minute5),
            "15m" | "minute15" => Ok(Self::Minute15),
            "1h" | "hour" => Ok(Self::Hour),
            "4h" | "hour4" => Ok(Self::Hour4),
            "1d" | "day" => Ok(Self::Day),
            _ => Err(Error::config(format!("Invalid time resolution: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_candle() {
        let candle = Candle::new(
            ts(),
            Decimal::new(100, 0),
            Decimal::new(110, 0),
            Decimal::new(95, 0),
            Decimal::new(105, 0),
            Decimal::new(1000, 0),
        );
        assert!(candle.is_valid());
        assert_eq!(candle.typical_price(), Decimal::new(310, 0) / Decimal::new(3, 0));
    }

    #[test]
    fn test_invalid_candles() {
        let non_positive = Candle::flat(ts(), Decimal::ZERO, Decimal::ONE);
        assert!(!non_positive.is_valid());

        let inverted = Candle::new(
            ts(),
            Decimal::new(100, 0),
            Decimal::new(90, 0),
            Decimal::new(95, 0),
            Decimal::new(92, 0),
            Decimal::ONE,
        );
        assert!(!inverted.is_valid());

        let negative_volume = Candle::flat(ts(), Decimal::ONE, Decimal::NEGATIVE_ONE);
        assert!(!negative_volume.is_valid());
    }

    #[test]
    fn test_time_resolution() {
        assert_eq!(TimeResolution::Minute.to_pg_interval(), "1 minute");
        assert_eq!(TimeResolution::Hour.to_duration(), Duration::hours(1));
        assert_eq!(TimeResolution::Day.periods_per_year(), 365.0);
        assert_eq!(TimeResolution::Hour.periods_per_year(), 8760.0);
        assert_eq!("4h".parse::<TimeResolution>().unwrap(), TimeResolution::Hour4);
        assert!("7m".parse::<TimeResolution>().is_err());
    }
}
