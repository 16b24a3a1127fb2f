//! Historical candle storage, caching and data-quality checks.

use async_trait::async_trait;
use backtest_core::{Candle, Error, Result, TimeResolution};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::export;

/// Query parameters for fetching historical candles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataQuery {
    /// Instrument symbol.
    pub symbol: String,
    /// Start time (inclusive).
    pub start_time: DateTime<Utc>,
    /// End time (inclusive).
    pub end_time: DateTime<Utc>,
    /// Candle resolution.
    pub resolution: TimeResolution,
    /// Maximum number of candles.
    pub limit: Option<usize>,
}

impl DataQuery {
    /// Create a query for the last N days ending now.
    pub fn last_days(symbol: &str, days: i64) -> Self {
        let end = Utc::now();
        Self::range(symbol, end - Duration::days(days), end)
    }

    /// Create a query for a specific time range.
    pub fn range(symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            start_time: start,
            end_time: end,
            resolution: TimeResolution::Hour,
            limit: None,
        }
    }

    /// Set time resolution.
    pub fn resolution(mut self, resolution: TimeResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set maximum records.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `timestamp` falls inside the query range.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start_time && timestamp <= self.end_time
    }
}

/// Candles returned by a source, with the rows it had to skip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleBatch {
    pub candles: Vec<Candle>,
    /// Stored rows that could not be parsed into candles.
    pub rejected: usize,
}

impl From<Vec<Candle>> for CandleBatch {
    fn from(candles: Vec<Candle>) -> Self {
        Self { candles, rejected: 0 }
    }
}

/// A source of historical candles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Fetch candles for the query, in any order.
    async fn fetch(&self, query: &DataQuery) -> Result<CandleBatch>;
}

/// Candles stored as CSV files named `<symbol>_<resolution>.csv`.
pub struct CsvCandleSource {
    dir: PathBuf,
}

impl CsvCandleSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file holding `symbol` at `resolution`.
    pub fn file_path(&self, symbol: &str, resolution: TimeResolution) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", symbol.replace('/', "-"), resolution.as_str()))
    }

    /// Write candles to the file for `symbol` at `resolution`.
    pub async fn save(&self, symbol: &str, resolution: TimeResolution, candles: &[Candle]) -> Result<PathBuf> {
        let path = self.file_path(symbol, resolution);
        let body = export::candles_to_csv(candles)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, body).await?;
        info!(path = %path.display(), count = candles.len(), "Saved candles");
        Ok(path)
    }
}

#[async_trait]
impl CandleSource for CsvCandleSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch(&self, query: &DataQuery) -> Result<CandleBatch> {
        let path = self.file_path(&query.symbol, query.resolution);
        let body = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::data_source(format!("cannot read {}: {}", path.display(), e))
        })?;

        let (parsed, rejected) = export::candles_from_csv(&body);
        if rejected > 0 {
            warn!(path = %path.display(), rejected, "Skipped unparseable CSV rows");
        }
        let mut candles: Vec<Candle> = parsed
            .into_iter()
            .filter(|c| query.contains(c.timestamp))
            .collect();
        candles.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if let Some(limit) = query.limit {
            candles.truncate(limit);
        }

        debug!(path = %path.display(), count = candles.len(), "Read candles from CSV");
        Ok(CandleBatch { candles, rejected })
    }
}

/// Candles stored in a TimescaleDB hypertable and aggregated on read.
pub struct PgCandleSource {
    pool: PgPool,
}

impl PgCandleSource {
    /// Create a new database-backed source.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or update a candle.
    pub async fn insert_candle(&self, symbol: &str, candle: &Candle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO candles (symbol, timestamp, open, high, low, close, volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (symbol, timestamp) DO UPDATE SET
                open = EXCLUDED.open,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                close = EXCLUDED.close,
                volume = EXCLUDED.volume
            "#,
        )
        .bind(symbol)
        .bind(candle.timestamp)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert multiple candles, skipping rows that fail.
    pub async fn insert_candles_batch(&self, symbol: &str, candles: &[Candle]) -> Result<usize> {
        let mut inserted = 0;
        for candle in candles {
            match self.insert_candle(symbol, candle).await {
                Ok(()) => inserted += 1,
                Err(e) => warn!(symbol, timestamp = %candle.timestamp, error = %e, "Failed to insert candle"),
            }
        }

        info!(symbol, count = inserted, "Inserted candles");
        Ok(inserted)
    }
}

#[async_trait]
impl CandleSource for PgCandleSource {
    fn name(&self) -> &str {
        "timescaledb"
    }

    async fn fetch(&self, query: &DataQuery) -> Result<CandleBatch> {
        let sql = format!(
            r#"
            SELECT
                time_bucket('{}', timestamp) AS bucket,
                first(open, timestamp) AS open,
                max(high) AS high,
                min(low) AS low,
                last(close, timestamp) AS close,
                sum(volume) AS volume
            FROM candles
            WHERE symbol = $1
              AND timestamp >= $2 AND timestamp <= $3
            GROUP BY bucket
            ORDER BY bucket
            {}
            "#,
            query.resolution.to_pg_interval(),
            query.limit.map(|l| format!("LIMIT {}", l)).unwrap_or_default()
        );

        let rows = sqlx::query(&sql)
            .bind(&query.symbol)
            .bind(query.start_time)
            .bind(query.end_time)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::data_source(format!("candle query failed: {}", e)))?;

        let candles: Vec<Candle> = rows
            .iter()
            .map(|row| {
                use sqlx::Row;
                Candle {
                    timestamp: row.get("bucket"),
                    open: row.get("open"),
                    high: row.get("high"),
                    low: row.get("low"),
                    close: row.get("close"),
                    volume: row.get("volume"),
                }
            })
            .collect();

        debug!(symbol = %query.symbol, count = candles.len(), "Fetched candles");
        Ok(candles.into())
    }
}

/// Seeded random-walk candles for demos and tests.
#[derive(Debug, Clone)]
pub struct SyntheticCandleSource {
    pub seed: u64,
    pub start_price: Decimal,
    /// Per-bar return amplitude, e.g. 0.01 for ±1%.
    pub volatility: f64,
    /// Per-bar drift added to every return.
    pub drift: f64,
}

impl SyntheticCandleSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start_price: Decimal::new(100, 0),
            volatility: 0.01,
            drift: 0.0,
        }
    }

    pub fn with_start_price(mut self, price: Decimal) -> Self {
        self.start_price = price;
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility.clamp(0.0, 0.5);
        self
    }

    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = drift;
        self
    }

    /// Generate candles covering the query range.
    pub fn generate(&self, query: &DataQuery) -> Vec<Candle> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let step = query.resolution.to_duration();
        let mut candles = Vec::new();
        let mut price = self.start_price;
        let mut timestamp = query.start_time;

        while timestamp <= query.end_time {
            if query.limit.is_some_and(|limit| candles.len() >= limit) {
                break;
            }
            let ret = self.drift + rng.gen_range(-1.0..=1.0) * self.volatility;
            let wick = rng.gen_range(0.0..=1.0) * self.volatility / 2.0;
            let open = price;
            let close = scale(open, 1.0 + ret);
            let high = scale(open.max(close), 1.0 + wick);
            let low = scale(open.min(close), 1.0 - wick);
            let volume = Decimal::from(rng.gen_range(100u32..1000u32));

            candles.push(Candle::new(timestamp, open, high, low, close, volume));
            price = close;
            timestamp += step;
        }

        candles
    }
}

fn scale(value: Decimal, factor: f64) -> Decimal {
    Decimal::from_f64(factor)
        .map(|f| (value * f).round_dp(8))
        .unwrap_or(value)
}

#[async_trait]
impl CandleSource for SyntheticCandleSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn fetch(&self, query: &DataQuery) -> Result<CandleBatch> {
        Ok(self.generate(query).into())
    }
}

/// A run of missing candles between two present ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Timestamp of the candle before the gap.
    pub after: DateTime<Utc>,
    /// Timestamp of the candle after the gap.
    pub before: DateTime<Utc>,
    /// Number of missing intervals.
    pub missing: usize,
}

/// Data-quality summary for a candle series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub total: usize,
    /// Candles expected between the first and last timestamp.
    pub expected: usize,
    pub missing: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub out_of_order: usize,
    pub gaps: Vec<Gap>,
    /// Share of expected candles present, in [0, 1].
    pub completeness: f64,
    /// Overall score in [0, 1].
    pub score: f64,
}

impl DataQualityReport {
    /// Fold in rows that never became candles, counting them as invalid.
    pub fn with_rejected_rows(mut self, rejected: usize) -> Self {
        if rejected == 0 {
            return self;
        }
        let usable = self
            .total
            .saturating_sub(self.invalid + self.duplicates + self.out_of_order);
        self.total += rejected;
        self.invalid += rejected;
        self.score = self.completeness * usable as f64 / self.total as f64;
        self
    }
}

/// Score a series for gaps, duplicates, ordering and malformed rows.
pub fn assess_quality(candles: &[Candle], resolution: TimeResolution) -> DataQualityReport {
    let step = resolution.to_duration().num_seconds().max(1);
    let invalid = candles.iter().filter(|c| !c.is_valid()).count();

    let mut duplicates = 0;
    let mut out_of_order = 0;
    let mut gaps = Vec::new();
    let mut last: Option<DateTime<Utc>> = None;
    let mut first: Option<DateTime<Utc>> = None;

    for candle in candles.iter().filter(|c| c.is_valid()) {
        first.get_or_insert(candle.timestamp);
        match last {
            Some(prev) if candle.timestamp == prev => {
                duplicates += 1;
                continue;
            }
            Some(prev) if candle.timestamp < prev => {
                out_of_order += 1;
                continue;
            }
            Some(prev) => {
                let intervals = (candle.timestamp - prev).num_seconds() / step;
                if intervals > 1 {
                    gaps.push(Gap {
                        after: prev,
                        before: candle.timestamp,
                        missing: (intervals - 1) as usize,
                    });
                }
            }
            None => {}
        }
        last = Some(candle.timestamp);
    }

    let missing: usize = gaps.iter().map(|g| g.missing).sum();
    let usable = candles.len() - invalid - duplicates - out_of_order;
    let expected = match (first, last) {
        (Some(f), Some(l)) => ((l - f).num_seconds() / step) as usize + 1,
        _ => 0,
    };

    let completeness = if expected > 0 {
        (usable as f64 / expected as f64).min(1.0)
    } else {
        0.0
    };
    let valid_ratio = if candles.is_empty() {
        0.0
    } else {
        usable as f64 / candles.len() as f64
    };

    DataQualityReport {
        total: candles.len(),
        expected,
        missing,
        duplicates,
        invalid,
        out_of_order,
        gaps,
        completeness,
        score: completeness * valid_ratio,
    }
}

/// Drop malformed rows, sort by time and remove duplicate timestamps.
///
/// Returns the clean series and the number of dropped rows.
pub fn sanitize(candles: &[Candle]) -> (Vec<Candle>, usize) {
    let mut clean: Vec<Candle> = candles.iter().filter(|c| c.is_valid()).cloned().collect();
    clean.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    clean.dedup_by(|b, a| a.timestamp == b.timestamp);
    let dropped = candles.len() - clean.len();
    (clean, dropped)
}

/// Fill missing intervals of a sorted series with interpolated flat candles.
///
/// Inserted candles carry the close linearly interpolated between the
/// neighbouring closes and zero volume.
pub fn interpolate_gaps(candles: &[Candle], resolution: TimeResolution) -> Vec<Candle> {
    let step_secs = resolution.to_duration().num_seconds().max(1);
    let mut filled = Vec::with_capacity(candles.len());

    for (i, candle) in candles.iter().enumerate() {
        if let Some(prev) = i.checked_sub(1).map(|j| &candles[j]) {
            let intervals = (candle.timestamp - prev.timestamp).num_seconds() / step_secs;
            let span = Decimal::from(intervals.max(1));
            for k in 1..intervals {
                let fraction = Decimal::from(k) / span;
                let price = prev.close + (candle.close - prev.close) * fraction;
                filled.push(Candle::flat(
                    prev.timestamp + Duration::seconds(step_secs * k),
                    price.round_dp(8),
                    Decimal::ZERO,
                ));
            }
        }
        filled.push(candle.clone());
    }

    filled
}

/// Historical data store with an in-memory cache in front of a source.
///
/// Loads complete before returning, so simulation never interleaves with I/O.
pub struct HistoricalDataStore<S: CandleSource> {
    source: S,
    cache: DashMap<DataQuery, (Arc<Vec<Candle>>, usize)>,
}

impl<S: CandleSource> HistoricalDataStore<S> {
    /// Create a new historical data store.
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    /// Load candles for the query, sorted by time. Cached per query.
    pub async fn load(&self, query: &DataQuery) -> Result<Arc<Vec<Candle>>> {
        Ok(self.load_batch(query).await?.0)
    }

    /// Load candles and score their quality.
    ///
    /// Rows the source could not parse count as invalid candles.
    pub async fn load_with_quality(&self, query: &DataQuery) -> Result<(Arc<Vec<Candle>>, DataQualityReport)> {
        let (candles, rejected) = self.load_batch(query).await?;
        let report = assess_quality(&candles, query.resolution).with_rejected_rows(rejected);
        if report.missing > 0 || report.invalid > 0 {
            warn!(
                symbol = %query.symbol,
                missing = report.missing,
                invalid = report.invalid,
                score = report.score,
                "Historical data has quality issues"
            );
        }
        Ok((candles, report))
    }

    /// Load, sanitize and gap-fill candles ready for simulation.
    pub async fn load_clean(&self, query: &DataQuery) -> Result<Vec<Candle>> {
        let candles = self.load(query).await?;
        let (clean, dropped) = sanitize(&candles);
        if dropped > 0 {
            debug!(symbol = %query.symbol, dropped, "Dropped malformed or duplicate candles");
        }
        Ok(interpolate_gaps(&clean, query.resolution))
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.len()
    }

    async fn load_batch(&self, query: &DataQuery) -> Result<(Arc<Vec<Candle>>, usize)> {
        if let Some(hit) = self.cache.get(query) {
            debug!(symbol = %query.symbol, "Candle cache hit");
            let (candles, rejected) = hit.value();
            return Ok((Arc::clone(candles), *rejected));
        }

        let CandleBatch { mut candles, rejected } = self.source.fetch(query).await.map_err(|e| {
            if e.is_data_source() {
                e
            } else {
                Error::data_source(format!("{} source failed: {}", self.source.name(), e))
            }
        })?;
        candles.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        info!(
            source = self.source.name(),
            symbol = %query.symbol,
            resolution = %query.resolution,
            count = candles.len(),
            rejected,
            "Loaded historical candles"
        );

        let candles = Arc::new(candles);
        self.cache.insert(query.clone(), (Arc::clone(&candles), rejected));
        Ok((candles, rejected))
    }
}
