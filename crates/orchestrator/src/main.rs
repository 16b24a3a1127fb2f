//! Backtest lab CLI.
//!
//! ```bash
//! # Single backtest on CSV data in ./data
//! backtest-lab backtest -s BTC-KRW --strategy momentum -p lookback=20 -p threshold=0.02
//!
//! # Grid search
//! backtest-lab optimize --strategy momentum -r lookback=5:40:5 -r threshold=0.01:0.05:0.01 --objective sharpe
//!
//! # Load a CSV export into the candle database
//! backtest-lab --source postgres import -s BTC-KRW btc_1h.csv
//!
//! # Full report on synthetic data
//! backtest-lab --source synthetic analyze --strategy momentum -r lookback=5:40:5 --walk-forward -o report.json
//! ```

use anyhow::{bail, Context, Result};
use backtest_core::{format_params, ParameterRange, ParameterVector, TimeResolution};
use backtester::{
    export, sanitize, CandleSource, CsvCandleSource, DataQuery, HistoricalDataStore, PgCandleSource,
    SyntheticCandleSource,
};
use clap::{Parser, Subcommand, ValueEnum};
use optimizer::{GeneticConfig, Objective, OptimizationConfig, SearchControl, WalkForwardConfig};
use orchestrator::{AnalysisRequest, LabConfig, Orchestrator, StrategySpec};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "backtest-lab")]
#[command(about = "Strategy backtesting, optimization and walk-forward validation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, JSON or YAML). Defaults to LAB_* environment variables.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Where candles come from.
    #[arg(long, value_enum, default_value_t = Source::Csv, global = true)]
    source: Source,

    /// Instrument symbol, overrides the configuration.
    #[arg(short, long, global = true)]
    symbol: Option<String>,

    /// Candle resolution (1m, 5m, 15m, 1h, 4h, 1d).
    #[arg(long, global = true)]
    resolution: Option<String>,

    /// Days of history ending now.
    #[arg(long, global = true)]
    days: Option<i64>,

    /// Seed for synthetic data.
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    Csv,
    Postgres,
    Synthetic,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest
    Backtest {
        #[arg(long)]
        strategy: Option<String>,

        /// Strategy parameter as name=value, repeatable
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Decimal)>,

        /// Write the trades as CSV here
        #[arg(long)]
        trades_csv: Option<PathBuf>,

        /// Write the JSON result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Search parameter ranges and re-run the best vector
    Optimize {
        #[arg(long)]
        strategy: Option<String>,

        /// Range as name=min:max:step, repeatable
        #[arg(short, long = "range", value_parser = parse_range)]
        ranges: Vec<(String, ParameterRange)>,

        #[arg(long)]
        objective: Option<String>,

        /// Use the genetic search instead of the full grid
        #[arg(long)]
        genetic: bool,

        #[arg(long)]
        generations: Option<usize>,

        #[arg(long)]
        population: Option<usize>,

        /// Stop after this many seconds, keeping finished evaluations
        #[arg(long)]
        time_budget: Option<u64>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Baseline, optimization, comparison, benchmark and walk-forward in one report
    Analyze {
        #[arg(long)]
        strategy: Option<String>,

        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Decimal)>,

        #[arg(short, long = "range", value_parser = parse_range)]
        ranges: Vec<(String, ParameterRange)>,

        /// Other registered strategies to rank alongside
        #[arg(long)]
        compare: Vec<String>,

        /// Run walk-forward validation with the configured (or default) windows
        #[arg(long)]
        walk_forward: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List registered strategies
    Strategies,

    /// Store candles from a CSV file in the selected source
    Import {
        /// CSV with a timestamp,open,high,low,close,volume header
        file: PathBuf,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, Decimal), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let value = value
        .trim()
        .parse::<Decimal>()
        .map_err(|e| format!("invalid value for {}: {}", name, e))?;
    Ok((name.trim().to_string(), value))
}

fn parse_range(raw: &str) -> std::result::Result<(String, ParameterRange), String> {
    let (name, spec) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=min:max:step, got '{}'", raw))?;
    let bounds = spec
        .split(':')
        .map(|v| v.trim().parse::<Decimal>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid range for {}: {}", name, e))?;
    match bounds.as_slice() {
        [min, max, step] => Ok((name.trim().to_string(), ParameterRange::new(*min, *max, *step))),
        _ => Err(format!("expected min:max:step for {}, got '{}'", name, spec)),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "backtest_lab=info,backtester=info,optimizer=info,orchestrator=info".into());

    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn emit<T: Serialize>(value: &T, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            export::write_json(path, value).with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", export::to_json_pretty(value)?),
    }
    Ok(())
}

async fn connect(config: &LabConfig) -> Result<sqlx::PgPool> {
    let Some(url) = config.database_url.as_deref() else {
        bail!("postgres source needs LAB_DATABASE_URL or DATABASE_URL");
    };
    PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("failed to connect to the candle database")
}

/// Parse, clean and store a CSV file under the configured symbol and resolution.
async fn import(source: Source, file: &Path, config: &LabConfig) -> Result<()> {
    let body = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let (parsed, rejected) = export::candles_from_csv(&body);
    let (candles, dropped) = sanitize(&parsed);

    let stored = match source {
        Source::Csv => {
            CsvCandleSource::new(config.data_dir.clone())
                .save(&config.symbol, config.resolution, &candles)
                .await?;
            candles.len()
        }
        Source::Postgres => {
            PgCandleSource::new(connect(config).await?)
                .insert_candles_batch(&config.symbol, &candles)
                .await?
        }
        Source::Synthetic => bail!("the synthetic source cannot store candles"),
    };

    info!(
        symbol = %config.symbol,
        resolution = %config.resolution,
        stored,
        rejected,
        dropped,
        "Import finished"
    );
    Ok(())
}

/// Search control that cancels on Ctrl-C.
fn interruptible(time_budget: Option<u64>) -> SearchControl {
    let mut control = SearchControl::new();
    if let Some(secs) = time_budget {
        control = control.with_time_budget(Duration::from_secs(secs));
    }
    let token = control.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight evaluations");
            token.cancel();
        }
    });
    control
}

fn optimization_config(
    config: &LabConfig,
    ranges: Vec<(String, ParameterRange)>,
    objective: Option<&str>,
) -> Result<OptimizationConfig> {
    let mut optimization = config.optimization.clone();
    if !ranges.is_empty() {
        optimization.parameters = ranges.into_iter().collect();
    }
    if let Some(objective) = objective {
        optimization.objective = objective.parse::<Objective>()?;
    }
    Ok(optimization)
}

async fn execute<S: CandleSource + 'static>(
    store: HistoricalDataStore<S>,
    query: DataQuery,
    config: LabConfig,
    command: Commands,
) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config);

    match command {
        Commands::Backtest {
            strategy,
            params,
            trades_csv,
            output,
        } => {
            let strategy = strategy.unwrap_or_else(|| config.strategy.clone());
            let params: ParameterVector = params.into_iter().collect();
            let candles = store.load_clean(&query).await?;
            let run = tokio::task::spawn_blocking(move || orchestrator.run_backtest(&candles, &strategy, &params))
                .await
                .context("backtest task failed")??;

            info!(
                strategy = %run.strategy,
                params = %format_params(&run.result.parameters),
                trades = run.result.total_trades,
                total_return_pct = run.result.total_return_pct(),
                sharpe = run.metrics.sharpe_ratio,
                max_drawdown_pct = run.metrics.max_drawdown_pct,
                "Backtest finished"
            );
            if let Some(path) = trades_csv {
                std::fs::write(&path, export::trades_to_csv(&run.result.trades)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            emit(&run, output.as_ref())
        }

        Commands::Optimize {
            strategy,
            ranges,
            objective,
            genetic,
            generations,
            population,
            time_budget,
            output,
        } => {
            let strategy = strategy.unwrap_or_else(|| config.strategy.clone());
            let mut optimization = optimization_config(&config, ranges, objective.as_deref())?;
            if genetic || generations.is_some() || population.is_some() {
                let mut settings = optimization.genetic.clone().unwrap_or_else(GeneticConfig::default);
                if let Some(generations) = generations {
                    settings.generations = generations;
                }
                if let Some(population) = population {
                    settings.population_size = population;
                }
                optimization.genetic = Some(settings);
            }
            if optimization.parameters.is_empty() {
                bail!("no parameter ranges given; pass --range name=min:max:step or configure optimization.parameters");
            }

            let candles = store.load_clean(&query).await?;
            let control = interruptible(time_budget);
            let run = tokio::task::spawn_blocking(move || {
                orchestrator.optimize_and_backtest(&candles, &strategy, &optimization, &control)
            })
            .await
            .context("optimization task failed")??;

            info!(
                status = ?run.status,
                evaluated = run.evaluated,
                best = %run.best_parameters.as_ref().map(format_params).unwrap_or_default(),
                overfitting = run.overfitting_score,
                robustness = run.robustness_score,
                "Optimization finished"
            );
            emit(&run, output.as_ref())
        }

        Commands::Analyze {
            strategy,
            params,
            ranges,
            compare,
            walk_forward,
            output,
        } => {
            let mut request = AnalysisRequest::from_config(&config);
            if let Some(strategy) = strategy {
                request.strategy = strategy;
            }
            request.parameters = params.into_iter().collect();
            let optimization = optimization_config(&config, ranges, None)?;
            request.optimization = (!optimization.parameters.is_empty()).then_some(optimization);
            if walk_forward && request.walk_forward.is_none() {
                request.walk_forward = Some(WalkForwardConfig::default());
            }
            request.compare = compare.iter().map(|name| StrategySpec::new(name)).collect();

            let report = orchestrator
                .full_analysis(&store, &query, request, interruptible(None))
                .await?;
            for note in &report.recommendations {
                info!(recommendation = %note);
            }
            emit(&report, output.as_ref())
        }

        Commands::Strategies => {
            for name in orchestrator.registry().names() {
                println!("{}", name);
            }
            Ok(())
        }

        Commands::Import { .. } => bail!("import runs before any data is loaded"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LabConfig::from_file(path).with_context(|| format!("failed to load {}", path.display()))?,
        None => LabConfig::from_env().context("failed to load configuration from environment")?,
    };
    if let Some(symbol) = cli.symbol {
        config.symbol = symbol;
    }
    if let Some(resolution) = &cli.resolution {
        config.resolution = resolution.parse::<TimeResolution>()?;
        config.analyzer.periods_per_year = config.resolution.periods_per_year();
    }
    if let Some(days) = cli.days {
        config.lookback_days = days;
    }
    config.validate()?;

    let query = DataQuery::last_days(&config.symbol, config.lookback_days).resolution(config.resolution);
    info!(
        symbol = %query.symbol,
        resolution = %query.resolution,
        days = config.lookback_days,
        "Starting backtest lab"
    );

    if let Commands::Import { file } = &cli.command {
        return import(cli.source, file, &config).await;
    }

    match cli.source {
        Source::Csv => {
            let store = HistoricalDataStore::new(CsvCandleSource::new(config.data_dir.clone()));
            execute(store, query, config, cli.command).await
        }
        Source::Postgres => {
            let store = HistoricalDataStore::new(PgCandleSource::new(connect(&config).await?));
            execute(store, query, config, cli.command).await
        }
        Source::Synthetic => {
            let store = HistoricalDataStore::new(SyntheticCandleSource::new(cli.seed));
            execute(store, query, config, cli.command).await
        }
    }
}
