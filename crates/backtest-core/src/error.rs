//! Error types for the backtesting workspace.
//!
//! Only data-source failures are meant to reach callers as hard errors.
//! Malformed candles, rejected trades and invalid parameter combinations are
//! recovered where they happen and surface as counters or status values.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid market data: {0}")]
    Data(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Optimization error: {0}")]
    Optimization(String),

    #[error("Data source error: {message}")]
    DataSource { message: String },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn data_source(message: impl Into<String>) -> Self {
        Self::DataSource {
            message: message.into(),
        }
    }

    /// Whether the error came from the data layer and must abort the run.
    pub fn is_data_source(&self) -> bool {
        matches!(
            self,
            Error::DataSource { .. } | Error::Database(_) | Error::Io(_) | Error::Csv(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
