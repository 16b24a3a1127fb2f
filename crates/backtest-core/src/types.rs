//! Core domain types shared by the engine, analyzer and optimizers.

pub mod candle;
pub mod params;
pub mod position;
pub mod signal;

pub use candle::*;
pub use params::*;
pub use position::*;
pub use signal::*;
