//! Domain types: bars, signals, trades.

pub mod bar;
pub mod signal;
pub mod trade;

pub use bar::Bar;
pub use signal::{Signal, SignalKind};
pub use trade::{OpenPosition, Trade};
