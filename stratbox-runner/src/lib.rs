//! Stratbox Runner — backtest engine, performance reporting, and the
//! service facade that stitches the admission gate, sandbox, and backtest
//! together behind one explicit, injectable surface.

pub mod backtest;
pub mod config;
pub mod data_loader;
pub mod metrics;
pub mod report;
pub mod service;

pub use backtest::BacktestCalculator;
pub use config::ServiceConfig;
pub use report::{BuyAndHold, EquityPoint, EquityPointKind, PerformanceReport};
pub use service::{
    ExecutionService, HealthReport, ServiceError, StrategyRunOutcome, StrategyRunRequest,
};
