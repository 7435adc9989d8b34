//! Performance report types produced by the backtest engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stratbox_core::domain::{OpenPosition, Trade};

/// What an equity-curve point marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquityPointKind {
    Initial,
    Buy,
    Sell,
    Final,
}

/// One point on the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub portfolio_value: f64,
    pub kind: EquityPointKind,
}

/// Passive baseline: buy at the first bar's close, hold to the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyAndHold {
    pub shares: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub return_percent: f64,
}

/// Full result of one backtest. Pure data, serializes to JSON as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub total_return_percent: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub profit_factor: f64,
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub trades: Vec<Trade>,
    pub open_position: Option<OpenPosition>,
    pub equity_curve: Vec<EquityPoint>,
    pub buy_and_hold: Option<BuyAndHold>,
    /// total_return_percent minus the buy-and-hold return (0 baseline when
    /// no bars were supplied).
    pub outperformance: f64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Human-readable span of the tested bars, e.g. "2 years, 3 months".
    pub test_period: String,
    pub last_tested_at: DateTime<Utc>,
}

/// Format the span between two timestamps the way the report presents it:
/// days below a month, otherwise years and months (30-day months, 365-day
/// years — presentation only, nothing downstream computes with this).
pub fn format_test_period(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let days = (end - start).num_days().max(0);
    if days < 30 {
        return format!("{days} day{}", plural(days));
    }
    let years = days / 365;
    let months = (days % 365) / 30;
    match (years, months) {
        (0, m) => format!("{m} month{}", plural(m)),
        (y, 0) => format!("{y} year{}", plural(y)),
        (y, m) => format!("{y} year{}, {m} month{}", plural(y), plural(m)),
    }
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
