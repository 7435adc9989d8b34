//! Trade — a matched BUY→SELL pair with realized P&L.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed round trip: a BUY matched with a strictly later SELL.
///
/// Immutable once computed. `capital_before`/`capital_after` record the
/// compounding capital track, so `capital_after == capital_before + pnl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub buy_timestamp: DateTime<Utc>,
    pub sell_timestamp: DateTime<Utc>,
    pub buy_price: f64,
    pub sell_price: f64,
    pub quantity: f64,
    pub invested_amount: f64,
    pub exit_amount: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub win: bool,
    pub buy_reason: String,
    pub sell_reason: String,
    pub capital_before: f64,
    pub capital_after: f64,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.win
    }
}

/// An unmatched BUY still open at the end of the signal stream.
///
/// Unrealized P&L is marked against the last bar's close, or against the
/// entry price itself when no bars were supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_timestamp: DateTime<Utc>,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_percent: f64,
    pub reason: String,
}
