//! Signal — a trading decision emitted by a guest program.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Buy => "BUY",
            SignalKind::Sell => "SELL",
            SignalKind::Hold => "HOLD",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    /// Case-insensitive parse; anything outside BUY/SELL/HOLD is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalKind::Buy),
            "SELL" => Ok(SignalKind::Sell),
            "HOLD" => Ok(SignalKind::Hold),
            other => Err(format!("invalid signal kind: {other:?}")),
        }
    }
}

/// A trading decision emitted by a guest program.
///
/// Signals are kept in the guest's emission order; the backtest engine sorts
/// its own BUY/SELL partitions and never reorders the source list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
    pub price: f64,
    pub quantity: f64,
    pub reason: String,
    pub confidence: f64,
}

impl Signal {
    /// A signal with defaulted quantity, reason, and confidence.
    pub fn new(timestamp: DateTime<Utc>, kind: SignalKind, price: f64) -> Self {
        Self {
            timestamp,
            kind,
            price,
            quantity: 1.0,
            reason: String::new(),
            confidence: 1.0,
        }
    }
}
