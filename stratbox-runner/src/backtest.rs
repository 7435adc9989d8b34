//! Backtest engine — turns a signal stream plus bar history into a
//! performance report.
//!
//! Pure computation: no I/O, no clocks except the `last_tested_at` stamp,
//! and it cannot fail — empty inputs degrade to a well-defined empty report.
//!
//! Matching is greedy and chronological: BUYs and SELLs are paired with two
//! cursors, a SELL may only close the earliest unmatched BUY and only if it
//! is strictly later. Sizing is compounding, so trades must be processed in
//! strict order — this loop is deliberately sequential.

use chrono::Utc;

use stratbox_core::domain::{Bar, OpenPosition, Signal, SignalKind, Trade};

use crate::metrics;
use crate::report::{
    format_test_period, BuyAndHold, EquityPoint, EquityPointKind, PerformanceReport,
};

pub struct BacktestCalculator {
    initial_capital: f64,
}

impl BacktestCalculator {
    pub fn new(initial_capital: f64) -> Self {
        Self { initial_capital }
    }

    /// Run the full pipeline: match, size, aggregate, report.
    pub fn calculate(&self, signals: &[Signal], bars: &[Bar]) -> PerformanceReport {
        let (buys, sells) = partition_signals(signals);
        let (trades, open_buy) = match_and_size(&buys, &sells, self.initial_capital);

        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let final_capital = self.initial_capital + total_pnl;
        let total_return_percent = if self.initial_capital > 0.0 {
            total_pnl / self.initial_capital * 100.0
        } else {
            0.0
        };

        let winning_trades = trades.iter().filter(|t| t.win).count();
        let losing_trades = trades.len() - winning_trades;

        // Equity path for drawdown: initial capital, then the capital track
        // after each trade in order.
        let equity_path: Vec<f64> = std::iter::once(self.initial_capital)
            .chain(trades.iter().map(|t| t.capital_after))
            .collect();
        let pnl_percents: Vec<f64> = trades.iter().map(|t| t.pnl_percent).collect();

        let open_position = open_buy.map(|buy| open_position_from(buy, bars));
        let equity_curve = build_equity_curve(&trades, bars, self.initial_capital, final_capital);
        let buy_and_hold = buy_and_hold_baseline(bars, self.initial_capital);
        let baseline_return = buy_and_hold.as_ref().map_or(0.0, |b| b.return_percent);

        let start_date = bars.first().map(|b| b.timestamp);
        let end_date = bars.last().map(|b| b.timestamp);
        let test_period = match (start_date, end_date) {
            (Some(start), Some(end)) => format_test_period(start, end),
            _ => String::new(),
        };

        PerformanceReport {
            total_trades: trades.len(),
            winning_trades,
            losing_trades,
            win_rate: metrics::win_rate(&trades),
            total_pnl,
            total_return_percent,
            average_win: metrics::average_win(&trades),
            average_loss: metrics::average_loss(&trades),
            profit_factor: metrics::profit_factor(&trades),
            max_drawdown_percent: metrics::max_drawdown_percent(&equity_path),
            sharpe_ratio: metrics::sharpe_ratio(&pnl_percents),
            initial_capital: self.initial_capital,
            final_capital,
            trades,
            open_position,
            equity_curve,
            buy_and_hold,
            outperformance: total_return_percent - baseline_return,
            start_date,
            end_date,
            test_period,
            last_tested_at: Utc::now(),
        }
    }
}

/// Split into BUY and SELL subsequences, each stably sorted by timestamp so
/// emission order breaks ties. HOLDs carry no position change and are
/// dropped.
fn partition_signals(signals: &[Signal]) -> (Vec<Signal>, Vec<Signal>) {
    let mut buys: Vec<Signal> = signals
        .iter()
        .filter(|s| s.kind == SignalKind::Buy)
        .cloned()
        .collect();
    let mut sells: Vec<Signal> = signals
        .iter()
        .filter(|s| s.kind == SignalKind::Sell)
        .cloned()
        .collect();
    buys.sort_by_key(|s| s.timestamp);
    sells.sort_by_key(|s| s.timestamp);
    (buys, sells)
}

/// Greedy two-cursor matching with compounding position sizing.
///
/// Returns the chronological trade list plus the last unmatched BUY, if the
/// stream ends with more BUYs than SELLs.
fn match_and_size(
    buys: &[Signal],
    sells: &[Signal],
    initial_capital: f64,
) -> (Vec<Trade>, Option<Signal>) {
    let mut trades = Vec::new();
    let mut available = initial_capital;
    let mut b = 0;
    let mut s = 0;

    while b < buys.len() && s < sells.len() {
        let buy = &buys[b];
        let sell = &sells[s];
        // A SELL at or before the BUY cannot close it; skip the SELL.
        if sell.timestamp <= buy.timestamp {
            s += 1;
            continue;
        }

        let quantity = if buy.price > 0.0 {
            (available / buy.price).floor().max(1.0)
        } else {
            buy.quantity
        };
        let invested_amount = quantity * buy.price;
        let exit_amount = quantity * sell.price;
        let pnl = exit_amount - invested_amount;
        let pnl_percent = if invested_amount > 0.0 {
            pnl / invested_amount * 100.0
        } else {
            0.0
        };

        let capital_before = available;
        available += pnl;

        trades.push(Trade {
            buy_timestamp: buy.timestamp,
            sell_timestamp: sell.timestamp,
            buy_price: buy.price,
            sell_price: sell.price,
            quantity,
            invested_amount,
            exit_amount,
            pnl,
            pnl_percent,
            win: pnl > 0.0,
            buy_reason: buy.reason.clone(),
            sell_reason: sell.reason.clone(),
            capital_before,
            capital_after: available,
        });
        b += 1;
        s += 1;
    }

    let open_buy = if buys.len() > sells.len() {
        buys.last().cloned()
    } else {
        None
    };
    (trades, open_buy)
}

/// Mark an unmatched BUY against the last close (its own price with no
/// bars). Unrealized P&L is sized by the signal's own quantity; the open leg
/// never went through compounding.
fn open_position_from(buy: Signal, bars: &[Bar]) -> OpenPosition {
    let current_price = bars.last().map_or(buy.price, |b| b.close);
    let unrealized_pnl = (current_price - buy.price) * buy.quantity;
    let unrealized_pnl_percent = if buy.price > 0.0 {
        (current_price - buy.price) / buy.price * 100.0
    } else {
        0.0
    };
    OpenPosition {
        entry_timestamp: buy.timestamp,
        entry_price: buy.price,
        current_price,
        unrealized_pnl,
        unrealized_pnl_percent,
        reason: buy.reason,
    }
}

/// Initial point at the first bar, buy/sell points per trade, trailing final
/// point at the last bar when its timestamp is distinct. No bars, no curve.
fn build_equity_curve(
    trades: &[Trade],
    bars: &[Bar],
    initial_capital: f64,
    final_capital: f64,
) -> Vec<EquityPoint> {
    let Some(first) = bars.first() else {
        return Vec::new();
    };

    let mut curve = vec![EquityPoint {
        timestamp: first.timestamp,
        portfolio_value: initial_capital,
        kind: EquityPointKind::Initial,
    }];
    for trade in trades {
        curve.push(EquityPoint {
            timestamp: trade.buy_timestamp,
            portfolio_value: trade.capital_before,
            kind: EquityPointKind::Buy,
        });
        curve.push(EquityPoint {
            timestamp: trade.sell_timestamp,
            portfolio_value: trade.capital_after,
            kind: EquityPointKind::Sell,
        });
    }

    let last = bars.last().map(|b| b.timestamp).unwrap_or(first.timestamp);
    if curve.last().map(|p| p.timestamp) != Some(last) {
        curve.push(EquityPoint {
            timestamp: last,
            portfolio_value: final_capital,
            kind: EquityPointKind::Final,
        });
    }
    curve
}

/// Passive baseline over the same bars. None without bars or with a
/// non-positive first close.
fn buy_and_hold_baseline(bars: &[Bar], initial_capital: f64) -> Option<BuyAndHold> {
    let first = bars.first()?;
    let last = bars.last()?;
    if first.close <= 0.0 {
        return None;
    }
    let shares = initial_capital / first.close;
    let pnl = shares * (last.close - first.close);
    Some(BuyAndHold {
        shares,
        entry_price: first.close,
        exit_price: last.close,
        pnl,
        return_percent: (last.close - first.close) / first.close * 100.0,
    })
}
