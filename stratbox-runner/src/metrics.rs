//! Performance metrics — pure functions over trade lists and equity paths.
//!
//! Every metric is a pure function: slice in, scalar out. No dependencies on
//! the sandbox or the service; the backtest engine composes these.

use stratbox_core::domain::Trade;

/// Winning trades as a percentage of all trades. 0 with no trades.
pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.win).count();
    winners as f64 / trades.len() as f64 * 100.0
}

/// Mean P&L of winning trades. 0 with no winners.
pub fn average_win(trades: &[Trade]) -> f64 {
    mean_of(trades.iter().filter(|t| t.win).map(|t| t.pnl))
}

/// Mean P&L of losing trades (a negative number). 0 with no losers.
pub fn average_loss(trades: &[Trade]) -> f64 {
    mean_of(trades.iter().filter(|t| !t.win).map(|t| t.pnl))
}

/// Gross profit / gross loss.
///
/// With zero gross loss the factor equals gross profit (0 if that is also
/// zero) — uncapped.
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| -t.pnl)
        .sum();
    if gross_loss == 0.0 {
        gross_profit
    } else {
        gross_profit / gross_loss
    }
}

/// Maximum peak-to-trough drawdown over an equity path, as a positive
/// percentage of the running peak. 0 for empty or monotone paths.
pub fn max_drawdown_percent(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak * 100.0;
            if dd > worst {
                worst = dd;
            }
        }
    }
    worst
}

/// Sharpe ratio over per-trade return percentages.
///
/// mean / population-stddev, annualized by √(252 / trade_count). Defined as
/// 0 with fewer than 2 trades or zero stddev.
pub fn sharpe_ratio(pnl_percents: &[f64]) -> f64 {
    let n = pnl_percents.len();
    if n < 2 {
        return 0.0;
    }
    let mean = mean_of(pnl_percents.iter().copied());
    let variance =
        pnl_percents.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
    let stddev = variance.sqrt();
    if stddev < 1e-15 {
        return 0.0;
    }
    (mean / stddev) * (252.0 / n as f64).sqrt()
}

fn mean_of(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trade(pnl: f64, pnl_percent: f64) -> Trade {
        let buy = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let sell = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        Trade {
            buy_timestamp: buy,
            sell_timestamp: sell,
            buy_price: 100.0,
            sell_price: 100.0 + pnl / 100.0,
            quantity: 100.0,
            invested_amount: 10_000.0,
            exit_amount: 10_000.0 + pnl,
            pnl,
            pnl_percent,
            win: pnl > 0.0,
            buy_reason: String::new(),
            sell_reason: String::new(),
            capital_before: 10_000.0,
            capital_after: 10_000.0 + pnl,
        }
    }

    #[test]
    fn win_rate_counts_winners() {
        let trades = vec![trade(100.0, 1.0), trade(-50.0, -0.5), trade(200.0, 2.0)];
        assert!((win_rate(&trades) - 66.666_666).abs() < 1e-3);
        assert_eq!(win_rate(&[]), 0.0);
    }

    #[test]
    fn averages_split_winners_and_losers() {
        let trades = vec![trade(100.0, 1.0), trade(300.0, 3.0), trade(-50.0, -0.5)];
        assert!((average_win(&trades) - 200.0).abs() < 1e-10);
        assert!((average_loss(&trades) - (-50.0)).abs() < 1e-10);
    }

    #[test]
    fn profit_factor_divides_gross_sides() {
        let trades = vec![trade(300.0, 3.0), trade(-100.0, -1.0)];
        assert!((profit_factor(&trades) - 3.0).abs() < 1e-10);
    }

    #[test]
    fn profit_factor_without_losses_is_gross_profit_uncapped() {
        let trades = vec![trade(300.0, 3.0), trade(200.0, 2.0)];
        assert!((profit_factor(&trades) - 500.0).abs() < 1e-10);
        assert_eq!(profit_factor(&[]), 0.0);
    }

    #[test]
    fn max_drawdown_matches_worked_example() {
        // Peak 10500, trough 9800.
        let equity = [10_000.0, 10_500.0, 9_800.0, 11_000.0];
        let dd = max_drawdown_percent(&equity);
        assert!((dd - (10_500.0 - 9_800.0) / 10_500.0 * 100.0).abs() < 1e-10);
    }

    #[test]
    fn max_drawdown_of_monotone_path_is_zero() {
        assert_eq!(max_drawdown_percent(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(max_drawdown_percent(&[]), 0.0);
    }

    #[test]
    fn sharpe_needs_two_trades_and_spread() {
        assert_eq!(sharpe_ratio(&[5.0]), 0.0);
        assert_eq!(sharpe_ratio(&[5.0, 5.0]), 0.0);
        assert!(sharpe_ratio(&[5.0, 1.0, 3.0]) > 0.0);
        assert!(sharpe_ratio(&[-5.0, -1.0, -3.0]) < 0.0);
    }

    #[test]
    fn sharpe_annualization_scales_by_trade_count() {
        // mean 2, population stddev 1, 2 trades → 2 * sqrt(126).
        let s = sharpe_ratio(&[1.0, 3.0]);
        assert!((s - 2.0 * (252.0_f64 / 2.0).sqrt()).abs() < 1e-9);
    }
}
