//! Performance metrics over closed trades and the equity series
//!
//! P&L figures are net of commission. Sharpe and Sortino use per-trade
//! return on margin with a zero risk-free rate and no annualization.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::ledger::{EquityPoint, Ledger, TradeRecord};
use crate::{Case, Money};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseStats {
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub net_pnl: Money,
    pub avg_pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent
    pub win_rate: f64,
    pub net_pnl: Money,
    pub gross_profit: Money,
    pub gross_loss: Money,
    pub total_commission: Money,
    pub profit_factor: f64,
    /// Average net P&L per trade
    pub expectancy: f64,
    pub avg_win: f64,
    /// Negative or zero
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Largest peak-to-trough equity decline, in quote currency
    pub max_drawdown: f64,
    /// Percent of the peak it was measured from
    pub max_drawdown_pct: f64,
    pub cancelled_orders: usize,
    pub per_case: BTreeMap<Case, CaseStats>,
}

impl PerformanceReport {
    pub fn from_ledger(ledger: &Ledger) -> Self {
        let mut report = Self::calculate(
            ledger.history(),
            ledger.equity_history(),
            ledger.initial_balance(),
        );
        report.cancelled_orders = ledger.cancelled_history().len();
        report
    }

    pub fn calculate(
        trades: &[TradeRecord],
        equity: &[EquityPoint],
        initial_balance: f64,
    ) -> Self {
        let mut report = PerformanceReport {
            per_case: Case::TRADABLE
                .iter()
                .map(|&c| (c, CaseStats::default()))
                .collect(),
            ..Default::default()
        };
        if trades.is_empty() {
            return report;
        }

        let (winners, losers): (Vec<f64>, Vec<f64>) = trades
            .iter()
            .map(|t| t.net_pnl)
            .partition(|&pnl| pnl > 0.0);

        report.total_trades = trades.len();
        report.wins = winners.len();
        report.losses = losers.len();
        report.win_rate = winners.len() as f64 / trades.len() as f64 * 100.0;

        report.gross_profit = winners.iter().map(|&p| Money::from_f64(p)).sum();
        report.gross_loss = losers.iter().map(|&p| Money::from_f64(p)).sum::<Money>().abs();
        report.net_pnl = report.gross_profit - report.gross_loss;
        report.total_commission = trades.iter().map(|t| Money::from_f64(t.commission)).sum();

        report.profit_factor = if !report.gross_loss.is_zero() {
            (report.gross_profit / report.gross_loss).to_f64()
        } else if report.gross_profit.is_positive() {
            f64::INFINITY
        } else {
            0.0
        };

        report.avg_win = if winners.is_empty() {
            0.0
        } else {
            winners.iter().mean()
        };
        report.avg_loss = if losers.is_empty() {
            0.0
        } else {
            losers.iter().mean()
        };
        report.largest_win = winners.iter().copied().fold(0.0, f64::max);
        report.largest_loss = losers.iter().copied().fold(0.0, f64::min);
        report.expectancy = report.net_pnl.to_f64() / trades.len() as f64;

        let returns: Vec<f64> = trades.iter().map(|t| t.return_on_margin()).collect();
        (report.sharpe_ratio, report.sortino_ratio) = risk_ratios(&returns);

        let curve = if equity.is_empty() {
            balance_curve(trades, initial_balance)
        } else {
            equity.iter().map(|p| p.equity).collect()
        };
        (report.max_drawdown, report.max_drawdown_pct) = max_drawdown(&curve);

        for (case, group) in trades.iter().into_group_map_by(|t| t.strategy_case) {
            let wins = group.iter().filter(|t| t.is_win()).count();
            let net_pnl: Money = group.iter().map(|t| Money::from_f64(t.net_pnl)).sum();
            report.per_case.insert(
                case,
                CaseStats {
                    trades: group.len(),
                    wins,
                    win_rate: wins as f64 / group.len() as f64 * 100.0,
                    net_pnl,
                    avg_pnl: net_pnl.to_f64() / group.len() as f64,
                },
            );
        }

        report
    }

    /// Multi-line summary for the terminal
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Trades: {} (W {} / L {})  Win rate: {:.1}%",
            self.total_trades, self.wins, self.losses, self.win_rate
        );
        let _ = writeln!(
            out,
            "Net PnL: {}  Gross +{} / -{}  Commission: {}",
            self.net_pnl.round_dp(4),
            self.gross_profit.round_dp(4),
            self.gross_loss.round_dp(4),
            self.total_commission.round_dp(4)
        );
        let _ = writeln!(
            out,
            "Profit factor: {:.2}  Expectancy: {:+.4}  Avg win: {:.4}  Avg loss: {:.4}",
            self.profit_factor, self.expectancy, self.avg_win, self.avg_loss
        );
        let _ = writeln!(
            out,
            "Sharpe: {:.2}  Sortino: {:.2}  Max drawdown: {:.4} ({:.2}%)",
            self.sharpe_ratio, self.sortino_ratio, self.max_drawdown, self.max_drawdown_pct
        );
        let _ = writeln!(out, "Cancelled orders: {}", self.cancelled_orders);
        for (case, stats) in &self.per_case {
            let _ = writeln!(
                out,
                "  {}: {} trades, {:.1}% win, net {}",
                case,
                stats.trades,
                stats.win_rate,
                stats.net_pnl.round_dp(4)
            );
        }
        out
    }
}

/// Sharpe and Sortino of `returns`. Both are zero with fewer than two
/// samples or no dispersion.
fn risk_ratios(returns: &[f64]) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }
    let mean = returns.iter().mean();
    let std_dev = returns.iter().population_std_dev();
    let sharpe = if std_dev > 0.0 { mean / std_dev } else { 0.0 };

    let downside_dev = (returns
        .iter()
        .map(|r| (r - mean).min(0.0).powi(2))
        .sum::<f64>()
        / returns.len() as f64)
        .sqrt();
    let sortino = if downside_dev > 0.0 {
        mean / downside_dev
    } else {
        0.0
    };
    (sharpe, sortino)
}

/// Balance after each close, in close order, starting from the initial
/// balance
fn balance_curve(trades: &[TradeRecord], initial_balance: f64) -> Vec<f64> {
    std::iter::once(initial_balance)
        .chain(
            trades
                .iter()
                .sorted_by_key(|t| t.closed_at)
                .scan(initial_balance, |balance, t| {
                    *balance += t.net_pnl;
                    Some(*balance)
                }),
        )
        .collect()
}

fn max_drawdown(curve: &[f64]) -> (f64, f64) {
    let Some(&first) = curve.first() else {
        return (0.0, 0.0);
    };
    let mut peak = first;
    let mut worst = (0.0, 0.0);
    for &value in curve {
        peak = peak.max(value);
        let drawdown = peak - value;
        if drawdown > worst.0 {
            let pct = if peak > 0.0 {
                drawdown / peak * 100.0
            } else {
                0.0
            };
            worst = (drawdown, pct);
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CloseReason, OrderId};
    use crate::{Side, Symbol};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn trade(seq: u64, case: Case, net_pnl: f64) -> TradeRecord {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(seq as i64);
        TradeRecord {
            order_id: OrderId::generate(t, seq),
            symbol: Symbol::new("ETHUSDT"),
            side: Side::Short,
            entry_price: 100.0,
            close_price: 95.0,
            quantity: 0.3,
            margin: 3.0,
            pnl: net_pnl,
            commission: 0.0,
            net_pnl,
            min_pnl: 0.0,
            max_pnl: 0.0,
            strategy_case: case,
            reason: CloseReason::TakeProfit,
            swing_high: 100.0,
            swing_low: 50.0,
            stop_loss: None,
            take_profit: 77.5,
            executions: Vec::new(),
            opened_at: t,
            closed_at: t,
        }
    }

    #[test]
    fn test_empty_history() {
        let report = PerformanceReport::calculate(&[], &[], 30.0);
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.per_case.len(), 3);
        assert_eq!(report.profit_factor, 0.0);
    }

    #[test]
    fn test_basic_ratios() {
        let trades = vec![
            trade(1, Case::One, 1.5),
            trade(2, Case::Three, -1.0),
            trade(3, Case::Three, 0.5),
            trade(4, Case::Four, -0.5),
        ];
        let report = PerformanceReport::calculate(&trades, &[], 30.0);

        assert_eq!(report.total_trades, 4);
        assert_eq!(report.wins, 2);
        assert_eq!(report.losses, 2);
        assert_relative_eq!(report.win_rate, 50.0);
        assert_relative_eq!(report.gross_profit.to_f64(), 2.0);
        assert_relative_eq!(report.gross_loss.to_f64(), 1.5);
        assert_relative_eq!(report.profit_factor, 2.0 / 1.5, epsilon = 1e-9);
        assert_relative_eq!(report.expectancy, 0.125, epsilon = 1e-9);
        assert_relative_eq!(report.avg_win, 1.0);
        assert_relative_eq!(report.avg_loss, -0.75);
        assert_relative_eq!(report.largest_loss, -1.0);

        let case3 = &report.per_case[&Case::Three];
        assert_eq!(case3.trades, 2);
        assert_eq!(case3.wins, 1);
        assert_relative_eq!(case3.net_pnl.to_f64(), -0.5);
    }

    #[test]
    fn test_drawdown_from_trade_sequence() {
        // 30 -> 32 -> 29 -> 30
        let trades = vec![
            trade(1, Case::One, 2.0),
            trade(2, Case::One, -3.0),
            trade(3, Case::One, 1.0),
        ];
        let report = PerformanceReport::calculate(&trades, &[], 30.0);
        assert_relative_eq!(report.max_drawdown, 3.0, epsilon = 1e-9);
        assert_relative_eq!(report.max_drawdown_pct, 3.0 / 32.0 * 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sharpe_sign() {
        let winners: Vec<TradeRecord> = (1..=4)
            .map(|i| trade(i, Case::Four, 0.5 * i as f64))
            .collect();
        let report = PerformanceReport::calculate(&winners, &[], 30.0);
        assert!(report.sharpe_ratio > 0.0);
        assert!(report.sortino_ratio > 0.0);
        assert_eq!(report.profit_factor, f64::INFINITY);
    }
}
