use crate::models::{EquityPoint, PerformanceSummary, Trade};
use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;

const TRADING_PERIODS_PER_YEAR: f64 = 252.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Computes the full summary from a completed trade log and equity
    /// curve. Called exactly once, at replay termination.
    pub fn calculate(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
        final_capital: f64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> PerformanceSummary {
        let pnls: Vec<f64> = trades.iter().filter_map(|t| t.pnl).collect();
        let winning: Vec<f64> = pnls.iter().copied().filter(|&p| p > 0.0).collect();
        let losing: Vec<f64> = pnls.iter().copied().filter(|&p| p < 0.0).collect();

        let total_trades = trades.len() as u32;
        let win_rate = if total_trades > 0 {
            winning.len() as f64 / total_trades as f64
        } else {
            0.0
        };

        let total_return = if initial_capital > 0.0 {
            final_capital / initial_capital - 1.0
        } else {
            0.0
        };

        let days_in_range = (end_date - start_date).num_days().max(1) as f64;
        let annual_return = (1.0 + total_return).powf(365.0 / days_in_range) - 1.0;

        let returns = Self::equity_returns(equity_curve);
        let sharpe_ratio = Self::sharpe(&returns);
        let sortino_ratio = Self::sortino(&returns);

        let holding_hours: Vec<f64> = trades
            .iter()
            .filter_map(|t| {
                t.exit_time
                    .map(|exit| (exit - t.entry_time).num_seconds() as f64 / 3600.0)
            })
            .collect();

        PerformanceSummary {
            total_return,
            annual_return,
            total_trades,
            winning_trades: winning.len() as u32,
            losing_trades: losing.len() as u32,
            win_rate,
            profit_factor: Self::profit_factor(&winning, &losing),
            sharpe_ratio,
            sortino_ratio,
            max_drawdown: Self::max_drawdown(equity_curve),
            avg_win: Self::average(&winning),
            avg_loss: Self::average(&losing),
            best_trade: pnls.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            worst_trade: pnls.iter().copied().fold(f64::INFINITY, f64::min),
            avg_holding_hours: Self::average(&holding_hours),
        }
        .normalized()
    }

    fn equity_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
        equity_curve
            .windows(2)
            .filter_map(|pair| {
                let prev = pair[0].equity;
                if prev > 0.0 {
                    Some((pair[1].equity - prev) / prev)
                } else {
                    None
                }
            })
            .collect()
    }

    /// `infinity` is the sentinel for a log with winners and no
    /// losers; an empty log is 0, never NaN.
    fn profit_factor(winning: &[f64], losing: &[f64]) -> f64 {
        let gross_profit: f64 = winning.iter().sum();
        let gross_loss: f64 = losing.iter().sum::<f64>().abs();
        if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    /// Undefined (None) when the return deviation is zero.
    fn sharpe(returns: &[f64]) -> Option<f64> {
        if returns.len() < 2 {
            return None;
        }
        let mean = returns.to_vec().mean();
        let std_dev = returns.to_vec().std_dev();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return None;
        }
        Some(mean / std_dev * TRADING_PERIODS_PER_YEAR.sqrt())
    }

    /// Sharpe with only downside deviation in the denominator.
    fn sortino(returns: &[f64]) -> Option<f64> {
        if returns.len() < 2 {
            return None;
        }
        let downside: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
        if downside.len() < 2 {
            return None;
        }
        let downside_std = downside.std_dev();
        if downside_std == 0.0 || !downside_std.is_finite() {
            return None;
        }
        let mean = returns.to_vec().mean();
        Some(mean / downside_std * TRADING_PERIODS_PER_YEAR.sqrt())
    }

    /// Peak-to-trough fraction of the running peak, in [0, 1]; 0 for a
    /// monotonically non-decreasing curve.
    fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
        let mut peak = f64::NEG_INFINITY;
        let mut max_drawdown = 0.0f64;
        for point in equity_curve {
            if point.equity > peak {
                peak = point.equity;
            } else if peak > 0.0 {
                let drawdown = (peak - point.equity) / peak;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }
        max_drawdown.clamp(0.0, 1.0)
    }

    fn average(values: &[f64]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for value in values.iter().copied() {
            if value.is_finite() {
                sum += value;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

impl PerformanceSummary {
    /// Best/worst fold from infinities on an empty log; pin them to 0
    /// so every field is a plain number (profit_factor keeps its
    /// infinity sentinel).
    fn normalized(mut self) -> Self {
        if !self.best_trade.is_finite() {
            self.best_trade = 0.0;
        }
        if !self.worst_trade.is_finite() {
            self.worst_trade = 0.0;
        }
        self
    }
}
