//! Post-run statistics over matched round-trips and the equity curve.
//!
//! Everything here defines an explicit zero-valued default for the
//! no-trades case; analytics never fail on an empty log.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeSet;

use super::error::WaterfallError;
use super::matching::match_trades_for_rank;
use super::trade::{CompletedTrade, EquityPoint, Trade};

/// Finite stand-in for an undefined profit factor (zero gross loss).
const PROFIT_FACTOR_CAP: f64 = 99.99;

/// Overall slopes at or below this magnitude are treated as flat.
const FLAT_SLOPE_EPS: f64 = 1e-4;

/// Acceleration needs at least this many monthly buckets to be meaningful.
const MIN_MONTHS_FOR_ACCELERATION: usize = 10;

/// Aggregate statistics over a set of matched round-trips.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeStats {
    pub total_trades: usize,
    /// Percent of round-trips with pnl > 0. A zero-P&L trade counts as a loss.
    pub win_rate: f64,
    pub avg_pnl_pct: f64,
    pub max_profit_pct: f64,
    pub max_loss_pct: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub avg_holding_secs: i64,
    pub stability_score: f64,
    pub acceleration_score: f64,
    pub monthly: Vec<MonthlyStat>,
}

/// One calendar month's realized performance. Months without trades are
/// present with zeroed figures so the series has no gaps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStat {
    pub label: String,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub win_rate: f64,
    pub count: usize,
}

impl TradeStats {
    /// Compute the full statistic set. `span` is the run's date range, used
    /// to enumerate monthly buckets (empty months included); with no span or
    /// no trades the zero defaults are returned.
    pub fn compute(completed: &[CompletedTrade], span: Option<(NaiveDateTime, NaiveDateTime)>) -> Self {
        if completed.is_empty() {
            return TradeStats::default();
        }

        let total = completed.len();
        let wins: Vec<&CompletedTrade> = completed.iter().filter(|t| t.pnl > 0.0).collect();
        let losses: Vec<&CompletedTrade> = completed.iter().filter(|t| t.pnl <= 0.0).collect();

        let win_rate = wins.len() as f64 / total as f64 * 100.0;
        let avg_pnl_pct = completed.iter().map(|t| t.pnl_pct).sum::<f64>() / total as f64;
        let max_profit_pct = completed.iter().map(|t| t.pnl_pct).fold(f64::MIN, f64::max);
        let max_loss_pct = completed.iter().map(|t| t.pnl_pct).fold(f64::MAX, f64::min);

        let gross_profit: f64 = wins.iter().map(|t| t.pnl).sum();
        let gross_loss: f64 = losses.iter().map(|t| t.pnl).sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            PROFIT_FACTOR_CAP
        };

        let returns: Vec<f64> = completed.iter().map(|t| t.pnl_pct).collect();
        let sharpe_ratio = trade_sharpe(&returns);

        let avg_holding_secs =
            completed.iter().map(|t| t.holding_secs).sum::<i64>() / total as i64;

        let monthly = match span {
            Some((start, end)) => monthly_stats(completed, start.date(), end.date()),
            None => Vec::new(),
        };
        let (stability_score, acceleration_score) = trend_scores(&monthly);

        TradeStats {
            total_trades: total,
            win_rate,
            avg_pnl_pct,
            max_profit_pct,
            max_loss_pct,
            profit_factor,
            sharpe_ratio,
            avg_holding_secs,
            stability_score,
            acceleration_score,
            monthly,
        }
    }
}

/// Trade-based Sharpe proxy: mean(return) / sample stdev(return) * sqrt(n).
/// 0 with fewer than two trades or zero variance.
fn trade_sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stdev = variance.sqrt();
    if stdev > 0.0 {
        mean / stdev * n.sqrt()
    } else {
        0.0
    }
}

fn next_month(date: NaiveDate) -> NaiveDate {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).unwrap_or(date)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1).unwrap_or(date)
    }
}

/// Bucket round-trips by exit month over [start, end], inclusive of months
/// with no trades.
pub fn monthly_stats(
    completed: &[CompletedTrade],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<MonthlyStat> {
    let mut current = match NaiveDate::from_ymd_opt(start.year(), start.month(), 1) {
        Some(d) => d,
        None => return Vec::new(),
    };
    let last = NaiveDate::from_ymd_opt(end.year(), end.month(), 1).unwrap_or(current);

    let mut stats = Vec::new();
    while current <= last {
        let upper = next_month(current);
        let chunk: Vec<&CompletedTrade> = completed
            .iter()
            .filter(|t| {
                let d = t.exit_time.date();
                d >= current && d < upper
            })
            .collect();

        let (total_pnl, avg_pnl, win_rate) = if chunk.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let total: f64 = chunk.iter().map(|t| t.pnl_pct).sum();
            let wins = chunk.iter().filter(|t| t.pnl > 0.0).count();
            (
                total,
                total / chunk.len() as f64,
                wins as f64 / chunk.len() as f64 * 100.0,
            )
        };

        stats.push(MonthlyStat {
            label: current.format("%y-%m").to_string(),
            total_pnl,
            avg_pnl,
            win_rate,
            count: chunk.len(),
        });
        current = upper;
    }
    stats
}

/// Stability (R-squared of the cumulative monthly series against its index)
/// and acceleration (slope of the recent quarter over the whole-series
/// slope; neutral 1.0 with too few months, 0.0 when the overall trend is
/// numerically flat).
fn trend_scores(monthly: &[MonthlyStat]) -> (f64, f64) {
    if monthly.is_empty() {
        return (0.0, 0.0);
    }

    let mut cumulative = Vec::with_capacity(monthly.len());
    let mut running = 0.0;
    for m in monthly {
        running += m.total_pnl;
        cumulative.push(running);
    }

    let (slope, r_squared) = linear_fit(&cumulative);
    let stability = if cumulative.len() > 1 { r_squared } else { 0.0 };

    let acceleration = if cumulative.len() >= MIN_MONTHS_FOR_ACCELERATION {
        let n_recent = (cumulative.len() / 4).max(5);
        let recent = &cumulative[cumulative.len() - n_recent..];
        let (recent_slope, _) = linear_fit(recent);
        if slope.abs() > FLAT_SLOPE_EPS {
            recent_slope / slope
        } else {
            0.0
        }
    } else {
        1.0
    };

    (stability, acceleration)
}

/// Ordinary least squares of `values` against 0..n. Returns (slope, r²);
/// both 0 for degenerate inputs (fewer than two points or zero variance).
pub fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (0.0, 0.0);
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;

    let mut ss_xx = 0.0;
    let mut ss_yy = 0.0;
    let mut ss_xy = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        ss_xx += dx * dx;
        ss_yy += dy * dy;
        ss_xy += dx * dy;
    }

    if ss_xx == 0.0 {
        return (0.0, 0.0);
    }
    let slope = ss_xy / ss_xx;
    let r_squared = if ss_yy == 0.0 {
        0.0
    } else {
        (ss_xy * ss_xy) / (ss_xx * ss_yy)
    };
    (slope, r_squared)
}

/// Maximum peak-to-trough drawdown of an equity series, as a percentage
/// in [-100, 0].
pub fn max_drawdown_pct(curve: &[EquityPoint]) -> f64 {
    drawdown_over(curve.iter().map(|p| p.equity))
}

fn drawdown_over(values: impl Iterator<Item = f64>) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for value in values {
        if value > peak {
            peak = value;
        } else if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    -(max_dd * 100.0)
}

/// Percent of trading days on which at least one trade occurred.
pub fn activity_rate_pct(traded_days: usize, total_days: usize) -> f64 {
    if total_days == 0 {
        0.0
    } else {
        traded_days as f64 / total_days as f64 * 100.0
    }
}

/// One rank's independent breakdown: the shared statistic set plus return
/// attribution and a drawdown from the rank's virtual equity curve.
#[derive(Debug, Clone, Serialize)]
pub struct RankStats {
    pub rank: u32,
    /// Realized P&L of this rank relative to the shared initial capital.
    pub total_return_pct: f64,
    /// Drawdown of the virtual curve (initial capital + cumulative realized
    /// P&L). Every rank is seeded with the full shared capital; inherited
    /// attribution choice, see DESIGN.md.
    pub max_drawdown_pct: f64,
    pub activity_rate_pct: f64,
    pub stats: TradeStats,
}

impl RankStats {
    /// Compute per-rank breakdowns for every rank present in the trade log,
    /// ascending by rank.
    pub fn compute_all(
        trades: &[Trade],
        initial_capital: f64,
        total_days: usize,
        span: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Result<Vec<RankStats>, WaterfallError> {
        let ranks: BTreeSet<u32> = trades.iter().map(|t| t.rank).collect();
        let mut all = Vec::with_capacity(ranks.len());

        for rank in ranks {
            let mut completed = match_trades_for_rank(trades, rank)?;
            completed.sort_by_key(|t| t.exit_time);

            let realized: f64 = completed.iter().map(|t| t.pnl).sum();
            let total_return_pct = if initial_capital > 0.0 {
                realized / initial_capital * 100.0
            } else {
                0.0
            };

            let virtual_curve = completed.iter().scan(initial_capital, |equity, t| {
                *equity += t.pnl;
                Some(*equity)
            });
            let max_dd = drawdown_over(std::iter::once(initial_capital).chain(virtual_curve));

            let traded_days: BTreeSet<NaiveDate> = trades
                .iter()
                .filter(|t| t.rank == rank)
                .map(|t| t.timestamp.date())
                .collect();

            let stats = TradeStats::compute(&completed, span);
            all.push(RankStats {
                rank,
                total_return_pct,
                max_drawdown_pct: max_dd,
                activity_rate_pct: activity_rate_pct(traded_days.len(), total_days),
                stats,
            });
        }

        Ok(all)
    }
}
