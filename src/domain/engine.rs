//! Waterfall replay engine.
//!
//! Merges every participating symbol's timestamps into one master clock and
//! replays it tick by tick against a shared [`Ledger`]. At each tick the
//! position slot is arbitrated by priority rank: while a position is open
//! only the owning rank is dispatched (so it can manage exits undisturbed);
//! while the slot is free, ranks are dispatched in ascending order and the
//! first one whose call produces a trade claims the slot for the tick.
//! After the loop, residual holdings are force-closed at their last marked
//! price so realized P&L reconciles exactly with the equity curve.

use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::analytics::{activity_rate_pct, max_drawdown_pct, RankStats, TradeStats};
use super::candle::{build_master_clock, ChartPoint, Feed};
use super::error::WaterfallError;
use super::ledger::{ExecutionContext, Ledger};
use super::matching::match_trades;
use super::run_config::RunConfig;
use super::strategy::Strategy;
use super::trade::{CompletedTrade, EquityPoint, Trade};
use crate::ports::data_port::DataFeed;

/// A strategy slot with its constructed strategy instance.
pub struct Participant {
    pub rank: u32,
    pub symbol: String,
    pub strategy: Box<dyn Strategy>,
}

/// Everything a run produces. Numeric fields are plain numbers so callers
/// can re-aggregate without re-parsing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub activity_rate_pct: f64,
    pub total_trading_days: usize,
    pub equity_curve: Vec<EquityPoint>,
    pub ohlcv: HashMap<String, Vec<ChartPoint>>,
    pub trades: Vec<Trade>,
    /// FIFO-matched round-trips, for replay views and reconciliation.
    pub matched_trades: Vec<CompletedTrade>,
    pub logs: Vec<String>,
    pub stats: TradeStats,
    pub rank_stats: Vec<RankStats>,
}

impl RunResult {
    /// Zero-valued result for a run that found no data at all.
    pub fn empty() -> Self {
        RunResult {
            logs: vec!["no data collected for any symbol".to_string()],
            ..RunResult::default()
        }
    }
}

pub struct WaterfallEngine<'a> {
    feed: &'a dyn DataFeed,
}

impl<'a> WaterfallEngine<'a> {
    pub fn new(feed: &'a dyn DataFeed) -> Self {
        Self { feed }
    }

    /// Build the roster from the config and replay the full run.
    pub fn run_integrated(&self, config: &RunConfig) -> Result<RunResult, WaterfallError> {
        config.validate()?;
        let participants = config
            .participants
            .iter()
            .map(|spec| Participant {
                rank: spec.rank,
                symbol: spec.symbol.clone(),
                strategy: spec.strategy.build(config.initial_capital),
            })
            .collect();
        self.run_with_participants(config, participants)
    }

    /// Replay with a caller-built roster. `config.participants` is ignored
    /// here; only the shared run parameters are read.
    pub fn run_with_participants(
        &self,
        config: &RunConfig,
        mut participants: Vec<Participant>,
    ) -> Result<RunResult, WaterfallError> {
        participants.sort_by_key(|p| p.rank);

        // Fetch every referenced symbol once, up front. Symbols with no
        // candles are dropped with a warning; the run itself only aborts
        // when nothing at all is left.
        let mut symbols: BTreeSet<String> = participants.iter().map(|p| p.symbol.clone()).collect();
        if !config.global_symbol.is_empty() {
            symbols.insert(config.global_symbol.clone());
        }

        let mut feeds: BTreeMap<String, Feed> = BTreeMap::new();
        for symbol in &symbols {
            let candles =
                self.feed
                    .get_candles(symbol, &config.interval, config.start, config.end)?;
            if candles.is_empty() {
                warn!("ENGINE: no data for {symbol}, excluding from run");
                continue;
            }
            feeds.insert(symbol.clone(), Feed::new(symbol.clone(), candles));
        }
        if feeds.is_empty() {
            return Ok(RunResult::empty());
        }

        let primary_symbol = participants
            .first()
            .map(|p| p.symbol.clone())
            .unwrap_or_else(|| config.global_symbol.clone());

        for p in &mut participants {
            p.strategy.initialize();
        }
        info!(
            "ENGINE: starting run with {} participants over {} symbols",
            participants.len(),
            feeds.len()
        );

        // Master clock: union of every feed's timestamps, cut off at the
        // primary feed's last candle so the simulation never runs past the
        // reference symbol's end.
        let mut clock = build_master_clock(&feeds.values().cloned().collect::<Vec<_>>());
        if let Some(primary) = feeds.get(&primary_symbol) {
            if let Some(last) = primary.candles.last().map(|c| c.timestamp) {
                clock.retain(|&ts| ts <= last);
            }
        }

        let mut ledger = Ledger::new(config.initial_capital, config.unconstrained_sizing);

        for &ts in &clock {
            ledger.set_clock(ts);
            for feed in feeds.values() {
                if let Some(candle) = feed.candle_at(ts) {
                    ledger.observe(&candle.symbol, candle.close);
                }
            }

            if ledger.occupied() {
                // Owner-only dispatch: the rank holding the position manages
                // its exit without interference from lower priorities.
                let owner = ledger.owner_rank();
                if let Some(p) = participants
                    .iter_mut()
                    .find(|p| Some(p.rank) == owner)
                {
                    if let Some(candle) = feeds.get(&p.symbol).and_then(|f| f.candle_at(ts)) {
                        ledger.set_active_rank(p.rank);
                        p.strategy.on_data(&mut ledger, candle);
                    }
                }
            } else {
                for p in participants.iter_mut() {
                    let Some(candle) = feeds.get(&p.symbol).and_then(|f| f.candle_at(ts)) else {
                        // Data gap for this rank: skipped this tick only.
                        continue;
                    };
                    let trades_before = ledger.trades().len();
                    ledger.set_active_rank(p.rank);
                    p.strategy.on_data(&mut ledger, candle);
                    if ledger.trades().len() > trades_before {
                        // First claim wins; later ranks do not see this tick.
                        break;
                    }
                }
            }

            ledger.mark_to_market();
        }

        liquidate_residuals(&mut ledger);

        self.assemble_result(config, &primary_symbol, &feeds, ledger)
    }

    fn assemble_result(
        &self,
        config: &RunConfig,
        primary_symbol: &str,
        feeds: &BTreeMap<String, Feed>,
        ledger: Ledger,
    ) -> Result<RunResult, WaterfallError> {
        let Some(reference) = feeds
            .get(primary_symbol)
            .or_else(|| feeds.values().next())
        else {
            return Ok(RunResult::empty());
        };

        let equity_curve = ledger.equity_curve().to_vec();
        let total_return_pct = match (equity_curve.first(), equity_curve.last()) {
            (Some(first), Some(last)) if first.equity > 0.0 => {
                (last.equity - first.equity) / first.equity * 100.0
            }
            _ => 0.0,
        };

        let data_days: BTreeSet<NaiveDate> =
            reference.candles.iter().map(|c| c.timestamp.date()).collect();
        let traded_days: BTreeSet<NaiveDate> = ledger
            .trades()
            .iter()
            .map(|t| t.timestamp.date())
            .collect();
        let total_trading_days = data_days.len();

        let span = match (reference.candles.first(), reference.candles.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        };

        let completed = match_trades(ledger.trades())?;
        let stats = TradeStats::compute(&completed, span);
        let rank_stats = RankStats::compute_all(
            ledger.trades(),
            config.initial_capital,
            total_trading_days,
            span,
        )?;

        let ohlcv = feeds
            .iter()
            .map(|(symbol, feed)| {
                (
                    symbol.clone(),
                    feed.candles.iter().map(ChartPoint::from_candle).collect(),
                )
            })
            .collect();

        Ok(RunResult {
            total_return_pct,
            max_drawdown_pct: max_drawdown_pct(&equity_curve),
            activity_rate_pct: activity_rate_pct(traded_days.len(), total_trading_days),
            total_trading_days,
            equity_curve,
            ohlcv,
            trades: ledger.trades().to_vec(),
            matched_trades: completed,
            logs: ledger.logs().to_vec(),
            stats,
            rank_stats,
        })
    }
}

/// Force-close every residual holding at its last marked price, attributed
/// to the owning rank. The sale converts holdings to cash at exactly the
/// price of the final mark, so the equity curve is unchanged and realized
/// P&L reconciles with it.
fn liquidate_residuals(ledger: &mut Ledger) {
    let residuals: Vec<(String, i64)> = ledger
        .holdings()
        .iter()
        .filter(|&(_, &qty)| qty > 0)
        .map(|(symbol, &qty)| (symbol.clone(), qty))
        .collect();

    for (symbol, qty) in residuals {
        let rank = ledger.owner_rank().unwrap_or(0);
        ledger.set_active_rank(rank);
        let price = ledger.price(&symbol);
        if ledger.sell(&symbol, qty, 0.0).is_ok() {
            ledger.log(&format!("AUTO-LIQUIDATION: closed {qty} {symbol} @ {price}"));
            info!("ENGINE: auto-liquidated {qty} {symbol} @ {price} for rank {rank}");
        }
    }
}
