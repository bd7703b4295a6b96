//! FIFO trade matching.
//!
//! Walks the raw execution log in order, keeping open buy lots, and pairs
//! each sell against the oldest lots of the same symbol. One
//! [`CompletedTrade`] is emitted per lot consumed, so a sell spanning lots
//! produces several round-trips, each with its own P&L and holding time.

use super::error::WaterfallError;
use super::trade::{CompletedTrade, Trade, TradeSide};
use chrono::NaiveDateTime;

#[derive(Debug, Clone)]
struct OpenLot {
    symbol: String,
    rank: u32,
    price: f64,
    quantity: i64,
    time: NaiveDateTime,
}

/// FIFO-match the full trade log.
///
/// A sell quantity that exceeds the open lots of its symbol means the log
/// did not come from a ledger-enforced run; that is reported as
/// [`WaterfallError::UnmatchedSell`] rather than silently dropped.
pub fn match_trades(trades: &[Trade]) -> Result<Vec<CompletedTrade>, WaterfallError> {
    let mut open: Vec<OpenLot> = Vec::new();
    let mut completed = Vec::new();

    for trade in trades {
        match trade.side {
            TradeSide::Buy => open.push(OpenLot {
                symbol: trade.symbol.clone(),
                rank: trade.rank,
                price: trade.price,
                quantity: trade.quantity,
                time: trade.timestamp,
            }),
            TradeSide::Sell => {
                let mut remaining = trade.quantity;
                while remaining > 0 {
                    let Some(idx) = open.iter().position(|lot| lot.symbol == trade.symbol) else {
                        return Err(WaterfallError::UnmatchedSell {
                            symbol: trade.symbol.clone(),
                        });
                    };

                    let lot = &mut open[idx];
                    let matched = remaining.min(lot.quantity);
                    let pnl = (trade.price - lot.price) * matched as f64;
                    let pnl_pct = (trade.price - lot.price) / lot.price * 100.0;
                    let holding_secs = (trade.timestamp - lot.time).num_seconds();

                    completed.push(CompletedTrade {
                        symbol: trade.symbol.clone(),
                        rank: lot.rank,
                        quantity: matched,
                        entry_price: lot.price,
                        exit_price: trade.price,
                        entry_time: lot.time,
                        exit_time: trade.timestamp,
                        pnl,
                        pnl_pct,
                        holding_secs,
                    });

                    remaining -= matched;
                    lot.quantity -= matched;
                    if lot.quantity == 0 {
                        open.remove(idx);
                    }
                }
            }
        }
    }

    Ok(completed)
}

/// FIFO-match only one rank's slice of the log, for per-rank breakdowns.
pub fn match_trades_for_rank(
    trades: &[Trade],
    rank: u32,
) -> Result<Vec<CompletedTrade>, WaterfallError> {
    let filtered: Vec<Trade> = trades.iter().filter(|t| t.rank == rank).cloned().collect();
    match_trades(&filtered)
}
