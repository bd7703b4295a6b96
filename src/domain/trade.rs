//! Trade records, equity points, and matched round-trips.

use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A single execution recorded by the ledger. Append-only for the run.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub side: TradeSide,
    pub symbol: String,
    pub price: f64,
    pub quantity: i64,
    pub timestamp: NaiveDateTime,
    /// Rank of the strategy that was executing when the trade was created.
    pub rank: u32,
}

/// One sample of the shared equity curve, appended once per master-clock tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// A realized round-trip produced by FIFO-matching a sell against one open
/// buy lot. A sell spanning several lots yields several of these.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedTrade {
    pub symbol: String,
    pub rank: u32,
    pub quantity: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub pnl: f64,
    /// Percent return of the lot, (exit - entry) / entry * 100.
    pub pnl_pct: f64,
    pub holding_secs: i64,
}
