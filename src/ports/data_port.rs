//! Data feed port trait.

use crate::domain::candle::Candle;
use crate::domain::error::WaterfallError;
use chrono::NaiveDateTime;

/// Supplies ascending-time candle streams per symbol.
///
/// A symbol with no data in the range yields an empty vector, not an error;
/// gaps inside the range are expected and handled by the scheduler's skip
/// policy.
pub trait DataFeed {
    fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Candle>, WaterfallError>;

    fn list_symbols(&self, interval: &str) -> Result<Vec<String>, WaterfallError>;
}
