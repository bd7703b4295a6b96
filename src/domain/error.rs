//! Domain error types.
//!
//! Two layers: [`ExecutionError`] covers per-tick order rejections that are
//! logged and survived, [`WaterfallError`] covers structural failures that
//! abort a run or a command.

/// An order rejected by the ledger. Local to one tick and one rank; the run
/// continues after logging it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("system occupied: {held} holds the position slot")]
    SystemOccupied { held: String },

    #[error("invalid price for {symbol}: {price}")]
    InvalidPrice { symbol: String, price: f64 },

    #[error("insufficient cash: need {needed:.0}, have {available:.0}")]
    InsufficientCash { needed: f64, available: f64 },

    #[error("insufficient holdings of {symbol}: have {held}, requested {requested}")]
    InsufficientHoldings {
        symbol: String,
        held: i64,
        requested: i64,
    },
}

/// Top-level error type for waterfall.
#[derive(Debug, thiserror::Error)]
pub enum WaterfallError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("no data for {symbol} at interval {interval}")]
    NoData { symbol: String, interval: String },

    #[error("data feed error: {reason}")]
    Feed { reason: String },

    #[error("sell of {symbol} exceeds open buy lots in the trade log")]
    UnmatchedSell { symbol: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&WaterfallError> for std::process::ExitCode {
    fn from(err: &WaterfallError) -> Self {
        let code: u8 = match err {
            WaterfallError::Io(_) => 1,
            WaterfallError::ConfigParse { .. }
            | WaterfallError::ConfigMissing { .. }
            | WaterfallError::ConfigInvalid { .. } => 2,
            WaterfallError::UnknownStrategy { .. } => 4,
            WaterfallError::NoData { .. } | WaterfallError::Feed { .. } => 5,
            WaterfallError::UnmatchedSell { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
