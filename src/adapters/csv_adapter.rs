//! CSV file data feed.
//!
//! One file per symbol and interval (`{symbol}_{interval}.csv`) with header
//! `timestamp,open,high,low,close,volume` and ISO timestamps. A missing file
//! is an empty feed, not an error: the feed contract treats "no data" as an
//! ordinary outcome the engine converts into an empty run.

use crate::domain::candle::Candle;
use crate::domain::error::WaterfallError;
use crate::ports::data_port::DataFeed;
use chrono::NaiveDateTime;
use log::debug;
use std::path::PathBuf;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct CsvFeed {
    base_path: PathBuf,
}

impl CsvFeed {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, interval: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}_{interval}.csv"))
    }
}

fn field<'a>(
    record: &'a csv::StringRecord,
    idx: usize,
    name: &str,
) -> Result<&'a str, WaterfallError> {
    record.get(idx).ok_or_else(|| WaterfallError::Feed {
        reason: format!("missing {name} column"),
    })
}

fn parse_num<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, WaterfallError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| WaterfallError::Feed {
        reason: format!("invalid {name} value {value}: {e}"),
    })
}

impl DataFeed for CsvFeed {
    fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Candle>, WaterfallError> {
        let path = self.csv_path(symbol, interval);
        if !path.exists() {
            debug!("no candle file at {}, treating as empty feed", path.display());
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&path).map_err(|e| WaterfallError::Feed {
            reason: format!("failed to open {}: {e}", path.display()),
        })?;

        let mut candles = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| WaterfallError::Feed {
                reason: format!("CSV parse error in {}: {e}", path.display()),
            })?;

            let ts_str = field(&record, 0, "timestamp")?;
            let timestamp =
                NaiveDateTime::parse_from_str(ts_str, TIMESTAMP_FORMAT).map_err(|e| {
                    WaterfallError::Feed {
                        reason: format!("invalid timestamp {ts_str}: {e}"),
                    }
                })?;

            if timestamp < start || timestamp > end {
                continue;
            }

            candles.push(Candle {
                symbol: symbol.to_string(),
                timestamp,
                open: parse_num(field(&record, 1, "open")?, "open")?,
                high: parse_num(field(&record, 2, "high")?, "high")?,
                low: parse_num(field(&record, 3, "low")?, "low")?,
                close: parse_num(field(&record, 4, "close")?, "close")?,
                volume: parse_num(field(&record, 5, "volume")?, "volume")?,
            });
        }

        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    fn list_symbols(&self, interval: &str) -> Result<Vec<String>, WaterfallError> {
        let entries = std::fs::read_dir(&self.base_path).map_err(|e| WaterfallError::Feed {
            reason: format!("failed to read directory {}: {e}", self.base_path.display()),
        })?;

        let suffix = format!("_{interval}.csv");
        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| WaterfallError::Feed {
                reason: format!("directory entry error: {e}"),
            })?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(symbol) = name_str.strip_suffix(&suffix) {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
