//! OHLCV candle representation and master-clock construction.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// One OHLCV bar of a symbol at that symbol's native interval.
#[derive(Debug, Clone, Serialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Chart-friendly OHLC point with a unix timestamp, embedded in results for
/// downstream visualization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl ChartPoint {
    pub fn from_candle(candle: &Candle) -> Self {
        ChartPoint {
            time: candle.timestamp.and_utc().timestamp(),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
        }
    }
}

/// One symbol's candle stream with an O(1) timestamp lookup.
#[derive(Debug, Clone)]
pub struct Feed {
    pub symbol: String,
    pub candles: Vec<Candle>,
    index: HashMap<NaiveDateTime, usize>,
}

impl Feed {
    pub fn new(symbol: String, candles: Vec<Candle>) -> Self {
        let index = candles
            .iter()
            .enumerate()
            .map(|(i, c)| (c.timestamp, i))
            .collect();
        Self {
            symbol,
            candles,
            index,
        }
    }

    pub fn candle_at(&self, ts: NaiveDateTime) -> Option<&Candle> {
        self.index.get(&ts).map(|&i| &self.candles[i])
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// The master clock: sorted union of all distinct timestamps across every
/// feed participating in a run.
pub fn build_master_clock(feeds: &[Feed]) -> Vec<NaiveDateTime> {
    let unique: BTreeSet<NaiveDateTime> = feeds
        .iter()
        .flat_map(|f| f.candles.iter().map(|c| c.timestamp))
        .collect();
    unique.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn make_candle(symbol: &str, at: NaiveDateTime, close: f64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timestamp: at,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1000,
        }
    }

    #[test]
    fn feed_indexes_timestamps() {
        let feed = Feed::new(
            "005930".into(),
            vec![
                make_candle("005930", ts(9, 0), 100.0),
                make_candle("005930", ts(9, 1), 101.0),
            ],
        );

        assert_eq!(feed.len(), 2);
        let c = feed.candle_at(ts(9, 1));
        assert!(c.is_some());
        assert!((c.unwrap().close - 101.0).abs() < f64::EPSILON);
        assert!(feed.candle_at(ts(9, 2)).is_none());
    }

    #[test]
    fn master_clock_merges_and_sorts() {
        let a = Feed::new(
            "A".into(),
            vec![
                make_candle("A", ts(9, 1), 100.0),
                make_candle("A", ts(9, 4), 101.0),
            ],
        );
        let b = Feed::new(
            "B".into(),
            vec![
                make_candle("B", ts(9, 0), 50.0),
                make_candle("B", ts(9, 1), 51.0),
                make_candle("B", ts(9, 2), 52.0),
            ],
        );

        let clock = build_master_clock(&[a, b]);

        assert_eq!(clock, vec![ts(9, 0), ts(9, 1), ts(9, 2), ts(9, 4)]);
    }

    #[test]
    fn master_clock_empty_feeds() {
        assert!(build_master_clock(&[]).is_empty());
        let empty = Feed::new("A".into(), vec![]);
        assert!(build_master_clock(&[empty]).is_empty());
    }

    #[test]
    fn chart_point_uses_unix_time() {
        let c = make_candle("005930", ts(9, 0), 100.0);
        let p = ChartPoint::from_candle(&c);
        assert_eq!(p.time, c.timestamp.and_utc().timestamp());
        assert!((p.close - 100.0).abs() < f64::EPSILON);
        assert!((p.open - 99.0).abs() < f64::EPSILON);
    }
}
