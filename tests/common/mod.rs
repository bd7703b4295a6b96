#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use waterfall::domain::candle::Candle;
use waterfall::domain::engine::Participant;
use waterfall::domain::error::WaterfallError;
use waterfall::domain::ledger::ExecutionContext;
use waterfall::domain::run_config::RunConfig;
use waterfall::domain::strategy::Strategy;
use waterfall::ports::data_port::DataFeed;

pub fn dt(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

pub fn make_candle(symbol: &str, at: NaiveDateTime, close: f64) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        timestamp: at,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000,
    }
}

/// A minute series for one day: closes[i] lands at start + i minutes.
pub fn minute_series(symbol: &str, day: u32, start_h: u32, closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            make_candle(
                symbol,
                dt(day, start_h, 0) + chrono::Duration::minutes(i as i64),
                close,
            )
        })
        .collect()
}

pub struct MockFeed {
    data: HashMap<String, Vec<Candle>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    pub fn with_candles(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.data.entry(symbol.to_string()).or_default().extend(candles);
        self
    }
}

impl DataFeed for MockFeed {
    fn get_candles(
        &self,
        symbol: &str,
        _interval: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Candle>, WaterfallError> {
        let mut candles: Vec<Candle> = self
            .data
            .get(symbol)
            .map(|cs| {
                cs.iter()
                    .filter(|c| c.timestamp >= start && c.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    fn list_symbols(&self, _interval: &str) -> Result<Vec<String>, WaterfallError> {
        Ok(self.data.keys().cloned().collect())
    }
}

pub fn run_config(global_symbol: &str, start: NaiveDateTime, end: NaiveDateTime) -> RunConfig {
    RunConfig {
        participants: Vec::new(),
        global_symbol: global_symbol.to_string(),
        interval: "1m".to_string(),
        start,
        end,
        initial_capital: 10_000.0,
        unconstrained_sizing: false,
    }
}

pub fn participant(rank: u32, symbol: &str, strategy: Box<dyn Strategy>) -> Participant {
    Participant {
        rank,
        symbol: symbol.to_string(),
        strategy,
    }
}

/// Tries to open a one-lot position on every tick it is not holding.
pub struct GreedyBuyer {
    pub quantity: i64,
}

impl Strategy for GreedyBuyer {
    fn initialize(&mut self) {}

    fn on_data(&mut self, ctx: &mut dyn ExecutionContext, candle: &Candle) {
        if ctx.position(&candle.symbol) == 0 {
            let _ = ctx.buy(&candle.symbol, self.quantity, 0.0);
        }
    }
}

/// Buys on its first tick and sells after holding for `hold_ticks` ticks.
pub struct HoldFor {
    pub quantity: i64,
    pub hold_ticks: usize,
    seen_while_holding: usize,
    done: bool,
}

impl HoldFor {
    pub fn new(quantity: i64, hold_ticks: usize) -> Self {
        Self {
            quantity,
            hold_ticks,
            seen_while_holding: 0,
            done: false,
        }
    }
}

impl Strategy for HoldFor {
    fn initialize(&mut self) {
        self.seen_while_holding = 0;
        self.done = false;
    }

    fn on_data(&mut self, ctx: &mut dyn ExecutionContext, candle: &Candle) {
        let held = ctx.position(&candle.symbol);
        if held == 0 {
            if !self.done && ctx.buy(&candle.symbol, self.quantity, 0.0).is_ok() {
                self.seen_while_holding = 0;
            }
            return;
        }
        self.seen_while_holding += 1;
        if self.seen_while_holding >= self.hold_ticks && ctx.sell(&candle.symbol, held, 0.0).is_ok()
        {
            self.done = true;
        }
    }
}

/// Records what the ledger quotes for another symbol at every tick.
pub struct PriceProbe {
    pub watch: String,
    pub seen: Rc<RefCell<Vec<(NaiveDateTime, f64)>>>,
}

impl Strategy for PriceProbe {
    fn initialize(&mut self) {}

    fn on_data(&mut self, ctx: &mut dyn ExecutionContext, _candle: &Candle) {
        let quoted = ctx.price(&self.watch);
        self.seen.borrow_mut().push((ctx.now(), quoted));
    }
}

/// Never trades.
pub struct Never;

impl Strategy for Never {
    fn initialize(&mut self) {}
    fn on_data(&mut self, _ctx: &mut dyn ExecutionContext, _candle: &Candle) {}
}
