//! Shared execution ledger: cash, holdings, trade log, equity curve.
//!
//! The ledger is the single authority on money and position state. Every
//! competing strategy goes through [`ExecutionContext`], which is also the
//! seam a live-trading context would implement; [`Ledger`] is the replay
//! implementation. Centralizing the single-position rule and the price
//! fallback here keeps them uniform no matter how many ranks compete.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use super::error::ExecutionError;
use super::trade::{EquityPoint, Trade, TradeSide};

/// Capability set strategies trade through.
pub trait ExecutionContext {
    /// Current master-clock timestamp.
    fn now(&self) -> NaiveDateTime;

    /// Close of `symbol` at the current tick if it had a candle here, else
    /// the last previously observed close. 0.0 only if never observed.
    fn price(&self, symbol: &str) -> f64;

    fn cash(&self) -> f64;

    /// Held quantity of `symbol`, 0 when not held.
    fn position(&self, symbol: &str) -> i64;

    /// Market buy. `limit > 0` overrides the resolved price.
    fn buy(&mut self, symbol: &str, quantity: i64, limit: f64) -> Result<Trade, ExecutionError>;

    /// Market sell. `limit > 0` overrides the resolved price.
    fn sell(&mut self, symbol: &str, quantity: i64, limit: f64) -> Result<Trade, ExecutionError>;

    /// Append a line to the run log, stamped with the current clock.
    fn log(&mut self, message: &str);
}

/// Backtest ledger shared by all participants of one run.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub cash: f64,
    pub initial_capital: f64,
    holdings: HashMap<String, i64>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    last_price: HashMap<String, f64>,
    logs: Vec<String>,
    clock: NaiveDateTime,
    active_rank: u32,
    owner_rank: Option<u32>,
    /// When set, buys skip the cash check and cash may go negative. This is
    /// a documented sizing mode, not an accounting leak.
    unconstrained_sizing: bool,
}

impl Ledger {
    pub fn new(initial_capital: f64, unconstrained_sizing: bool) -> Self {
        Ledger {
            cash: initial_capital,
            initial_capital,
            holdings: HashMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            last_price: HashMap::new(),
            logs: Vec::new(),
            clock: NaiveDateTime::default(),
            active_rank: 0,
            owner_rank: None,
            unconstrained_sizing,
        }
    }

    /// Advance the master clock. Called by the scheduler once per tick,
    /// before any candle is observed or any strategy runs.
    pub fn set_clock(&mut self, ts: NaiveDateTime) {
        self.clock = ts;
    }

    /// Tag subsequent executions with the rank currently being dispatched.
    pub fn set_active_rank(&mut self, rank: u32) {
        self.active_rank = rank;
    }

    /// Record `symbol`'s close at the current tick. Feeds the price cache
    /// that [`ExecutionContext::price`] reads; symbols without a candle at
    /// this tick keep their previous close (the last-known fallback).
    pub fn observe(&mut self, symbol: &str, close: f64) {
        self.last_price.insert(symbol.to_string(), close);
    }

    /// True while any symbol is held with positive quantity.
    pub fn occupied(&self) -> bool {
        self.holdings.values().any(|&q| q > 0)
    }

    /// Rank whose buy opened the currently-open position.
    pub fn owner_rank(&self) -> Option<u32> {
        self.owner_rank
    }

    pub fn holdings(&self) -> &HashMap<String, i64> {
        &self.holdings
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Cash plus holdings marked at last known prices.
    pub fn equity(&self) -> f64 {
        let position_value: f64 = self
            .holdings
            .iter()
            .map(|(symbol, &qty)| qty as f64 * self.last_price.get(symbol).copied().unwrap_or(0.0))
            .sum();
        self.cash + position_value
    }

    /// Append one equity point at the current clock. Called exactly once per
    /// master-clock tick, whether or not anything traded.
    pub fn mark_to_market(&mut self) {
        let point = EquityPoint {
            timestamp: self.clock,
            equity: self.equity(),
        };
        self.equity_curve.push(point);
    }

    fn resolve_price(&self, symbol: &str, limit: f64) -> f64 {
        if limit > 0.0 {
            limit
        } else {
            self.last_price.get(symbol).copied().unwrap_or(0.0)
        }
    }
}

impl ExecutionContext for Ledger {
    fn now(&self) -> NaiveDateTime {
        self.clock
    }

    fn price(&self, symbol: &str) -> f64 {
        self.last_price.get(symbol).copied().unwrap_or(0.0)
    }

    fn cash(&self) -> f64 {
        self.cash
    }

    fn position(&self, symbol: &str) -> i64 {
        self.holdings.get(symbol).copied().unwrap_or(0)
    }

    fn buy(&mut self, symbol: &str, quantity: i64, limit: f64) -> Result<Trade, ExecutionError> {
        // Single-position rule: a different held symbol blocks every buyer.
        if let Some((held, _)) = self
            .holdings
            .iter()
            .find(|&(sym, &qty)| qty > 0 && sym.as_str() != symbol)
        {
            let held = held.clone();
            self.log(&format!(
                "BUY REJECTED: system holds {held}, cannot buy {symbol}"
            ));
            return Err(ExecutionError::SystemOccupied { held });
        }

        let exec_price = self.resolve_price(symbol, limit);
        if exec_price <= 0.0 {
            self.log(&format!("BUY FAILED: invalid price for {symbol}"));
            return Err(ExecutionError::InvalidPrice {
                symbol: symbol.to_string(),
                price: exec_price,
            });
        }

        let cost = exec_price * quantity as f64;
        if !self.unconstrained_sizing && cost > self.cash {
            self.log(&format!(
                "BUY FAILED: insufficient cash ({:.0} < {:.0})",
                self.cash, cost
            ));
            return Err(ExecutionError::InsufficientCash {
                needed: cost,
                available: self.cash,
            });
        }

        let opened = !self.occupied();
        self.cash -= cost;
        *self.holdings.entry(symbol.to_string()).or_insert(0) += quantity;
        if opened {
            self.owner_rank = Some(self.active_rank);
        }

        let trade = Trade {
            side: TradeSide::Buy,
            symbol: symbol.to_string(),
            price: exec_price,
            quantity,
            timestamp: self.clock,
            rank: self.active_rank,
        };
        self.trades.push(trade.clone());
        self.log(&format!("BUY EXECUTED: {quantity} {symbol} @ {exec_price}"));
        Ok(trade)
    }

    fn sell(&mut self, symbol: &str, quantity: i64, limit: f64) -> Result<Trade, ExecutionError> {
        let held = self.holdings.get(symbol).copied().unwrap_or(0);
        if held < quantity {
            self.log("SELL FAILED: insufficient holdings");
            return Err(ExecutionError::InsufficientHoldings {
                symbol: symbol.to_string(),
                held,
                requested: quantity,
            });
        }

        let exec_price = self.resolve_price(symbol, limit);
        self.cash += exec_price * quantity as f64;

        let remaining = held - quantity;
        if remaining <= 0 {
            self.holdings.remove(symbol);
        } else {
            self.holdings.insert(symbol.to_string(), remaining);
        }
        if !self.occupied() {
            self.owner_rank = None;
        }

        let trade = Trade {
            side: TradeSide::Sell,
            symbol: symbol.to_string(),
            price: exec_price,
            quantity,
            timestamp: self.clock,
            rank: self.active_rank,
        };
        self.trades.push(trade.clone());
        self.log(&format!("SELL EXECUTED: {quantity} {symbol} @ {exec_price}"));
        Ok(trade)
    }

    fn log(&mut self, message: &str) {
        self.logs
            .push(format!("[{}] {message}", self.clock.format("%Y-%m-%d %H:%M")));
    }
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

    fn make_ledger(cash: f64) -> Ledger {
        let mut ledger = Ledger::new(cash, false);
        ledger.set_clock(ts(9, 0));
        ledger.set_active_rank(1);
        ledger
    }

    #[test]
    fn new_ledger_is_flat() {
        let ledger = make_ledger(1_000_000.0);
        assert!((ledger.cash - 1_000_000.0).abs() < f64::EPSILON);
        assert!(!ledger.occupied());
        assert!(ledger.owner_rank().is_none());
        assert!(ledger.trades().is_empty());
        assert!(ledger.equity_curve().is_empty());
    }

    #[test]
    fn buy_debits_cash_and_credits_holdings() {
        let mut ledger = make_ledger(1_000_000.0);
        ledger.observe("005930", 70_000.0);

        let trade = ledger.buy("005930", 10, 0.0).unwrap();

        assert_eq!(trade.side, TradeSide::Buy);
        assert!((trade.price - 70_000.0).abs() < f64::EPSILON);
        assert!((ledger.cash - 300_000.0).abs() < f64::EPSILON);
        assert_eq!(ledger.position("005930"), 10);
        assert_eq!(ledger.owner_rank(), Some(1));
        assert_eq!(ledger.trades().len(), 1);
    }

    #[test]
    fn buy_uses_explicit_limit_price() {
        let mut ledger = make_ledger(1_000_000.0);
        ledger.observe("005930", 70_000.0);

        let trade = ledger.buy("005930", 1, 65_000.0).unwrap();
        assert!((trade.price - 65_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn buy_rejected_when_other_symbol_held() {
        let mut ledger = make_ledger(1_000_000.0);
        ledger.observe("005930", 100.0);
        ledger.observe("000660", 100.0);
        ledger.buy("005930", 10, 0.0).unwrap();

        ledger.set_active_rank(2);
        let err = ledger.buy("000660", 10, 0.0).unwrap_err();
        assert!(matches!(err, ExecutionError::SystemOccupied { held } if held == "005930"));
        assert_eq!(ledger.position("000660"), 0);
        // Owner is still the opener.
        assert_eq!(ledger.owner_rank(), Some(1));
    }

    #[test]
    fn adding_to_own_position_is_allowed() {
        let mut ledger = make_ledger(1_000_000.0);
        ledger.observe("005930", 100.0);
        ledger.buy("005930", 10, 0.0).unwrap();
        ledger.buy("005930", 5, 0.0).unwrap();
        assert_eq!(ledger.position("005930"), 15);
    }

    #[test]
    fn buy_fails_without_any_observed_price() {
        let mut ledger = make_ledger(1_000_000.0);
        let err = ledger.buy("005930", 10, 0.0).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidPrice { .. }));
    }

    #[test]
    fn buy_fails_on_insufficient_cash() {
        let mut ledger = make_ledger(500.0);
        ledger.observe("005930", 100.0);
        let err = ledger.buy("005930", 10, 0.0).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::InsufficientCash { needed, available }
                if (needed - 1000.0).abs() < f64::EPSILON
                    && (available - 500.0).abs() < f64::EPSILON
        ));
        assert!(ledger.trades().is_empty());
        assert!((ledger.cash - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unconstrained_sizing_allows_negative_cash() {
        let mut ledger = Ledger::new(500.0, true);
        ledger.set_clock(ts(9, 0));
        ledger.set_active_rank(1);
        ledger.observe("005930", 100.0);

        ledger.buy("005930", 10, 0.0).unwrap();
        assert!((ledger.cash - (-500.0)).abs() < f64::EPSILON);
        assert_eq!(ledger.position("005930"), 10);
    }

    #[test]
    fn sell_credits_cash_and_clears_entry_at_zero() {
        let mut ledger = make_ledger(10_000.0);
        ledger.observe("005930", 100.0);
        ledger.buy("005930", 10, 0.0).unwrap();

        ledger.observe("005930", 110.0);
        let trade = ledger.sell("005930", 10, 0.0).unwrap();

        assert_eq!(trade.side, TradeSide::Sell);
        assert!((ledger.cash - 10_100.0).abs() < f64::EPSILON);
        assert_eq!(ledger.position("005930"), 0);
        assert!(!ledger.holdings().contains_key("005930"));
        assert!(ledger.owner_rank().is_none());
    }

    #[test]
    fn partial_sell_keeps_owner() {
        let mut ledger = make_ledger(10_000.0);
        ledger.observe("005930", 100.0);
        ledger.buy("005930", 10, 0.0).unwrap();

        ledger.sell("005930", 4, 0.0).unwrap();
        assert_eq!(ledger.position("005930"), 6);
        assert_eq!(ledger.owner_rank(), Some(1));
    }

    #[test]
    fn sell_fails_on_insufficient_holdings() {
        let mut ledger = make_ledger(10_000.0);
        ledger.observe("005930", 100.0);
        ledger.buy("005930", 5, 0.0).unwrap();

        let err = ledger.sell("005930", 10, 0.0).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::InsufficientHoldings { held: 5, requested: 10, .. }
        ));
    }

    #[test]
    fn price_falls_back_to_last_observed() {
        let mut ledger = make_ledger(10_000.0);
        assert!((ledger.price("005930") - 0.0).abs() < f64::EPSILON);

        ledger.observe("005930", 100.0);
        // Next tick: no candle for 005930, cache keeps the stale close.
        ledger.set_clock(ts(9, 1));
        assert!((ledger.price("005930") - 100.0).abs() < f64::EPSILON);

        ledger.set_clock(ts(9, 2));
        ledger.observe("005930", 103.0);
        assert!((ledger.price("005930") - 103.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mark_to_market_appends_one_point_per_tick() {
        let mut ledger = make_ledger(10_000.0);
        ledger.observe("005930", 100.0);
        ledger.buy("005930", 10, 0.0).unwrap();
        ledger.mark_to_market();

        ledger.set_clock(ts(9, 1));
        ledger.observe("005930", 120.0);
        ledger.mark_to_market();

        let curve = ledger.equity_curve();
        assert_eq!(curve.len(), 2);
        assert!((curve[0].equity - 10_000.0).abs() < f64::EPSILON);
        assert!((curve[1].equity - 10_200.0).abs() < f64::EPSILON);
        assert_eq!(curve[1].timestamp, ts(9, 1));
    }

    #[test]
    fn trades_are_tagged_with_active_rank() {
        let mut ledger = make_ledger(10_000.0);
        ledger.observe("005930", 100.0);

        ledger.set_active_rank(3);
        ledger.buy("005930", 1, 0.0).unwrap();
        assert_eq!(ledger.trades()[0].rank, 3);
        assert_eq!(ledger.owner_rank(), Some(3));
    }

    #[test]
    fn log_lines_are_clock_stamped() {
        let mut ledger = make_ledger(10_000.0);
        ledger.log("hello");
        assert_eq!(ledger.logs()[0], "[2024-01-02 09:00] hello");
    }
}
