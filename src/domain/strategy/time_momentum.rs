//! Time-delayed momentum entry with trailing-stop / time-stop exits.
//!
//! Each trading day: take a reference price at `start_time`, check the move
//! once at `start_time + delay_minutes` (a strict snapshot, never re-checked
//! later in the day), and enter when it clears `target_pct` in the
//! configured direction. An open position is closed by the safety stop, the
//! trailing stop once armed, or unconditionally at `stop_time`.

use chrono::{Duration, NaiveDate, NaiveTime};

use super::Strategy;
use crate::domain::candle::Candle;
use crate::domain::error::WaterfallError;
use crate::domain::ledger::ExecutionContext;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Momentum: enter when the move from the reference is up by the target.
    Rise,
    /// Dip-buy: enter when the move is down by the target.
    Fall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Betting {
    /// Size from the shared initial capital every day.
    Fixed,
    /// Size from current cash (compounding).
    Compound,
}

/// Fraction of the sizing budget actually spent, leaving headroom for price
/// drift between signal and fill.
const BUDGET_FRACTION: f64 = 0.99;

#[derive(Debug, Clone, serde::Serialize)]
pub struct TimeMomentumConfig {
    pub start_time: NaiveTime,
    pub stop_time: NaiveTime,
    pub delay_minutes: i64,
    pub direction: Direction,
    /// Entry threshold in percent, always positive.
    pub target_pct: f64,
    /// Loss from entry that forces an exit, in percent, always positive.
    pub safety_stop_pct: f64,
    /// Gain from entry that arms the trailing stop, in percent.
    pub trailing_start_pct: f64,
    /// Retreat from the peak that fires the trailing stop, in percent.
    pub trailing_stop_drop: f64,
    pub betting: Betting,
}

impl Default for TimeMomentumConfig {
    fn default() -> Self {
        TimeMomentumConfig {
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            stop_time: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            delay_minutes: 10,
            direction: Direction::Rise,
            target_pct: 2.0,
            safety_stop_pct: 3.0,
            trailing_start_pct: 5.0,
            trailing_stop_drop: 2.0,
            betting: Betting::Fixed,
        }
    }
}

impl TimeMomentumConfig {
    /// Read the section's keys, falling back to defaults for absent ones.
    /// Present-but-invalid values are errors, not silent fallbacks.
    pub fn from_config(config: &dyn ConfigPort, section: &str) -> Result<Self, WaterfallError> {
        let defaults = TimeMomentumConfig::default();

        let start_time = parse_time(config, section, "start_time", defaults.start_time)?;
        let stop_time = parse_time(config, section, "stop_time", defaults.stop_time)?;

        let direction = match config.get_string(section, "direction") {
            None => defaults.direction,
            Some(v) => match v.to_lowercase().as_str() {
                "rise" => Direction::Rise,
                "fall" => Direction::Fall,
                other => {
                    return Err(WaterfallError::ConfigInvalid {
                        section: section.to_string(),
                        key: "direction".to_string(),
                        reason: format!("expected rise or fall, got {other}"),
                    });
                }
            },
        };

        let betting = match config.get_string(section, "betting_strategy") {
            None => defaults.betting,
            Some(v) => match v.to_lowercase().as_str() {
                "fixed" => Betting::Fixed,
                "compound" => Betting::Compound,
                other => {
                    return Err(WaterfallError::ConfigInvalid {
                        section: section.to_string(),
                        key: "betting_strategy".to_string(),
                        reason: format!("expected fixed or compound, got {other}"),
                    });
                }
            },
        };

        let cfg = TimeMomentumConfig {
            start_time,
            stop_time,
            delay_minutes: config.get_int(section, "delay_minutes", defaults.delay_minutes),
            direction,
            target_pct: config
                .get_double(section, "target_percent", defaults.target_pct)
                .abs(),
            safety_stop_pct: config
                .get_double(section, "safety_stop_percent", defaults.safety_stop_pct)
                .abs(),
            trailing_start_pct: config.get_double(
                section,
                "trailing_start_percent",
                defaults.trailing_start_pct,
            ),
            trailing_stop_drop: config.get_double(
                section,
                "trailing_stop_drop",
                defaults.trailing_stop_drop,
            ),
            betting,
        };
        cfg.validate(section)?;
        Ok(cfg)
    }

    pub fn validate(&self, section: &str) -> Result<(), WaterfallError> {
        let invalid = |key: &str, reason: String| WaterfallError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason,
        };

        if self.stop_time <= self.start_time {
            return Err(invalid(
                "stop_time",
                format!("{} is not after start_time {}", self.stop_time, self.start_time),
            ));
        }
        if self.delay_minutes < 0 {
            return Err(invalid("delay_minutes", "must not be negative".into()));
        }
        for (key, value) in [
            ("target_percent", self.target_pct),
            ("safety_stop_percent", self.safety_stop_pct),
            ("trailing_start_percent", self.trailing_start_pct),
            ("trailing_stop_drop", self.trailing_stop_drop),
        ] {
            if value <= 0.0 {
                return Err(invalid(key, format!("must be positive, got {value}")));
            }
        }
        Ok(())
    }
}

fn parse_time(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: NaiveTime,
) -> Result<NaiveTime, WaterfallError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(v) => NaiveTime::parse_from_str(&v, "%H:%M").map_err(|e| {
            WaterfallError::ConfigInvalid {
                section: section.to_string(),
                key: key.to_string(),
                reason: format!("expected HH:MM, got {v}: {e}"),
            }
        }),
    }
}

pub struct TimeMomentum {
    cfg: TimeMomentumConfig,
    initial_capital: f64,
    // Thresholds as fractions, derived once in initialize().
    target: f64,
    safety_stop: f64,
    trailing_start: f64,
    trailing_drop: f64,
    reference_price: Option<f64>,
    holding: bool,
    entry_price: f64,
    peak_price: f64,
    trailing_active: bool,
    checked_today: bool,
    last_trade_date: Option<NaiveDate>,
    current_date: Option<NaiveDate>,
}

impl TimeMomentum {
    pub fn new(cfg: TimeMomentumConfig, initial_capital: f64) -> Self {
        TimeMomentum {
            cfg,
            initial_capital,
            target: 0.0,
            safety_stop: 0.0,
            trailing_start: 0.0,
            trailing_drop: 0.0,
            reference_price: None,
            holding: false,
            entry_price: 0.0,
            peak_price: 0.0,
            trailing_active: false,
            checked_today: false,
            last_trade_date: None,
            current_date: None,
        }
    }

    fn exit(&mut self, ctx: &mut dyn ExecutionContext, symbol: &str, reason: &str) {
        let qty = ctx.position(symbol);
        if qty > 0 && ctx.sell(symbol, qty, 0.0).is_ok() {
            self.holding = false;
            self.trailing_active = false;
            ctx.log(&format!("{reason}: sold {qty}"));
        }
    }
}

impl Strategy for TimeMomentum {
    fn initialize(&mut self) {
        self.target = self.cfg.target_pct / 100.0;
        self.safety_stop = -(self.cfg.safety_stop_pct / 100.0);
        self.trailing_start = self.cfg.trailing_start_pct / 100.0;
        self.trailing_drop = self.cfg.trailing_stop_drop / 100.0;
        self.reference_price = None;
        self.holding = false;
        self.entry_price = 0.0;
        self.peak_price = 0.0;
        self.trailing_active = false;
        self.checked_today = false;
        self.last_trade_date = None;
        self.current_date = None;
    }

    fn on_data(&mut self, ctx: &mut dyn ExecutionContext, candle: &Candle) {
        let now = ctx.now();
        let today = now.date();
        let price = candle.close;
        let symbol = candle.symbol.as_str();

        // Daily reset. The holding flag is re-derived from the ledger so an
        // overnight position stays managed.
        if self.current_date != Some(today) {
            self.current_date = Some(today);
            self.reference_price = None;
            self.checked_today = false;
            self.holding = ctx.position(symbol) > 0;
        }

        // Reference price: the first candle at or after the session start.
        if now.time() >= self.cfg.start_time && self.reference_price.is_none() {
            self.reference_price = Some(price);
            ctx.log(&format!(
                "reference price {price} set at {}",
                now.time().format("%H:%M")
            ));
        }

        // Entry: one strict snapshot at start_time + delay, never revisited
        // later in the day.
        let trigger_at =
            today.and_time(self.cfg.start_time) + Duration::minutes(self.cfg.delay_minutes);
        let already_traded = self.last_trade_date == Some(today);

        if !self.holding && !already_traded && !self.checked_today && now >= trigger_at {
            if let Some(reference) = self.reference_price {
                self.checked_today = true;
                let change = (price - reference) / reference;
                let should_buy = match self.cfg.direction {
                    Direction::Fall => change <= -self.target,
                    Direction::Rise => change >= self.target,
                };

                if should_buy {
                    let budget = match self.cfg.betting {
                        Betting::Fixed => self.initial_capital * BUDGET_FRACTION,
                        Betting::Compound => ctx.cash().max(0.0) * BUDGET_FRACTION,
                    };
                    let quantity = (budget / price).floor() as i64;

                    if quantity > 0 && ctx.buy(symbol, quantity, 0.0).is_ok() {
                        self.holding = true;
                        self.entry_price = price;
                        self.peak_price = price;
                        self.trailing_active = false;
                        self.last_trade_date = Some(today);
                        ctx.log(&format!(
                            "entry triggered: change {:.2}% vs target {:.2}%, qty {quantity}",
                            change * 100.0,
                            self.cfg.target_pct
                        ));
                    }
                } else {
                    ctx.log(&format!(
                        "entry condition failed: change {:.2}% vs target {:.2}%",
                        change * 100.0,
                        self.cfg.target_pct
                    ));
                }
            }
        }

        // Exit management for the open position.
        if self.holding && self.entry_price > 0.0 {
            if price > self.peak_price {
                self.peak_price = price;
            }

            let current_return = (price - self.entry_price) / self.entry_price;
            if current_return <= self.safety_stop {
                self.exit(ctx, symbol, "safety stop hit");
                return;
            }

            if !self.trailing_active && current_return >= self.trailing_start {
                self.trailing_active = true;
                ctx.log("trailing stop armed");
            }
            if self.trailing_active {
                let drop_from_peak = (self.peak_price - price) / self.peak_price;
                if drop_from_peak >= self.trailing_drop {
                    self.exit(ctx, symbol, "trailing stop hit");
                    return;
                }
            }

            if now.time() >= self.cfg.stop_time {
                self.exit(ctx, symbol, "time stop (end of day)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::Ledger;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn candle(symbol: &str, ts: NaiveDateTime, close: f64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000,
        }
    }

    fn step(strategy: &mut TimeMomentum, ledger: &mut Ledger, c: &Candle) {
        ledger.set_clock(c.timestamp);
        ledger.observe(&c.symbol, c.close);
        strategy.on_data(ledger, c);
    }

    fn make_strategy(cfg: TimeMomentumConfig) -> TimeMomentum {
        let mut s = TimeMomentum::new(cfg, 1_000_000.0);
        s.initialize();
        s
    }

    fn make_ledger() -> Ledger {
        let mut ledger = Ledger::new(1_000_000.0, false);
        ledger.set_active_rank(1);
        ledger
    }

    #[test]
    fn enters_when_rise_clears_target() {
        let mut s = make_strategy(TimeMomentumConfig::default());
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 103.0));

        assert_eq!(ledger.trades().len(), 1);
        assert!(ledger.position("A") > 0);
        // 99% of 1M at 103/share.
        assert_eq!(ledger.position("A"), (990_000.0 / 103.0) as i64);
    }

    #[test]
    fn no_entry_below_target() {
        let mut s = make_strategy(TimeMomentumConfig::default());
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 101.0));

        assert!(ledger.trades().is_empty());
    }

    #[test]
    fn snapshot_check_is_not_revisited_later() {
        let mut s = make_strategy(TimeMomentumConfig::default());
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        // Below target at the trigger minute; the day is now spent.
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 101.0));
        // Target cleared later, but the snapshot was already taken.
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 30), 106.0));

        assert!(ledger.trades().is_empty());
    }

    #[test]
    fn fall_direction_buys_the_dip() {
        let cfg = TimeMomentumConfig {
            direction: Direction::Fall,
            ..TimeMomentumConfig::default()
        };
        let mut s = make_strategy(cfg);
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 97.5));

        assert_eq!(ledger.trades().len(), 1);
    }

    #[test]
    fn safety_stop_exits_position() {
        let mut s = make_strategy(TimeMomentumConfig::default());
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 103.0));
        assert!(ledger.position("A") > 0);

        // 3.2% below the 103.0 entry.
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 30), 99.7));

        assert_eq!(ledger.position("A"), 0);
        assert_eq!(ledger.trades().len(), 2);
    }

    #[test]
    fn trailing_stop_arms_then_fires() {
        let mut s = make_strategy(TimeMomentumConfig::default());
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 103.0));
        // +5.8% from entry arms the trailing stop; peak 109.
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 30), 109.0));
        assert!(ledger.position("A") > 0);
        // 2.2% off the peak fires it.
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 45), 106.6));

        assert_eq!(ledger.position("A"), 0);
    }

    #[test]
    fn time_stop_closes_at_session_end() {
        let mut s = make_strategy(TimeMomentumConfig::default());
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 103.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 15, 0), 104.0));

        assert_eq!(ledger.position("A"), 0);
        assert_eq!(ledger.trades().len(), 2);
    }

    #[test]
    fn one_entry_per_day_after_round_trip() {
        let mut s = make_strategy(TimeMomentumConfig::default());
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 103.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 30), 99.7)); // stopped out
        // Another qualifying move the same day must not re-enter.
        step(&mut s, &mut ledger, &candle("A", at(2, 10, 0), 103.0));

        assert_eq!(ledger.trades().len(), 2);
    }

    #[test]
    fn reference_resets_on_new_day() {
        let mut s = make_strategy(TimeMomentumConfig::default());
        let mut ledger = make_ledger();

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 101.0));
        assert!(ledger.trades().is_empty());

        // Next day: new reference at 101, +3% clears the target again.
        step(&mut s, &mut ledger, &candle("A", at(3, 9, 0), 101.0));
        step(&mut s, &mut ledger, &candle("A", at(3, 9, 10), 104.1));

        assert_eq!(ledger.trades().len(), 1);
    }

    #[test]
    fn compound_betting_sizes_from_cash() {
        let cfg = TimeMomentumConfig {
            betting: Betting::Compound,
            ..TimeMomentumConfig::default()
        };
        let mut s = TimeMomentum::new(cfg, 1_000_000.0);
        s.initialize();
        let mut ledger = Ledger::new(500_000.0, false);
        ledger.set_active_rank(1);

        step(&mut s, &mut ledger, &candle("A", at(2, 9, 0), 100.0));
        step(&mut s, &mut ledger, &candle("A", at(2, 9, 10), 103.0));

        // Sized from the 500k cash, not the 1M initial capital.
        assert_eq!(ledger.position("A"), (495_000.0 / 103.0) as i64);
    }

    mod config {
        use super::*;
        use crate::adapters::file_config_adapter::FileConfigAdapter;

        #[test]
        fn defaults_apply_when_keys_absent() {
            let adapter = FileConfigAdapter::from_string("[rank.1]\n").unwrap();
            let cfg = TimeMomentumConfig::from_config(&adapter, "rank.1").unwrap();
            assert_eq!(cfg.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
            assert_eq!(cfg.delay_minutes, 10);
            assert!((cfg.target_pct - 2.0).abs() < f64::EPSILON);
            assert_eq!(cfg.betting, Betting::Fixed);
        }

        #[test]
        fn parses_full_section() {
            let adapter = FileConfigAdapter::from_string(
                "[rank.1]\nstart_time = 10:00\nstop_time = 14:30\ndelay_minutes = 5\n\
                 direction = fall\ntarget_percent = 1.5\nsafety_stop_percent = 2\n\
                 trailing_start_percent = 4\ntrailing_stop_drop = 1\nbetting_strategy = compound\n",
            )
            .unwrap();
            let cfg = TimeMomentumConfig::from_config(&adapter, "rank.1").unwrap();
            assert_eq!(cfg.start_time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
            assert_eq!(cfg.direction, Direction::Fall);
            assert!((cfg.target_pct - 1.5).abs() < f64::EPSILON);
            assert_eq!(cfg.betting, Betting::Compound);
        }

        #[test]
        fn negative_target_is_normalized_positive() {
            let adapter =
                FileConfigAdapter::from_string("[rank.1]\ntarget_percent = -2.5\n").unwrap();
            let cfg = TimeMomentumConfig::from_config(&adapter, "rank.1").unwrap();
            assert!((cfg.target_pct - 2.5).abs() < f64::EPSILON);
        }

        #[test]
        fn malformed_time_is_an_error() {
            let adapter =
                FileConfigAdapter::from_string("[rank.1]\nstart_time = morning\n").unwrap();
            let err = TimeMomentumConfig::from_config(&adapter, "rank.1").unwrap_err();
            assert!(matches!(err, WaterfallError::ConfigInvalid { key, .. } if key == "start_time"));
        }

        #[test]
        fn stop_before_start_is_an_error() {
            let adapter = FileConfigAdapter::from_string(
                "[rank.1]\nstart_time = 10:00\nstop_time = 09:30\n",
            )
            .unwrap();
            let err = TimeMomentumConfig::from_config(&adapter, "rank.1").unwrap_err();
            assert!(matches!(err, WaterfallError::ConfigInvalid { key, .. } if key == "stop_time"));
        }

        #[test]
        fn unknown_direction_is_an_error() {
            let adapter =
                FileConfigAdapter::from_string("[rank.1]\ndirection = sideways\n").unwrap();
            let err = TimeMomentumConfig::from_config(&adapter, "rank.1").unwrap_err();
            assert!(matches!(err, WaterfallError::ConfigInvalid { key, .. } if key == "direction"));
        }
    }
}
