//! Threshold-oscillator mean reversion.
//!
//! Keeps a rolling window of closes and computes an RSI-form reading in
//! [0, 100]: buy the full budget when the reading sinks to the buy
//! threshold, close the whole position when it reaches the sell threshold.

use super::Strategy;
use crate::domain::candle::Candle;
use crate::domain::error::WaterfallError;
use crate::domain::ledger::ExecutionContext;
use crate::ports::config_port::ConfigPort;

/// Fraction of available cash committed on a buy signal.
const BUDGET_FRACTION: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct OscillatorConfig {
    pub period: usize,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

impl Default for OscillatorConfig {
    fn default() -> Self {
        OscillatorConfig {
            period: 14,
            buy_threshold: 30.0,
            sell_threshold: 70.0,
        }
    }
}

impl OscillatorConfig {
    pub fn from_config(config: &dyn ConfigPort, section: &str) -> Result<Self, WaterfallError> {
        let defaults = OscillatorConfig::default();
        let cfg = OscillatorConfig {
            period: config.get_int(section, "period", defaults.period as i64).max(0) as usize,
            buy_threshold: config.get_double(section, "buy_threshold", defaults.buy_threshold),
            sell_threshold: config.get_double(section, "sell_threshold", defaults.sell_threshold),
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

        if self.period < 2 {
            return Err(invalid("period", format!("must be at least 2, got {}", self.period)));
        }
        if !(0.0..=100.0).contains(&self.buy_threshold)
            || !(0.0..=100.0).contains(&self.sell_threshold)
        {
            return Err(invalid("buy_threshold", "thresholds must be within 0..100".into()));
        }
        if self.buy_threshold >= self.sell_threshold {
            return Err(invalid(
                "buy_threshold",
                format!(
                    "buy threshold {} must be below sell threshold {}",
                    self.buy_threshold, self.sell_threshold
                ),
            ));
        }
        Ok(())
    }
}

pub struct ThresholdOscillator {
    cfg: OscillatorConfig,
    closes: Vec<f64>,
}

impl ThresholdOscillator {
    pub fn new(cfg: OscillatorConfig) -> Self {
        ThresholdOscillator {
            cfg,
            closes: Vec::new(),
        }
    }

    /// RSI-form reading over the last `period` deltas. Neutral 50 while
    /// warming up; 100 when the window has no losses.
    fn reading(&self) -> f64 {
        let period = self.cfg.period;
        if self.closes.len() < period + 1 {
            return 50.0;
        }

        let window = &self.closes[self.closes.len() - (period + 1)..];
        let mut gain_sum = 0.0;
        let mut loss_sum = 0.0;
        for pair in window.windows(2) {
            let delta = pair[1] - pair[0];
            if delta > 0.0 {
                gain_sum += delta;
            } else {
                loss_sum += -delta;
            }
        }

        let avg_gain = gain_sum / period as f64;
        let avg_loss = loss_sum / period as f64;
        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

impl Strategy for ThresholdOscillator {
    fn initialize(&mut self) {
        self.closes.clear();
    }

    fn on_data(&mut self, ctx: &mut dyn ExecutionContext, candle: &Candle) {
        self.closes.push(candle.close);
        // The window only ever needs period + 1 closes.
        let keep = self.cfg.period + 1;
        if self.closes.len() > keep {
            self.closes.drain(..self.closes.len() - keep);
        }

        let reading = self.reading();
        let symbol = candle.symbol.as_str();
        let held = ctx.position(symbol);

        if reading <= self.cfg.buy_threshold && held == 0 {
            let quantity = (ctx.cash().max(0.0) * BUDGET_FRACTION / candle.close).floor() as i64;
            if quantity > 0 && ctx.buy(symbol, quantity, 0.0).is_ok() {
                ctx.log(&format!("oscillator {reading:.1} <= buy threshold, qty {quantity}"));
            }
        } else if reading >= self.cfg.sell_threshold && held > 0 && ctx.sell(symbol, held, 0.0).is_ok() {
            ctx.log(&format!("oscillator {reading:.1} >= sell threshold, sold {held}"));
        }
    }
}
