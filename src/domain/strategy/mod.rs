//! Strategy contract and the typed configuration registry.
//!
//! A strategy consumes one candle at a time for its assigned symbol and
//! issues intents through the [`ExecutionContext`]; it holds no ledger state
//! of its own. Variants are interchangeable behind the trait, so the
//! scheduler never special-cases a strategy type.

pub mod oscillator;
pub mod time_momentum;

use super::candle::Candle;
use super::error::WaterfallError;
use super::ledger::ExecutionContext;
use crate::ports::config_port::ConfigPort;

pub use oscillator::{OscillatorConfig, ThresholdOscillator};
pub use time_momentum::{Betting, Direction, TimeMomentum, TimeMomentumConfig};

pub trait Strategy {
    /// Called once before the first tick.
    fn initialize(&mut self);

    /// Called with this strategy's own symbol's candle at a master-clock
    /// tick. Position and cash effects go through `ctx` only.
    fn on_data(&mut self, ctx: &mut dyn ExecutionContext, candle: &Candle);
}

/// Validated, typed configuration for one strategy variant.
#[derive(Debug, Clone)]
pub enum StrategyConfig {
    TimeMomentum(TimeMomentumConfig),
    ThresholdOscillator(OscillatorConfig),
}

impl StrategyConfig {
    /// Parse and validate a named strategy's parameters from a config
    /// section. Unknown names are rejected here, before any data is fetched.
    pub fn from_config(
        name: &str,
        config: &dyn ConfigPort,
        section: &str,
    ) -> Result<Self, WaterfallError> {
        match name.to_lowercase().replace(' ', "_").as_str() {
            "time_momentum" => Ok(StrategyConfig::TimeMomentum(
                TimeMomentumConfig::from_config(config, section)?,
            )),
            "oscillator" | "threshold_oscillator" | "rsi" => Ok(
                StrategyConfig::ThresholdOscillator(OscillatorConfig::from_config(
                    config, section,
                )?),
            ),
            _ => Err(WaterfallError::UnknownStrategy {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::TimeMomentum(_) => "time_momentum",
            StrategyConfig::ThresholdOscillator(_) => "threshold_oscillator",
        }
    }

    /// Instantiate the strategy. `initial_capital` is the shared pool size,
    /// which fixed-size betting uses for sizing.
    pub fn build(&self, initial_capital: f64) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::TimeMomentum(cfg) => {
                Box::new(TimeMomentum::new(cfg.clone(), initial_capital))
            }
            StrategyConfig::ThresholdOscillator(cfg) => {
                Box::new(ThresholdOscillator::new(cfg.clone()))
            }
        }
    }
}
