//! Run configuration: participant roster plus the shared run parameters.
//!
//! Configuration is an immutable input assembled before the engine starts;
//! validation happens here so a bad roster never reaches the data feed.

use chrono::NaiveDateTime;

use super::error::WaterfallError;
use super::strategy::StrategyConfig;
use crate::ports::config_port::ConfigPort;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DEFAULT_INITIAL_CAPITAL: f64 = 10_000_000.0;

/// One strategy slot: priority rank, assigned symbol, validated strategy
/// parameters. Rank is fixed for the run; lower rank wins ties.
#[derive(Debug, Clone)]
pub struct ParticipantSpec {
    pub rank: u32,
    pub symbol: String,
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Sorted ascending by rank.
    pub participants: Vec<ParticipantSpec>,
    pub global_symbol: String,
    pub interval: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub initial_capital: f64,
    /// Lets buys exceed cash (cash may go negative). A documented sizing
    /// mode for simulations, off by default.
    pub unconstrained_sizing: bool,
}

fn required(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, WaterfallError> {
    config
        .get_string(section, key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WaterfallError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        })
}

fn parse_timestamp(section: &str, key: &str, value: &str) -> Result<NaiveDateTime, WaterfallError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|e| {
        WaterfallError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("expected YYYY-MM-DDTHH:MM:SS, got {value}: {e}"),
        }
    })
}

impl RunConfig {
    /// Assemble a run from a `[run]` section plus one `[rank.N]` section per
    /// participant.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WaterfallError> {
        let global_symbol = required(config, "run", "global_symbol")?;
        let interval = required(config, "run", "interval")?;
        let start = parse_timestamp("run", "start", &required(config, "run", "start")?)?;
        let end = parse_timestamp("run", "end", &required(config, "run", "end")?)?;

        let mut participants = Vec::new();
        for section in config.sections() {
            let Some(rank_str) = section.strip_prefix("rank.") else {
                continue;
            };
            let rank: u32 = rank_str.parse().map_err(|_| WaterfallError::ConfigInvalid {
                section: section.clone(),
                key: "rank".to_string(),
                reason: format!("section suffix {rank_str} is not a rank number"),
            })?;

            let symbol = config
                .get_string(&section, "symbol")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| global_symbol.clone());
            let strategy_name = required(config, &section, "strategy")?;
            let strategy = StrategyConfig::from_config(&strategy_name, config, &section)?;

            participants.push(ParticipantSpec {
                rank,
                symbol,
                strategy,
            });
        }
        participants.sort_by_key(|p| p.rank);

        let run = RunConfig {
            participants,
            global_symbol,
            interval,
            start,
            end,
            initial_capital: config.get_double("run", "initial_capital", DEFAULT_INITIAL_CAPITAL),
            unconstrained_sizing: config.get_bool("run", "unconstrained_sizing", false),
        };
        run.validate()?;
        Ok(run)
    }

    pub fn validate(&self) -> Result<(), WaterfallError> {
        let invalid = |key: &str, reason: String| WaterfallError::ConfigInvalid {
            section: "run".to_string(),
            key: key.to_string(),
            reason,
        };

        if self.participants.is_empty() {
            return Err(invalid(
                "participants",
                "at least one [rank.N] section is required".into(),
            ));
        }
        for pair in self.participants.windows(2) {
            if pair[0].rank == pair[1].rank {
                return Err(invalid(
                    "participants",
                    format!("duplicate rank {}", pair[0].rank),
                ));
            }
        }
        if self.end <= self.start {
            return Err(invalid(
                "end",
                format!("{} is not after start {}", self.end, self.start),
            ));
        }
        if self.initial_capital <= 0.0 {
            return Err(invalid(
                "initial_capital",
                format!("must be positive, got {}", self.initial_capital),
            ));
        }
        Ok(())
    }

    /// Rank 1's symbol (lowest rank present), falling back to the global
    /// symbol. Used as the reference feed for activity statistics.
    pub fn primary_symbol(&self) -> &str {
        self.participants
            .first()
            .map(|p| p.symbol.as_str())
            .unwrap_or(self.global_symbol.as_str())
    }
}
