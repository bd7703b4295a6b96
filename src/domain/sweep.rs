//! Parameter sweep: many independent simulations in parallel.
//!
//! Each combination gets its own engine, ledger and clock, so runs share no
//! mutable state and parallelize freely. The runner owns its cancellation
//! flag and progress counter; cancellation stops issuing new combinations
//! promptly while in-flight runs finish and keep their results.

use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::engine::WaterfallEngine;
use super::error::WaterfallError;
use super::run_config::{ParticipantSpec, RunConfig};
use super::strategy::{StrategyConfig, TimeMomentumConfig};
use crate::ports::data_port::DataFeed;

/// Axes of the search space. An empty axis keeps the base config's value.
#[derive(Debug, Clone, Default)]
pub struct SweepGrid {
    pub delay_minutes: Vec<i64>,
    pub target_pct: Vec<f64>,
    pub safety_stop_pct: Vec<f64>,
    pub trailing_start_pct: Vec<f64>,
    pub trailing_stop_drop: Vec<f64>,
}

fn axis<T: Copy>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

impl SweepGrid {
    /// Cross product of all axes over the base configuration.
    pub fn combinations(&self, base: &TimeMomentumConfig) -> Vec<TimeMomentumConfig> {
        let mut combos = Vec::new();
        for &delay_minutes in &axis(&self.delay_minutes, base.delay_minutes) {
            for &target_pct in &axis(&self.target_pct, base.target_pct) {
                for &safety_stop_pct in &axis(&self.safety_stop_pct, base.safety_stop_pct) {
                    for &trailing_start_pct in
                        &axis(&self.trailing_start_pct, base.trailing_start_pct)
                    {
                        for &trailing_stop_drop in
                            &axis(&self.trailing_stop_drop, base.trailing_stop_drop)
                        {
                            combos.push(TimeMomentumConfig {
                                delay_minutes,
                                target_pct,
                                safety_stop_pct,
                                trailing_start_pct,
                                trailing_stop_drop,
                                ..base.clone()
                            });
                        }
                    }
                }
            }
        }
        combos
    }
}

/// One combination's outcome, scored for ranking.
#[derive(Debug, Clone, Serialize)]
pub struct SweepOutcome {
    pub config: TimeMomentumConfig,
    pub score: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub win_rate: f64,
    pub total_trades: usize,
}

pub struct SweepRunner {
    cancel: Arc<AtomicBool>,
    completed: AtomicUsize,
}

impl Default for SweepRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepRunner {
    pub fn new() -> Self {
        SweepRunner {
            cancel: Arc::new(AtomicBool::new(false)),
            completed: AtomicUsize::new(0),
        }
    }

    /// Shared handle a caller can trip to stop issuing new combinations.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Number of combinations finished so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Run every combination of `grid` over `base` as an independent
    /// single-participant simulation on the run's global symbol. Returns
    /// outcomes ranked by score, best first; cancelled combinations are
    /// simply absent.
    pub fn run(
        &self,
        feed: &(dyn DataFeed + Sync),
        run: &RunConfig,
        base: &TimeMomentumConfig,
        grid: &SweepGrid,
    ) -> Result<Vec<SweepOutcome>, WaterfallError> {
        let combos = grid.combinations(base);

        let mut outcomes: Vec<SweepOutcome> = combos
            .into_par_iter()
            .map(|cfg| -> Result<Option<SweepOutcome>, WaterfallError> {
                if self.cancel.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                cfg.validate("sweep")?;

                let combo_run = RunConfig {
                    participants: vec![ParticipantSpec {
                        rank: 1,
                        symbol: run.global_symbol.clone(),
                        strategy: StrategyConfig::TimeMomentum(cfg.clone()),
                    }],
                    ..run.clone()
                };

                let engine = WaterfallEngine::new(feed);
                let result = engine.run_integrated(&combo_run)?;
                self.completed.fetch_add(1, Ordering::Relaxed);

                Ok(Some(SweepOutcome {
                    config: cfg,
                    score: result.total_return_pct,
                    total_return_pct: result.total_return_pct,
                    max_drawdown_pct: result.max_drawdown_pct,
                    win_rate: result.stats.win_rate,
                    total_trades: result.stats.total_trades,
                }))
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        outcomes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(outcomes)
    }
}
