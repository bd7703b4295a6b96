//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvFeed;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::engine::WaterfallEngine;
use crate::domain::error::WaterfallError;
use crate::domain::run_config::RunConfig;
use crate::domain::strategy::{StrategyConfig, TimeMomentumConfig};
use crate::domain::sweep::{SweepGrid, SweepRunner};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataFeed;

#[derive(Parser, Debug)]
#[command(name = "waterfall", about = "Multi-strategy waterfall backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an integrated backtest
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory of {symbol}_{interval}.csv candle files
        #[arg(short, long)]
        data: PathBuf,
        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Sweep strategy parameters over a grid of combinations
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        /// Show only the best N outcomes
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Validate a run configuration without running it
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List symbols available in a data directory
    ListSymbols {
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long, default_value = "1m")]
        interval: String,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run {
            config,
            data,
            output,
        } => run_backtest(&config, &data, output.as_ref()),
        Command::Sweep { config, data, top } => run_sweep(&config, &data, top),
        Command::Validate { config } => run_validate(&config),
        Command::ListSymbols { data, interval } => run_list_symbols(&data, &interval),
    }
}

fn load_run_config(path: &PathBuf) -> Result<(FileConfigAdapter, RunConfig), WaterfallError> {
    let adapter = FileConfigAdapter::from_file(path).map_err(|e| WaterfallError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let run = RunConfig::from_config(&adapter)?;
    Ok((adapter, run))
}

fn fail(err: &WaterfallError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

fn run_backtest(config_path: &PathBuf, data_dir: &PathBuf, output: Option<&PathBuf>) -> ExitCode {
    let (_, run_config) = match load_run_config(config_path) {
        Ok(v) => v,
        Err(e) => return fail(&e),
    };

    let feed = CsvFeed::new(data_dir.clone());
    let engine = WaterfallEngine::new(&feed);

    eprintln!(
        "Running waterfall: {} participants, {} to {}",
        run_config.participants.len(),
        run_config.start,
        run_config.end,
    );

    let result = match engine.run_integrated(&run_config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    // The engine converts an all-empty fetch into a zeroed result; at the
    // command level that is a data error, not a zero-return backtest.
    if result.equity_curve.is_empty() {
        return fail(&WaterfallError::NoData {
            symbol: run_config.global_symbol.clone(),
            interval: run_config.interval.clone(),
        });
    }

    eprintln!("\n=== Aggregate Results ===");
    eprintln!("Total Return:     {:.2}%", result.total_return_pct);
    eprintln!("Max Drawdown:     {:.2}%", result.max_drawdown_pct);
    eprintln!("Activity Rate:    {:.1}%", result.activity_rate_pct);
    eprintln!("Trading Days:     {}", result.total_trading_days);
    eprintln!("Total Trades:     {}", result.stats.total_trades);
    eprintln!("Win Rate:         {:.1}%", result.stats.win_rate);
    eprintln!("Profit Factor:    {:.2}", result.stats.profit_factor);
    eprintln!("Sharpe Ratio:     {:.2}", result.stats.sharpe_ratio);
    eprintln!("Stability:        {:.2}", result.stats.stability_score);
    eprintln!("Acceleration:     {:.2}", result.stats.acceleration_score);

    if !result.rank_stats.is_empty() {
        eprintln!("\n=== Per-Rank Summary ===");
        for rs in &result.rank_stats {
            let sign = if rs.total_return_pct >= 0.0 { "+" } else { "" };
            eprintln!(
                "  rank {}: {} trades, {:.1}% win rate, {sign}{:.2}% return, {:.1}% drawdown",
                rs.rank,
                rs.stats.total_trades,
                rs.stats.win_rate,
                rs.total_return_pct,
                rs.max_drawdown_pct,
            );
        }
    }

    if let Some(path) = output {
        let json = match serde_json::to_string_pretty(&result) {
            Ok(j) => j,
            Err(e) => {
                eprintln!("error: failed to serialize result: {e}");
                return ExitCode::from(1);
            }
        };
        if let Err(e) = fs::write(path, json) {
            eprintln!("error: failed to write {}: {e}", path.display());
            return ExitCode::from(1);
        }
        eprintln!("\nResult written to: {}", path.display());
    }

    ExitCode::SUCCESS
}

/// Comma-separated float list, e.g. `target_percent = 1.0, 2.0, 3.0`.
fn parse_f64_list(value: Option<String>) -> Vec<f64> {
    value
        .map(|v| {
            v.split(',')
                .filter_map(|item| item.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_i64_list(value: Option<String>) -> Vec<i64> {
    value
        .map(|v| {
            v.split(',')
                .filter_map(|item| item.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn run_sweep(config_path: &PathBuf, data_dir: &PathBuf, top: usize) -> ExitCode {
    let (adapter, run_config) = match load_run_config(config_path) {
        Ok(v) => v,
        Err(e) => return fail(&e),
    };

    // Base parameters come from the first momentum participant; the grid
    // only makes sense for the momentum strategy's axes.
    let base = run_config
        .participants
        .iter()
        .find_map(|p| match &p.strategy {
            StrategyConfig::TimeMomentum(cfg) => Some(cfg.clone()),
            _ => None,
        })
        .unwrap_or_else(TimeMomentumConfig::default);

    let grid = SweepGrid {
        delay_minutes: parse_i64_list(adapter.get_string("sweep", "delay_minutes")),
        target_pct: parse_f64_list(adapter.get_string("sweep", "target_percent")),
        safety_stop_pct: parse_f64_list(adapter.get_string("sweep", "safety_stop_percent")),
        trailing_start_pct: parse_f64_list(adapter.get_string("sweep", "trailing_start_percent")),
        trailing_stop_drop: parse_f64_list(adapter.get_string("sweep", "trailing_stop_drop")),
    };

    let feed = CsvFeed::new(data_dir.clone());
    let runner = SweepRunner::new();
    let total = grid.combinations(&base).len();
    eprintln!("Sweeping {total} combinations on {}", run_config.global_symbol);

    let outcomes = match runner.run(&feed, &run_config, &base, &grid) {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };

    eprintln!("\n=== Best Outcomes ===");
    for (i, o) in outcomes.iter().take(top).enumerate() {
        eprintln!(
            "  #{:<2} score {:>7.2}  delay {:>3}m  target {:.1}%  stop {:.1}%  \
             trades {:>3}  win {:.1}%  dd {:.1}%",
            i + 1,
            o.score,
            o.config.delay_minutes,
            o.config.target_pct,
            o.config.safety_stop_pct,
            o.total_trades,
            o.win_rate,
            o.max_drawdown_pct,
        );
    }

    ExitCode::SUCCESS
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let (_, run_config) = match load_run_config(config_path) {
        Ok(v) => v,
        Err(e) => return fail(&e),
    };

    eprintln!("Config validated successfully");
    eprintln!("  global symbol:  {}", run_config.global_symbol);
    eprintln!("  interval:       {}", run_config.interval);
    eprintln!("  range:          {} to {}", run_config.start, run_config.end);
    eprintln!("  capital:        {:.0}", run_config.initial_capital);
    for p in &run_config.participants {
        eprintln!(
            "  rank {}:         {} on {}",
            p.rank,
            p.strategy.name(),
            p.symbol
        );
    }
    ExitCode::SUCCESS
}

fn run_list_symbols(data_dir: &PathBuf, interval: &str) -> ExitCode {
    let feed = CsvFeed::new(data_dir.clone());
    match feed.list_symbols(interval) {
        Ok(symbols) => {
            for symbol in symbols {
                println!("{symbol}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
