use clap::Parser;
use waterfall::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    env_logger::init();
    run(Cli::parse())
}
