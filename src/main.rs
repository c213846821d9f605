use std::process::ExitCode;

use clap::Parser;
use healthcheck::cli::{Cli, run};

#[tokio::main]
async fn main() -> ExitCode {
    // Outcome records go to stdout; diagnostics stay on stderr and quiet by default.
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));
    run(Cli::parse()).await
}
