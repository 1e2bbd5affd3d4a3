mod app;
mod config;
mod export;
mod feature;
mod mapping;
mod metadata;
mod schema;
mod source;
mod storage;
mod store;
mod utils;

use clap::Parser;
use std::process::ExitCode;

use app::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    match app::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(app::exit_code(&err))
        }
    }
}
