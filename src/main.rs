use std::process::ExitCode;

use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing() {
    let directive = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("MISSIONCTL_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries command output; diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    match missionctl::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} [{}] {}", "error:".bright_red(), e.code(), e);
            ExitCode::FAILURE
        }
    }
}
