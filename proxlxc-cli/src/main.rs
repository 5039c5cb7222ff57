//! Entry point for the `proxlxc` command.

mod cli;
mod commands;

use clap::Parser;

use crate::cli::{Cli, Command};

/// Exit status of a build interrupted with Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.debug);

    let result = match cli.command {
        Command::Validate(args) => commands::validate::execute(args, &cli.global).await,
        Command::Build(args) => commands::build::execute(args, &cli.global).await,
    };

    if let Err(e) = result {
        if let Some(proxlxc::ProxlxcError::Cancelled) = e.downcast_ref::<proxlxc::ProxlxcError>() {
            eprintln!("Build was cancelled.");
            std::process::exit(EXIT_CANCELLED);
        }
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Respects RUST_LOG; defaults to info, or debug with `--debug`.
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
    {
        eprintln!("Failed to initialize tracing: {}", e);
    }
}
