// basc: batch BASIC compiler middle-end
//
// Reads the front-end's typed AST (JSON), builds per-function CFGs, and
// emits textual SSA IR for the native backend.

use anyhow::Result;
use clap::Parser;

use basc::cli::{self, Cli, Commands};
use basc::output;

fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    if let Err(e) = run_command(cli) {
        output::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Compile(args) => cli::cmds::compile(args, &cli),
        Commands::Cfg(args) => cli::cmds::cfg(args, &cli),
        Commands::Check(args) => cli::cmds::check(args, &cli),
    }
}
