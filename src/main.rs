use anyhow::Result;
use clap::Parser;

use modload::cli::{Cli, Commands};
use modload::commands;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize structured logging
    modload::logging::init("info");

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(&args).await,
        Commands::Eval(args) => commands::eval::run(&args).await,
    }
}
