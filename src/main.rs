mod cli;
mod engine;
mod error;
mod logging;
mod model;
mod operation;
mod orchestrator;
mod registry;
#[cfg(test)]
mod testing;
#[cfg(feature = "tui")]
mod tui;
mod user_name;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_one_shot = args.is_one_shot();

    match cli::run(args).await {
        // Explicit exit codes for scripting; a failed command exits with 1.
        Ok(true) if is_one_shot => std::process::exit(0),
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => Err(e),
    }
}
