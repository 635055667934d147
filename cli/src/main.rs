use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            commands::run(args, cli.cache_dir).await?;
        }
        Commands::Download {
            model,
            token,
            force,
        } => {
            commands::download(model, token, force, cli.cache_dir).await?;
        }
        Commands::List => {
            commands::list(cli.cache_dir).await?;
        }
        Commands::Delete { model } => {
            commands::delete(model, cli.cache_dir).await?;
        }
    }

    Ok(())
}
