//! The `dbnet` command

mod args;
mod commands;
mod logging;
mod output;

use anyhow::Result;
use clap::Parser;
use dbnet_connection::DbnetHome;

use args::{Cli, Command};
use logging::LoggingConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let home = DbnetHome::from_env()?;
    home.ensure()?;

    let config = if matches!(cli.command, Command::Serve(_)) {
        LoggingConfig::server(home.logs_dir(), cli.verbose)
    } else {
        LoggingConfig::command(home.logs_dir(), cli.verbose)
    };
    let _guard = logging::init(config)?;

    match cli.command {
        Command::Serve(args) => commands::serve(&home, args).await,
        Command::Conns { command } => commands::conns(&home, command).await,
        Command::Exec(args) => commands::exec(&home, args).await,
    }
}

#[cfg(test)]
mod tests;
