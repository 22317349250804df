//! CLI entry point for Lockward.
//!
//! This binary provides the `lockward` command: the long-running timeout
//! scheduler plus one-shot subcommands for inspecting and changing account
//! lock state.

mod cli;
mod commands;
mod helpers;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::helpers::{init_tracing, open_app};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; only real parse errors are worth reporting.
    match dotenvy::dotenv() {
        Err(err) if !err.not_found() => eprintln!("warning: failed to load .env: {err}"),
        _ => {}
    }

    let cli = Cli::parse();

    // One-shot commands print their own output; keep the log quiet.
    let default_level = match cli.command {
        Commands::Run { .. } => "info",
        _ => "warn",
    };
    init_tracing(default_level);

    let app = open_app(&cli.config).await?;

    match cli.command {
        Commands::Run { unlock } => commands::cmd_run(app, unlock).await,
        Commands::Check { unlock } => commands::cmd_check(app, unlock).await,
        Commands::Status { json } => commands::cmd_status(app, json).await,
        Commands::Account { action } => commands::cmd_account(app, action).await,
        Commands::Touch { account } => commands::cmd_touch(app, account).await,
        Commands::SetTimeout {
            account,
            minutes,
            never,
            action,
        } => commands::cmd_set_timeout(app, account, minutes, never, action).await,
        Commands::Lock { account } => commands::cmd_lock(app, account).await,
        Commands::Logout { account } => commands::cmd_logout(app, account).await,
        Commands::Policy { action } => commands::cmd_policy(app, action).await,
    }
}
