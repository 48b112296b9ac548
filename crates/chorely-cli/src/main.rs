//! Chorely CLI - household chores and rewards from the command line
//!
//! Every change lands in the local database first; `chorely sync` pushes the
//! outbox and pulls remote changes.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::{resolve_db_path, CliContext};
use crate::commands::config::run_config;
use crate::commands::outbox::run_outbox;
use crate::commands::profile::run_profile;
use crate::commands::reward::{run_redeem, run_reward};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_sync_conflicts, run_sync_watch};
use crate::commands::task::run_task;
use crate::error::CliError;

const DEFAULT_LOG_DIRECTIVE: &str = "chorely=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let context = CliContext {
        db_path: resolve_db_path(cli.db_path)?,
        profile: cli.profile,
        demo_remote: cli.demo_remote,
    };
    let db_path = context.db_path.as_path();

    match cli.command {
        Commands::Task(command) => run_task(command, db_path).await,
        Commands::Reward(command) => run_reward(command, db_path).await,
        Commands::Redeem { reward, profile_id } => run_redeem(&reward, profile_id, db_path).await,
        Commands::Profile(command) => run_profile(command, db_path).await,
        Commands::Sync { command } => match command {
            None => run_sync(&context).await,
            Some(SyncCommands::Watch) => run_sync_watch(&context).await,
            Some(SyncCommands::Conflicts { limit, json }) => {
                run_sync_conflicts(limit, json, db_path).await
            }
        },
        Commands::Status { json } => run_status(&context, json).await,
        Commands::Outbox { json } => run_outbox(json, db_path).await,
        Commands::Config { command } => run_config(command, context.profile()),
        Commands::Auth { command } => run_auth(command, context.profile()).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_DIRECTIVE))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
