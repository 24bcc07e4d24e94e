//! Memoria CLI entry point.
//!
//! Binary name: `memoria`
//!
//! Parses CLI arguments, wires the memory subsystem from `memoria.toml`, then
//! dispatches to the command handler. Every pending extraction window is
//! drained before exit, so exchanges below the batch size are not lost.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands, ConfigAction};
use memoria_infra::config::default_config_path;
use memoria_observe::tracing_setup::{init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,memoria=debug",
        _ => "trace",
    };
    init_tracing(cli.otel, filter).map_err(|e| anyhow::anyhow!("Failed to init tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Completions and config inspection don't need the store or the model
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "memoria", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Config { action } => {
            return match action {
                ConfigAction::Check => cli::config::check(&config_path, cli.json).await,
                ConfigAction::Path => cli::config::path(&config_path, cli.json),
            };
        }
        _ => {}
    }

    let mut state = AppState::init(&config_path).await?;

    let outcome = match cli.command {
        Commands::Recall {
            user,
            query,
            limit,
            threshold,
            history,
        } => {
            cli::memory::recall(
                &state,
                &user,
                &query,
                limit,
                threshold,
                history.as_deref(),
                cli.json,
            )
            .await
        }

        Commands::Exchange {
            user,
            message,
            reply,
            no_store,
        } => cli::memory::exchange(&mut state, &user, &message, &reply, no_store, cli.json).await,

        Commands::Ingest { user, transcript } => {
            cli::memory::ingest(&mut state, &user, &transcript, cli.json).await
        }

        Commands::Memories { user, limit } => {
            cli::memory::list_memories(&state, &user, limit, cli.json).await
        }

        Commands::Forget {
            user,
            id,
            all,
            memory_type,
            force,
        } => cli::memory::forget(&state, &user, id, all, memory_type, force, cli.json).await,

        Commands::Count { user } => cli::memory::count(&state, &user, cli.json).await,

        Commands::Completions { .. } | Commands::Config { .. } => Ok(()),
    };

    state.service.drain_all().await;
    tracing::debug!(config = %state.config_path.display(), "Memoria exiting");
    outcome
}
