//! CLI command definitions for the `memoria` binary.
//!
//! Commands operate on one user scope at a time; the user id is always the
//! first positional argument.

pub mod config;
pub mod memory;
pub mod transcript;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

use memoria_types::memory::MemoryType;

/// Long-term, per-user memory for conversational agents.
#[derive(Parser)]
#[command(name = "memoria", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to memoria.toml (defaults to ~/.memoria/memoria.toml).
    #[arg(long, global = true, env = "MEMORIA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search a user's memories for a query.
    #[command(alias = "search")]
    Recall {
        /// User whose memories are searched.
        user: String,

        /// The user's message.
        query: String,

        /// Maximum number of memories to return.
        #[arg(long, short = 'n')]
        limit: Option<usize>,

        /// Minimum similarity in [0, 1].
        #[arg(long, short = 't')]
        threshold: Option<f32>,

        /// JSON transcript of earlier turns, used for query rewriting.
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Run one exchange through the memory hooks: retrieve context for the
    /// message, then queue the message and reply for extraction.
    Exchange {
        user: String,

        /// The user's message.
        message: String,

        /// The assistant's reply.
        #[arg(long)]
        reply: String,

        /// Do not queue the exchange for extraction.
        #[arg(long)]
        no_store: bool,
    },

    /// Feed a JSON transcript through extraction and wait for the result.
    Ingest {
        user: String,

        /// File holding `[{"role": "user", "text": "..."}, ...]`.
        transcript: PathBuf,
    },

    /// List a user's memories, newest first.
    #[command(alias = "ls")]
    Memories {
        user: String,

        #[arg(long, short = 'n', default_value_t = 50)]
        limit: usize,
    },

    /// Delete one memory, or all of a user's memories with --all.
    #[command(alias = "rm")]
    Forget {
        user: String,

        /// Memory id to delete.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<Uuid>,

        /// Delete every memory of the user.
        #[arg(long)]
        all: bool,

        /// With --all, only delete memories of this type.
        #[arg(long = "type", requires = "all")]
        memory_type: Option<MemoryType>,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Count a user's memories.
    Count { user: String },

    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and print the effective settings.
    Check,

    /// Print the config file path in use.
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_forget_requires_id_or_all() {
        assert!(Cli::try_parse_from(["memoria", "forget", "alice"]).is_err());
        assert!(Cli::try_parse_from(["memoria", "forget", "alice", "--all"]).is_ok());

        let id = Uuid::new_v4().to_string();
        assert!(Cli::try_parse_from(["memoria", "forget", "alice", id.as_str()]).is_ok());
        assert!(Cli::try_parse_from(["memoria", "forget", "alice", id.as_str(), "--all"]).is_err());
    }

    #[test]
    fn test_forget_type_parses() {
        let cli = Cli::try_parse_from([
            "memoria", "forget", "alice", "--all", "--type", "procedural", "--force",
        ])
        .unwrap();
        match cli.command {
            Commands::Forget {
                memory_type, force, ..
            } => {
                assert_eq!(memory_type, Some(MemoryType::Procedural));
                assert!(force);
            }
            _ => panic!("expected forget"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["memoria", "count", "alice", "--json", "-vv"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
    }
}
