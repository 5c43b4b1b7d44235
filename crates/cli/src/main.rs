//! ragline CLI: the main entry point.
//!
//! Commands:
//! - `init`    : write a default config file
//! - `ask`     : stream an answer to a question
//! - `chats`   : list your chats
//! - `history` : print the messages of one chat
//! - `delete`  : delete a chat
//! - `bench`   : time vector queries against the configured index
//! - `doctor`  : diagnose configuration and provider health
//! - `config`  : validate, show or locate the config file

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ragline_config::{AppConfig, ConfigError, LoggingConfig};
use ragline_core::message::UserId;

mod commands;

#[derive(Parser)]
#[command(
    name = "ragline",
    about = "ragline: streaming retrieval-augmented answers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.ragline/config.toml)
    #[arg(short, long, global = true, env = "RAGLINE_CONFIG")]
    config: Option<PathBuf>,

    /// User the chats belong to
    #[arg(short, long, global = true, env = "RAGLINE_USER", default_value = "local")]
    user: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Ask a question and stream the answer
    Ask {
        /// Continue an existing chat
        #[arg(long)]
        chat: Option<String>,

        /// Print stream events as JSON lines
        #[arg(long)]
        json: bool,

        /// The question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// List your chats, most recent first
    Chats,

    /// Print the messages of a chat
    History { chat_id: String },

    /// Delete a chat and its messages
    Delete { chat_id: String },

    /// Time similarity queries against the vector index
    Bench {
        /// Text to embed once and query with
        query: String,

        #[arg(short, long, default_value_t = 5)]
        runs: usize,

        /// Overrides rag.top_k
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Diagnose configuration and provider health
    Doctor,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the config file
    Validate,
    /// Print the effective configuration with secrets redacted
    Show,
    /// Print the config file path
    Path,
}

fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // Logs go to stderr so stdout carries only the answer
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let path = config_path(cli.config.as_deref());

    let loaded: Result<AppConfig, ConfigError> = AppConfig::load_with_env(&path);
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(cli.verbose, &logging);

    let user = UserId::from(cli.user.as_str());

    match cli.command {
        Commands::Init { force } => commands::init::run(&path, force).await?,
        Commands::Doctor => commands::doctor::run(&path, loaded).await?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate(&path, loaded).await?,
            ConfigAction::Show => commands::config_cmd::show(loaded?).await?,
            ConfigAction::Path => commands::config_cmd::path(&path).await?,
        },
        Commands::Ask {
            chat,
            json,
            question,
        } => {
            let question = question.join(" ");
            commands::ask::run(&loaded?, &user, chat, question, json).await?
        }
        Commands::Chats => commands::chats::list(&loaded?, &user).await?,
        Commands::History { chat_id } => commands::chats::history(&loaded?, &user, &chat_id).await?,
        Commands::Delete { chat_id } => commands::chats::delete(&loaded?, &user, &chat_id).await?,
        Commands::Bench { query, runs, top_k } => {
            commands::bench::run(&loaded?, &query, runs, top_k).await?
        }
    }

    Ok(())
}
