#![forbid(unsafe_code)]

mod cmd;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use output::{OutputMode, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use tether_core::config::{EngineConfig, load_config, load_config_from};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tether: inspect and maintain local sync state",
    long_about = None
)]
struct Cli {
    /// Output format. Defaults to pretty on a terminal, text when piped.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output (same as --format json).
    #[arg(long, global = true)]
    json: bool,

    /// Read this config file instead of the user config.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "State",
        about = "Inspect or edit undo/redo history",
        long_about = "Show, step through or clear the persisted undo/redo stacks of one board.\n\nMoving a batch between stacks does not touch the board itself.",
        after_help = "EXAMPLES:\n    # Show both stacks\n    tether history show app1 board1\n\n    # Drop a stale redo entry by undoing past it\n    tether history undo app1 board1\n\n    # Forget everything\n    tether history clear app1 board1 --json"
    )]
    History(cmd::history::HistoryArgs),

    #[command(
        next_help_heading = "State",
        about = "Inspect the offline queue",
        long_about = "List batches waiting for remote delivery, or drop those older than the expiry window.",
        after_help = "EXAMPLES:\n    # Everything queued\n    tether queue list\n\n    # One board\n    tether queue list --app app1 --board board1\n\n    # Drop expired batches\n    tether queue prune"
    )]
    Queue(cmd::queue::QueueArgs),

    #[command(
        next_help_heading = "State",
        about = "Inspect the dependency pack cache",
        long_about = "List cached dependency packs, or evict one so the next resolve walks the tree again.",
        after_help = "EXAMPLES:\n    # List cached packs\n    tether packs list\n\n    # Force a fresh walk\n    tether packs evict 3f9a..."
    )]
    Packs(cmd::packs::PacksArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Show configuration",
        long_about = "Show the effective configuration or where tether keeps its files.",
        after_help = "EXAMPLES:\n    # Effective configuration\n    tether config show\n\n    # File locations\n    tether config path --json"
    )]
    Config(cmd::config::ConfigArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TETHER_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "tether=debug,info"
        } else {
            "tether=info,warn"
        })
    });

    let format = env::var("TETHER_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so --json output stays parseable.
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

fn resolve_config(explicit: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match explicit {
        Some(path) => {
            let mut config = load_config_from(path)?;
            config.apply_env_overrides(|key| env::var(key).ok());
            Ok(config)
        }
        None => load_config(),
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let output = resolve_output_mode(cli.format, cli.json);
    let config = resolve_config(cli.config_file.as_ref()).context("Failed to load configuration")?;
    debug!(state_db = %config.state_db_path().display(), "configuration loaded");

    match &cli.command {
        Commands::History(args) => cmd::history::run_history(args, &config, output),
        Commands::Queue(args) => cmd::queue::run_queue(args, &config, output),
        Commands::Packs(args) => cmd::packs::run_packs(args, &config, output),
        Commands::Config(args) => cmd::config::run_config(args, &config, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn queue_board_filter_requires_app() {
        assert!(Cli::try_parse_from(["tether", "queue", "list", "--board", "b"]).is_err());
        assert!(Cli::try_parse_from(["tether", "queue", "list", "--app", "a", "--board", "b"]).is_ok());
    }

    #[test]
    fn json_flag_is_global() {
        let cli = Cli::try_parse_from(["tether", "packs", "list", "--json"]).expect("parse");
        assert!(cli.json);
    }
}
