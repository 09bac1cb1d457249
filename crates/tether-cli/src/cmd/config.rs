use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tether_core::config::{EngineConfig, config_path};

use crate::output::{OutputMode, pretty_kv, pretty_section, render};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show the effective configuration (file plus environment overrides)
    Show,
    /// Print where the config file and state database live
    Path,
}

#[derive(Debug, Serialize)]
struct ShowView<'a> {
    #[serde(flatten)]
    config: &'a EngineConfig,
    token_set: bool,
}

#[derive(Debug, Serialize)]
struct PathView {
    config_file: Option<PathBuf>,
    config_exists: bool,
    state_db: PathBuf,
}

pub fn run_config(args: &ConfigArgs, config: &EngineConfig, output: OutputMode) -> Result<()> {
    match args.command {
        ConfigCommand::Show => run_show(config, output),
        ConfigCommand::Path => run_path(config, output),
    }
}

fn run_show(config: &EngineConfig, output: OutputMode) -> Result<()> {
    // The token is skipped on serialization; only report whether one is set.
    let view = ShowView {
        config,
        token_set: config.remote.token.is_some(),
    };
    let rendered = toml::to_string_pretty(config).context("Failed to render config as TOML")?;
    render(
        output,
        &view,
        |_, w| write!(w, "{rendered}"),
        |v, w| {
            pretty_section(w, "Effective configuration")?;
            write!(w, "{rendered}")?;
            writeln!(w)?;
            pretty_kv(w, "token", if v.token_set { "set" } else { "not set" })
        },
    )
}

fn run_path(config: &EngineConfig, output: OutputMode) -> Result<()> {
    let config_file = config_path();
    let view = PathView {
        config_exists: config_file.as_ref().is_some_and(|p| p.exists()),
        config_file,
        state_db: config.state_db_path(),
    };
    render(
        output,
        &view,
        |v, w| {
            let file = v
                .config_file
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.display().to_string());
            writeln!(w, "config\t{file}")?;
            writeln!(w, "state_db\t{}", v.state_db.display())
        },
        |v, w| {
            let file = v.config_file.as_ref().map_or_else(
                || "(no config directory)".to_string(),
                |p| {
                    let suffix = if v.config_exists { "" } else { " (missing, defaults in use)" };
                    format!("{}{suffix}", p.display())
                },
            );
            pretty_kv(w, "config", file)?;
            pretty_kv(w, "state db", v.state_db.display().to_string())
        },
    )
}
