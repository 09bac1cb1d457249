//! `tether queue`: list and prune batches waiting for remote delivery.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tether_core::clock::{Clock, SystemClock};
use tether_core::config::EngineConfig;
use tether_core::model::ResourceKey;
use tether_core::sync::{KeyedLocks, OfflineQueue, OfflineSyncRecord};

use crate::cmd::open_db;
use crate::output::{OutputMode, pretty_section, render};

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    command: QueueCommand,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// List queued batches, oldest first
    List(ListArgs),
    /// Drop batches older than the expiry window
    Prune,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Only batches for this app
    #[arg(long)]
    app: Option<String>,

    /// Only batches for this board (requires --app)
    #[arg(long, requires = "app")]
    board: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueueEntry {
    command_id: String,
    app_id: String,
    board_id: String,
    commands: usize,
    created_at: DateTime<Utc>,
    expired: bool,
}

#[derive(Debug, Serialize)]
struct PruneResult {
    expiry_days: i64,
    dropped: Vec<String>,
}

pub fn run_queue(args: &QueueArgs, config: &EngineConfig, output: OutputMode) -> Result<()> {
    let queue = OfflineQueue::new(
        open_db(config)?,
        Arc::new(SystemClock),
        config.offline_expiry(),
        KeyedLocks::new(),
    );
    match &args.command {
        QueueCommand::List(list) => run_list(&queue, list, output),
        QueueCommand::Prune => run_prune(&queue, config, output),
    }
}

fn select(queue: &OfflineQueue, args: &ListArgs) -> Result<Vec<OfflineSyncRecord>> {
    let records = match (&args.app, &args.board) {
        (Some(app), Some(board)) => queue.pending(&ResourceKey::new(app, board))?,
        (Some(app), None) => queue
            .all()?
            .into_iter()
            .filter(|r| &r.key.app_id == app)
            .collect(),
        (None, None) => queue.all()?,
        (None, Some(_)) => bail!("--board requires --app"),
    };
    Ok(records)
}

fn run_list(queue: &OfflineQueue, args: &ListArgs, output: OutputMode) -> Result<()> {
    let records = select(queue, args).context("Failed to read the offline queue")?;
    let now = SystemClock.now();
    let entries: Vec<QueueEntry> = records
        .iter()
        .map(|r| QueueEntry {
            command_id: r.command_id.clone(),
            app_id: r.key.app_id.clone(),
            board_id: r.key.board_id.clone(),
            commands: r.commands.len(),
            created_at: r.created_at,
            expired: queue.is_expired(r, now),
        })
        .collect();

    render(
        output,
        &entries,
        |entries, w| {
            for e in entries {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    e.command_id,
                    e.app_id,
                    e.board_id,
                    e.commands,
                    e.created_at.to_rfc3339(),
                    e.expired
                )?;
            }
            Ok(())
        },
        |entries, w| {
            pretty_section(w, &format!("Offline queue ({} batches)", entries.len()))?;
            for e in entries {
                let marker = if e.expired { "  (expired)" } else { "" };
                writeln!(
                    w,
                    "{}  {}/{}  {} commands  {}{marker}",
                    e.command_id,
                    e.app_id,
                    e.board_id,
                    e.commands,
                    e.created_at.format("%Y-%m-%d %H:%M:%S"),
                )?;
            }
            Ok(())
        },
    )
}

fn run_prune(queue: &OfflineQueue, config: &EngineConfig, output: OutputMode) -> Result<()> {
    let dropped = queue
        .prune_expired(SystemClock.now())
        .context("Failed to prune the offline queue")?;
    let result = PruneResult {
        expiry_days: config.sync.offline_expiry_days,
        dropped,
    };
    render(
        output,
        &result,
        |r, w| {
            for id in &r.dropped {
                writeln!(w, "{id}")?;
            }
            Ok(())
        },
        |r, w| {
            writeln!(
                w,
                "Dropped {} batches older than {} days",
                r.dropped.len(),
                r.expiry_days
            )
        },
    )
}
