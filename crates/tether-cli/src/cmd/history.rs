//! `tether history`: inspect and edit the persisted undo/redo stacks.
//!
//! Moving a batch between stacks here does not apply its inverse to the
//! board; that only happens through the engine. These commands exist to
//! repair stacks that drifted from the board they describe.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::Write;
use tether_core::config::EngineConfig;
use tether_core::model::{Batch, ResourceKey};
use tether_core::sync::{UndoRedoHistory, UndoRedoState};

use crate::cmd::open_db;
use crate::output::{OutputMode, pretty_kv, pretty_section, render};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    command: HistoryCommand,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// Show both stacks for one board
    Show(KeyArgs),
    /// Move the newest undo batch onto the redo stack
    Undo(KeyArgs),
    /// Move the next redo batch back onto the undo stack
    Redo(KeyArgs),
    /// Forget all history for one board
    Clear(KeyArgs),
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// App id
    app: String,
    /// Board id
    board: String,
}

impl KeyArgs {
    fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.app, &self.board)
    }
}

#[derive(Debug, Serialize)]
struct HistoryView {
    app_id: String,
    board_id: String,
    undo_depth: usize,
    redo_depth: usize,
    undo_stack: Vec<Batch>,
    redo_stack: Vec<Batch>,
}

impl HistoryView {
    fn new(key: &ResourceKey, state: UndoRedoState) -> Self {
        Self {
            app_id: key.app_id.clone(),
            board_id: key.board_id.clone(),
            undo_depth: state.undo_stack.len(),
            redo_depth: state.redo_stack.len(),
            undo_stack: state.undo_stack,
            redo_stack: state.redo_stack,
        }
    }
}

#[derive(Debug, Serialize)]
struct MoveResult {
    app_id: String,
    board_id: String,
    action: &'static str,
    moved: Option<Batch>,
    undo_depth: usize,
    redo_depth: usize,
}

#[derive(Debug, Serialize)]
struct ClearResult {
    app_id: String,
    board_id: String,
    cleared: bool,
}

pub fn run_history(args: &HistoryArgs, config: &EngineConfig, output: OutputMode) -> Result<()> {
    let history = UndoRedoHistory::new(open_db(config)?, config.sync.history_limit);
    match &args.command {
        HistoryCommand::Show(key) => run_show(&history, &key.key(), output),
        HistoryCommand::Undo(key) => run_move(&history, &key.key(), "undo", output),
        HistoryCommand::Redo(key) => run_move(&history, &key.key(), "redo", output),
        HistoryCommand::Clear(key) => run_clear(&history, &key.key(), output),
    }
}

fn describe(batch: &Batch) -> String {
    batch
        .iter()
        .map(tether_core::model::GenericCommand::command_type)
        .collect::<Vec<_>>()
        .join(",")
}

fn write_stack(w: &mut dyn Write, label: &str, stack: &[Batch]) -> std::io::Result<()> {
    for (depth, batch) in stack.iter().enumerate() {
        writeln!(w, "{label}\t{depth}\t{}\t{}", batch.len(), describe(batch))?;
    }
    Ok(())
}

fn run_show(history: &UndoRedoHistory, key: &ResourceKey, output: OutputMode) -> Result<()> {
    let state = history
        .state(key)
        .with_context(|| format!("Failed to load history for {key}"))?;
    let view = HistoryView::new(key, state);
    render(
        output,
        &view,
        |v, w| {
            write_stack(w, "undo", &v.undo_stack)?;
            write_stack(w, "redo", &v.redo_stack)
        },
        |v, w| {
            pretty_section(w, &format!("History {}/{}", v.app_id, v.board_id))?;
            pretty_kv(w, "undo", v.undo_depth.to_string())?;
            pretty_kv(w, "redo", v.redo_depth.to_string())?;
            // Newest undo batch first, matching the order undo pops them.
            for batch in v.undo_stack.iter().rev() {
                writeln!(w, "  undo  {}", describe(batch))?;
            }
            for batch in &v.redo_stack {
                writeln!(w, "  redo  {}", describe(batch))?;
            }
            Ok(())
        },
    )
}

fn run_move(
    history: &UndoRedoHistory,
    key: &ResourceKey,
    action: &'static str,
    output: OutputMode,
) -> Result<()> {
    let moved = if action == "undo" {
        history.undo(key)
    } else {
        history.redo(key)
    }
    .with_context(|| format!("Failed to {action} history for {key}"))?;
    let state = history.state(key)?;
    tracing::info!(%key, action, moved = moved.is_some(), "history stacks edited");

    let result = MoveResult {
        app_id: key.app_id.clone(),
        board_id: key.board_id.clone(),
        action,
        moved,
        undo_depth: state.undo_stack.len(),
        redo_depth: state.redo_stack.len(),
    };
    render(
        output,
        &result,
        |r, w| {
            let moved = r.moved.as_ref().map_or_else(|| "-".to_string(), describe);
            writeln!(w, "{}\t{}\t{}\t{}", r.action, moved, r.undo_depth, r.redo_depth)
        },
        |r, w| match &r.moved {
            Some(batch) => writeln!(
                w,
                "{} {}/{}: moved [{}] (undo {}, redo {})",
                r.action,
                r.app_id,
                r.board_id,
                describe(batch),
                r.undo_depth,
                r.redo_depth
            ),
            None => writeln!(w, "Nothing to {} for {}/{}", r.action, r.app_id, r.board_id),
        },
    )
}

fn run_clear(history: &UndoRedoHistory, key: &ResourceKey, output: OutputMode) -> Result<()> {
    let cleared = history
        .clear(key)
        .with_context(|| format!("Failed to clear history for {key}"))?;
    let result = ClearResult {
        app_id: key.app_id.clone(),
        board_id: key.board_id.clone(),
        cleared,
    };
    render(
        output,
        &result,
        |r, w| writeln!(w, "{}\t{}\t{}", r.app_id, r.board_id, r.cleared),
        |r, w| {
            if r.cleared {
                writeln!(w, "Cleared history for {}/{}", r.app_id, r.board_id)
            } else {
                writeln!(w, "No history for {}/{}", r.app_id, r.board_id)
            }
        },
    )
}
