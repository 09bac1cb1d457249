//! Bounded per-board undo/redo stacks.
//!
//! History is local only: it is never sent to the remote and is independent
//! of the offline queue. Each stack holds at most `limit` batches; pushes
//! beyond that evict the oldest undo entry, and the redo stack keeps its
//! first `limit` entries.
//!
//! The stack arithmetic lives in pure methods on [`UndoRedoState`]; the
//! [`UndoRedoHistory`] wrapper loads, mutates and stores one row per key
//! inside a single transaction.

use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{StateDb, to_micros};
use crate::error::{Result, StoreError};
use crate::model::{Batch, GenericCommand, ResourceKey};

/// Default number of batches kept per side.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UndoRedoState {
    pub undo_stack: Vec<Batch>,
    pub redo_stack: Vec<Batch>,
}

impl UndoRedoState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.undo_stack.is_empty() && self.redo_stack.is_empty()
    }

    fn trim_undo(&mut self, limit: usize) {
        if self.undo_stack.len() > limit {
            let excess = self.undo_stack.len() - limit;
            self.undo_stack.drain(..excess);
        }
    }

    /// Record one command. With `append`, it joins the most recent batch.
    pub fn push_command(&mut self, command: GenericCommand, append: bool, limit: usize) {
        match self.undo_stack.last_mut() {
            Some(last) if append => last.push(command),
            _ => self.undo_stack.push(vec![command]),
        }
        self.redo_stack.clear();
        self.trim_undo(limit);
    }

    /// Record a whole batch as one undo step.
    pub fn push_commands(&mut self, commands: Batch, limit: usize) {
        self.undo_stack.push(commands);
        self.redo_stack.clear();
        self.trim_undo(limit);
    }

    /// Move the newest undo batch to the front of the redo stack.
    pub fn undo(&mut self, limit: usize) -> Option<Batch> {
        let batch = self.undo_stack.pop()?;
        self.redo_stack.insert(0, batch.clone());
        self.redo_stack.truncate(limit);
        Some(batch)
    }

    /// Move the front redo batch back onto the undo stack.
    pub fn redo(&mut self, limit: usize) -> Option<Batch> {
        if self.redo_stack.is_empty() {
            return None;
        }
        let batch = self.redo_stack.remove(0);
        self.undo_stack.push(batch.clone());
        self.trim_undo(limit);
        Some(batch)
    }
}

/// Durable history for every board, backed by the `history_stacks` table.
#[derive(Debug, Clone)]
pub struct UndoRedoHistory {
    db: StateDb,
    limit: usize,
}

fn load(tx: &Transaction<'_>, key: &ResourceKey) -> Result<UndoRedoState, StoreError> {
    let row: Option<(String, String)> = tx
        .query_row(
            "SELECT undo_json, redo_json FROM history_stacks WHERE stack_key = ?1",
            [key.storage_key()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((undo_json, redo_json)) = row else {
        return Ok(UndoRedoState::default());
    };
    Ok(UndoRedoState {
        undo_stack: serde_json::from_str(&undo_json)?,
        redo_stack: serde_json::from_str(&redo_json)?,
    })
}

fn store(tx: &Transaction<'_>, key: &ResourceKey, state: &UndoRedoState) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO history_stacks (stack_key, app_id, board_id, undo_json, redo_json, updated_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(stack_key) DO UPDATE SET
            undo_json = excluded.undo_json,
            redo_json = excluded.redo_json,
            updated_at_us = excluded.updated_at_us",
        params![
            key.storage_key(),
            key.app_id,
            key.board_id,
            serde_json::to_string(&state.undo_stack)?,
            serde_json::to_string(&state.redo_stack)?,
            to_micros(Utc::now()),
        ],
    )?;
    Ok(())
}

impl UndoRedoHistory {
    #[must_use]
    pub const fn new(db: StateDb, limit: usize) -> Self {
        Self { db, limit }
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    fn update<R>(
        &self,
        key: &ResourceKey,
        f: impl FnOnce(&mut UndoRedoState, usize) -> R,
    ) -> Result<R> {
        let limit = self.limit;
        let out = self.db.with_tx(|tx| {
            let mut state = load(tx, key)?;
            let out = f(&mut state, limit);
            store(tx, key, &state)?;
            Ok(out)
        })?;
        Ok(out)
    }

    /// Like `update`, but the row is only written when `f` moved a batch.
    fn take<R>(
        &self,
        key: &ResourceKey,
        f: impl FnOnce(&mut UndoRedoState, usize) -> Option<R>,
    ) -> Result<Option<R>> {
        let limit = self.limit;
        let out = self.db.with_tx(|tx| {
            let mut state = load(tx, key)?;
            let out = f(&mut state, limit);
            if out.is_some() {
                store(tx, key, &state)?;
            }
            Ok(out)
        })?;
        Ok(out)
    }

    pub fn push_command(&self, key: &ResourceKey, command: GenericCommand, append: bool) -> Result<()> {
        self.update(key, |state, limit| state.push_command(command, append, limit))?;
        debug!(%key, append, "history: command recorded");
        Ok(())
    }

    /// Record `commands` as one undo step. An empty batch is still a step and
    /// clears the redo stack.
    pub fn push_commands(&self, key: &ResourceKey, commands: Batch) -> Result<()> {
        let len = commands.len();
        self.update(key, |state, limit| state.push_commands(commands, limit))?;
        debug!(%key, commands = len, "history: batch recorded");
        Ok(())
    }

    /// Pop the newest batch for `key`. The caller applies its inverse.
    pub fn undo(&self, key: &ResourceKey) -> Result<Option<Batch>> {
        self.take(key, |state, limit| state.undo(limit))
    }

    /// Pop the next redo batch for `key`. The caller re-applies it.
    pub fn redo(&self, key: &ResourceKey) -> Result<Option<Batch>> {
        self.take(key, |state, limit| state.redo(limit))
    }

    pub fn state(&self, key: &ResourceKey) -> Result<UndoRedoState> {
        Ok(self.db.with_tx(|tx| load(tx, key))?)
    }

    /// Forget both stacks of `key`. Returns `false` if there was no history.
    pub fn clear(&self, key: &ResourceKey) -> Result<bool> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM history_stacks WHERE stack_key = ?1",
                [key.storage_key()],
            )?)
        })?;
        Ok(removed > 0)
    }

    /// Every key with stored history, sorted.
    pub fn keys(&self) -> Result<Vec<ResourceKey>> {
        let keys = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT app_id, board_id FROM history_stacks ORDER BY app_id, board_id")?;
            let keys = stmt
                .query_map([], |row| Ok(ResourceKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })?;
        Ok(keys)
    }
}
