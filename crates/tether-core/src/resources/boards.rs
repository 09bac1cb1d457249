//! Boards: the one resource with commands, history and an offline queue.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ResourceContext, Route, write_back};
use crate::adapter::remote::{Method, get_json, paths, send_json, send_unit};
use crate::error::{Result, SyncError};
use crate::model::{
    Batch, Board, BoardBody, BoardDraft, CommandEnvelope, GenericCommand, ResourceKey, SemVer,
    VersionType,
};
use crate::sync::accessor::cache_only;
use crate::sync::{
    CacheKey, CommandPipeline, OfflineQueue, ReadOptions, ReplayReport, UndoRedoHistory, VersionPin,
};

#[derive(Debug, Deserialize)]
struct UpsertAck {
    id: String,
}

#[derive(Serialize)]
struct VersionRequest {
    version_type: VersionType,
}

#[derive(Debug, Clone)]
pub struct BoardService {
    ctx: ResourceContext,
    pipeline: CommandPipeline,
    history: UndoRedoHistory,
}

impl BoardService {
    #[must_use]
    pub const fn new(ctx: ResourceContext, pipeline: CommandPipeline, history: UndoRedoHistory) -> Self {
        Self {
            ctx,
            pipeline,
            history,
        }
    }

    #[must_use]
    pub const fn history(&self) -> &UndoRedoHistory {
        &self.history
    }

    #[must_use]
    pub const fn queue(&self) -> &OfflineQueue {
        self.pipeline.queue()
    }

    #[must_use]
    pub fn cache_key(key: &ResourceKey, version: Option<SemVer>) -> CacheKey {
        match version {
            Some(v) => CacheKey::new("board", &[&key.app_id, &key.board_id, &v.to_string()]),
            None => CacheKey::new("board", &[&key.app_id, &key.board_id]),
        }
    }

    #[must_use]
    pub fn list_cache_key(app_id: &str) -> CacheKey {
        CacheKey::new("boards", &[app_id])
    }

    /// Read a board, optionally pinned to a historical version.
    ///
    /// Online, the background task first drains the offline queue of `key`
    /// and only then fetches the remote board, so the remote copy already
    /// contains the replayed edits. Pinned reads still replay but never
    /// write back.
    pub async fn get_board(&self, key: &ResourceKey, version: Option<SemVer>) -> Result<Board> {
        let remote = self.ctx.online_remote(&key.app_id).await.map(|remote| {
            let queue = self.pipeline.queue().clone();
            let key = key.clone();
            async move {
                let report = queue.replay(&key, remote.as_ref()).await?;
                log_replay(&key, &report);
                let path = paths::with_version(paths::board(&key.app_id, &key.board_id), version);
                get_json::<Board>(remote.as_ref(), &path)
                    .await
                    .map_err(SyncError::from)
            }
        });

        let app_id = key.app_id.clone();
        self.ctx
            .accessor
            .read(
                ReadOptions::latest(Self::cache_key(key, version)).pinned(VersionPin::from(version)),
                self.ctx.local.get_board(key, version),
                remote,
                write_back(&self.ctx.local, move |local, board: Board| {
                    let app_id = app_id.clone();
                    Box::pin(async move { local.upsert_board(&app_id, board).await })
                }),
            )
            .await
    }

    /// Every board of `app_id`, deduplicated by id.
    pub async fn get_boards(&self, app_id: &str) -> Result<Vec<Board>> {
        let remote = self.ctx.online_remote(app_id).await.map(|remote| {
            let path = paths::boards(app_id);
            async move {
                get_json::<Vec<Board>>(remote.as_ref(), &path)
                    .await
                    .map_err(SyncError::from)
            }
        });

        let owner = app_id.to_string();
        self.ctx
            .accessor
            .read_collection(
                ReadOptions::latest(Self::list_cache_key(app_id)),
                self.ctx.local.get_boards(app_id),
                remote,
                write_back(&self.ctx.local, move |local, board: Board| {
                    let app_id = owner.clone();
                    Box::pin(async move { local.upsert_board(&app_id, board).await })
                }),
            )
            .await
    }

    /// Version list as the local engine knows it. The cache entry follows
    /// the remote list; the engine derives its own on the next version bump.
    pub async fn get_board_versions(&self, key: &ResourceKey) -> Result<Vec<SemVer>> {
        let remote = self.ctx.online_remote(&key.app_id).await.map(|remote| {
            let path = paths::board_versions(&key.app_id, &key.board_id);
            async move {
                get_json::<Vec<SemVer>>(remote.as_ref(), &path)
                    .await
                    .map_err(SyncError::from)
            }
        });

        self.ctx
            .accessor
            .read(
                ReadOptions::latest(CacheKey::new("board-versions", &[&key.app_id, &key.board_id]))
                    .excluding(&[]),
                self.ctx.local.get_board_versions(key),
                remote,
                cache_only,
            )
            .await
    }

    /// Snapshot the current board as a new version. The remote is told in
    /// the background and its failure only logged.
    pub async fn create_board_version(&self, key: &ResourceKey, kind: VersionType) -> Result<SemVer> {
        let version = self.ctx.local.create_board_version(key, kind).await?;
        info!(%key, %version, "board version created");

        if let Some(remote) = self.ctx.online_remote(&key.app_id).await {
            let path = paths::board(&key.app_id, &key.board_id);
            let key = key.clone();
            self.ctx.accessor.supervisor().spawn("board-version", async move {
                let request = VersionRequest { version_type: kind };
                match send_json::<_, SemVer>(remote.as_ref(), Method::Patch, &path, &request).await {
                    Ok(remote_version) if remote_version != version => {
                        warn!(%key, local = %version, remote = %remote_version, "remote assigned a different version");
                    }
                    Ok(_) => debug!(%key, "remote version created"),
                    Err(err) => warn!(%key, error = %SyncError::from(err), "remote version creation failed"),
                }
            });
        }
        Ok(version)
    }

    /// Create or update a board's metadata. The graph of an existing board is kept.
    pub async fn upsert_board(&self, app_id: &str, board_id: &str, draft: BoardDraft) -> Result<Board> {
        if let Some(remote) = self.ctx.mutation_remote(app_id).await? {
            let ack: UpsertAck =
                send_json(remote.as_ref(), Method::Put, &paths::board(app_id, board_id), &draft).await?;
            if ack.id != board_id {
                return Err(SyncError::Remote {
                    status: 200,
                    body: format!("board upsert acknowledged {} instead of {board_id}", ack.id),
                });
            }
        }

        let key = ResourceKey::new(app_id, board_id);
        let existing = match self.ctx.local.get_board(&key, None).await {
            Ok(board) => Some(board),
            Err(SyncError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        let board = apply_draft(existing, board_id, draft, self.ctx.clock.now());
        self.ctx.local.upsert_board(app_id, board.clone()).await?;

        let cache = self.ctx.accessor.cache();
        cache.invalidate(&Self::cache_key(&key, None));
        cache.invalidate(&Self::list_cache_key(app_id));
        Ok(board)
    }

    pub async fn delete_board(&self, key: &ResourceKey) -> Result<()> {
        if let Some(remote) = self.ctx.mutation_remote(&key.app_id).await? {
            send_unit(remote.as_ref(), Method::Delete, &paths::board(&key.app_id, &key.board_id), None)
                .await?;
        }
        self.ctx.local.delete_board(key).await?;

        let cache = self.ctx.accessor.cache();
        cache.invalidate(&Self::cache_key(key, None));
        cache.invalidate(&Self::list_cache_key(&key.app_id));
        info!(%key, "board deleted");
        Ok(())
    }

    /// Run one command through the pipeline and record it for undo.
    ///
    /// With `append`, the command joins the previous undo step.
    pub async fn execute_command(
        &self,
        key: &ResourceKey,
        command: GenericCommand,
        append: bool,
    ) -> Result<GenericCommand> {
        let mut applied = self.pipeline.execute_command(key, command.clone()).await?;
        let recorded = if applied.is_empty() { command } else { applied.swap_remove(0) };
        self.history.push_command(key, recorded.clone(), append)?;
        Ok(recorded)
    }

    /// Run a batch through the pipeline and record it as one undo step.
    pub async fn execute_commands(&self, key: &ResourceKey, batch: Batch) -> Result<Batch> {
        let applied = self.pipeline.execute_commands(key, batch).await?;
        self.history.push_commands(key, applied.clone())?;
        Ok(applied)
    }

    /// Undo the newest recorded step. `None` when there is nothing to undo.
    pub async fn undo(&self, key: &ResourceKey) -> Result<Option<Batch>> {
        let Some(batch) = self.history.undo(key)? else {
            return Ok(None);
        };
        if let Err(err) = self.undo_board(key, batch.clone()).await {
            // Put the step back where it was.
            self.history.redo(key)?;
            return Err(err);
        }
        Ok(Some(batch))
    }

    /// Redo the most recently undone step. `None` when there is nothing to redo.
    pub async fn redo(&self, key: &ResourceKey) -> Result<Option<Batch>> {
        let Some(batch) = self.history.redo(key)? else {
            return Ok(None);
        };
        if let Err(err) = self.redo_board(key, batch.clone()).await {
            self.history.undo(key)?;
            return Err(err);
        }
        Ok(Some(batch))
    }

    /// Apply the inverse of `batch`: locally when offline, through the remote otherwise.
    pub async fn undo_board(&self, key: &ResourceKey, batch: Batch) -> Result<()> {
        match self.ctx.route(&key.app_id).await {
            Route::Offline => self.ctx.local.undo_board(key, batch).await,
            Route::Online(remote) => {
                let path = paths::board_undo(&key.app_id, &key.board_id);
                let body = serde_json::to_value(CommandEnvelope::borrowed(&batch))?;
                send_unit(remote.as_ref(), Method::Patch, &path, Some(body)).await?;
                self.ctx.accessor.cache().invalidate(&Self::cache_key(key, None));
                Ok(())
            }
            Route::Unconfigured => Err(SyncError::Configuration("remote session")),
        }
    }

    /// Re-apply `batch`: locally when offline, through the remote otherwise.
    pub async fn redo_board(&self, key: &ResourceKey, batch: Batch) -> Result<()> {
        match self.ctx.route(&key.app_id).await {
            Route::Offline => self.ctx.local.redo_board(key, batch).await,
            Route::Online(remote) => {
                let path = paths::board_redo(&key.app_id, &key.board_id);
                let body = serde_json::to_value(CommandEnvelope::borrowed(&batch))?;
                send_unit(remote.as_ref(), Method::Patch, &path, Some(body)).await?;
                self.ctx.accessor.cache().invalidate(&Self::cache_key(key, None));
                Ok(())
            }
            Route::Unconfigured => Err(SyncError::Configuration("remote session")),
        }
    }
}

fn log_replay(key: &ResourceKey, report: &ReplayReport) {
    if let Some(failure) = &report.failure {
        warn!(%key, remaining = report.remaining, %failure, "offline replay incomplete");
    } else if !report.is_noop() {
        debug!(%key, delivered = report.delivered.len(), expired = report.expired.len(), "offline replay finished");
    }
}

fn apply_draft(
    existing: Option<Board>,
    board_id: &str,
    draft: BoardDraft,
    now: chrono::DateTime<chrono::Utc>,
) -> Board {
    let BoardDraft {
        name,
        description,
        log_level,
        stage,
        template,
    } = draft;

    let mut board = existing.or(template).unwrap_or_else(|| Board::new(board_id, now, BoardBody::default()));
    board.id = board_id.to_string();
    board.updated_at = now;
    board.body.name = name;
    board.body.description = description;
    if log_level.is_some() {
        board.body.log_level = log_level;
    }
    if stage.is_some() {
        board.body.stage = stage;
    }
    board
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).single().expect("ts")
    }

    fn draft(name: &str) -> BoardDraft {
        BoardDraft {
            name: name.to_string(),
            description: "d".to_string(),
            log_level: Some("debug".to_string()),
            stage: None,
            template: None,
        }
    }

    #[test]
    fn draft_keeps_the_graph_of_an_existing_board() {
        let mut existing = Board::new("b1", now(), BoardBody::default());
        existing.body.stage = Some("prod".to_string());
        existing.body.graph.insert("nodes".to_string(), json!({"n1": {}}));

        let board = apply_draft(Some(existing), "b1", draft("Renamed"), now());
        assert_eq!(board.body.name, "Renamed");
        assert_eq!(board.body.stage.as_deref(), Some("prod"));
        assert_eq!(board.body.log_level.as_deref(), Some("debug"));
        assert_eq!(board.body.graph["nodes"], json!({"n1": {}}));
    }

    #[test]
    fn draft_from_template_takes_the_new_id() {
        let mut template = Board::new("tpl", now(), BoardBody::default());
        template.body.graph.insert("layers".to_string(), Value::Array(vec![]));
        let mut d = draft("From template");
        d.template = Some(template);

        let board = apply_draft(None, "b2", d, now());
        assert_eq!(board.id, "b2");
        assert!(board.body.graph.contains_key("layers"));
    }

    #[test]
    fn pinned_reads_use_their_own_cache_entry() {
        let key = ResourceKey::new("a1", "b1");
        assert_eq!(BoardService::cache_key(&key, None).as_str(), "board/a1/b1");
        assert_eq!(
            BoardService::cache_key(&key, Some(SemVer::new(0, 2, 0))).as_str(),
            "board/a1/b1/0.2.0"
        );
    }
}
