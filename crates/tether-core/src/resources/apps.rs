use serde::Serialize;
use tracing::{debug, info};

use super::{BoardService, EventService, ResourceContext, TemplateService, local_id, write_back};
use crate::adapter::remote::{Method, get_json, paths, send_json, send_unit};
use crate::error::{Result, SyncError};
use crate::model::{App, AppBody, Board, BoardBody};
use crate::sync::{CacheKey, ReadOptions};

const INITIAL_BOARD_NAME: &str = "Initial Board";
const INITIAL_BOARD_DESCRIPTION: &str = "A blank canvas ready for your ideas";

#[derive(Serialize)]
struct NewAppRequest<'a> {
    meta: &'a AppBody,
}

#[derive(Debug, Clone)]
pub struct AppService {
    ctx: ResourceContext,
}

impl AppService {
    #[must_use]
    pub const fn new(ctx: ResourceContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn cache_key(app_id: &str) -> CacheKey {
        CacheKey::new("app", &[app_id])
    }

    #[must_use]
    pub fn list_cache_key() -> CacheKey {
        CacheKey::new("apps", &[])
    }

    pub async fn get_app(&self, app_id: &str) -> Result<App> {
        let remote = self.ctx.online_remote(app_id).await.map(|remote| {
            let path = paths::app(app_id);
            async move { get_json::<App>(remote.as_ref(), &path).await.map_err(SyncError::from) }
        });

        self.ctx
            .accessor
            .read(
                ReadOptions::latest(Self::cache_key(app_id)),
                self.ctx.local.get_app(app_id),
                remote,
                write_back(&self.ctx.local, |local, app: App| {
                    Box::pin(async move { local.upsert_app(app).await })
                }),
            )
            .await
    }

    /// All apps. Remote apps missing locally are created on write-back.
    pub async fn get_apps(&self) -> Result<Vec<App>> {
        let remote = self.ctx.remote.clone().map(|remote| async move {
            get_json::<Vec<App>>(remote.as_ref(), &paths::apps())
                .await
                .map_err(SyncError::from)
        });

        self.ctx
            .accessor
            .read_collection(
                ReadOptions::latest(Self::list_cache_key()),
                self.ctx.local.get_apps(),
                remote,
                write_back(&self.ctx.local, |local, app: App| {
                    Box::pin(async move { local.upsert_app(app).await })
                }),
            )
            .await
    }

    /// Create an app with an initial empty board.
    ///
    /// With `online`, the remote allocates the id first; a missing remote is
    /// then a configuration error. Otherwise the id is minted locally.
    pub async fn create_app(&self, body: AppBody, online: bool) -> Result<App> {
        let now = self.ctx.clock.now();
        let id = if online {
            let remote = self
                .ctx
                .remote
                .as_ref()
                .ok_or(SyncError::Configuration("remote session"))?;
            let created: App =
                send_json(remote.as_ref(), Method::Put, &paths::new_app(), &NewAppRequest { meta: &body })
                    .await?;
            debug!(app_id = %created.id, "remote allocated app id");
            created.id
        } else {
            local_id("app", self.ctx.clock.as_ref())
        };

        let app = self.ctx.local.create_app(App::new(id, now, body)).await?;

        let board = Board::new(
            local_id("board", self.ctx.clock.as_ref()),
            now,
            BoardBody {
                name: INITIAL_BOARD_NAME.to_string(),
                description: INITIAL_BOARD_DESCRIPTION.to_string(),
                ..BoardBody::default()
            },
        );
        self.ctx.local.upsert_board(&app.id, board).await?;
        self.ctx.accessor.cache().invalidate(&Self::list_cache_key());

        info!(app_id = %app.id, online, "app created");
        Ok(app)
    }

    pub async fn update_app(&self, app: App) -> Result<()> {
        if let Some(remote) = self.ctx.mutation_remote(&app.id).await? {
            let _: serde_json::Value =
                send_json(remote.as_ref(), Method::Put, &paths::app(&app.id), &app).await?;
        }
        let key = Self::cache_key(&app.id);
        self.ctx.local.upsert_app(app).await?;
        self.ctx.accessor.cache().invalidate(&key);
        Ok(())
    }

    pub async fn delete_app(&self, app_id: &str) -> Result<()> {
        if let Some(remote) = self.ctx.mutation_remote(app_id).await? {
            send_unit(remote.as_ref(), Method::Delete, &paths::app(app_id), None).await?;
        }
        self.ctx.local.delete_app(app_id).await?;

        let cache = self.ctx.accessor.cache();
        cache.invalidate(&Self::cache_key(app_id));
        cache.invalidate(&Self::list_cache_key());
        cache.invalidate(&BoardService::list_cache_key(app_id));
        cache.invalidate(&EventService::list_cache_key(app_id));
        cache.invalidate(&TemplateService::list_cache_key(app_id));
        for kind in ["board", "event", "template", "storage"] {
            cache.invalidate_prefix(&format!("{kind}/{app_id}/"));
        }
        info!(app_id, "app deleted");
        Ok(())
    }
}
