use tracing::info;

use super::{ResourceContext, write_back};
use crate::adapter::remote::{Method, get_json, paths, send_json, send_unit};
use crate::error::{Result, SyncError};
use crate::model::{SemVer, Template};
use crate::sync::{CacheKey, ReadOptions, VersionPin};

#[derive(Debug, Clone)]
pub struct TemplateService {
    ctx: ResourceContext,
}

impl TemplateService {
    #[must_use]
    pub const fn new(ctx: ResourceContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn cache_key(app_id: &str, template_id: &str, version: Option<SemVer>) -> CacheKey {
        match version {
            Some(v) => CacheKey::new("template", &[app_id, template_id, &v.to_string()]),
            None => CacheKey::new("template", &[app_id, template_id]),
        }
    }

    #[must_use]
    pub fn list_cache_key(app_id: &str) -> CacheKey {
        CacheKey::new("templates", &[app_id])
    }

    pub async fn get_template(
        &self,
        app_id: &str,
        template_id: &str,
        version: Option<SemVer>,
    ) -> Result<Template> {
        let remote = self.ctx.online_remote(app_id).await.map(|remote| {
            let path = paths::with_version(paths::template(app_id, template_id), version);
            async move {
                get_json::<Template>(remote.as_ref(), &path)
                    .await
                    .map_err(SyncError::from)
            }
        });

        let owner = app_id.to_string();
        self.ctx
            .accessor
            .read(
                ReadOptions::latest(Self::cache_key(app_id, template_id, version))
                    .pinned(VersionPin::from(version)),
                self.ctx.local.get_template(app_id, template_id, version),
                remote,
                write_back(&self.ctx.local, move |local, template: Template| {
                    let app_id = owner.clone();
                    Box::pin(async move { local.upsert_template(&app_id, template).await.map(|_| ()) })
                }),
            )
            .await
    }

    pub async fn get_templates(&self, app_id: &str) -> Result<Vec<Template>> {
        let remote = self.ctx.online_remote(app_id).await.map(|remote| {
            let path = paths::templates(app_id);
            async move {
                get_json::<Vec<Template>>(remote.as_ref(), &path)
                    .await
                    .map_err(SyncError::from)
            }
        });

        let owner = app_id.to_string();
        self.ctx
            .accessor
            .read_collection(
                ReadOptions::latest(Self::list_cache_key(app_id)),
                self.ctx.local.get_templates(app_id),
                remote,
                write_back(&self.ctx.local, move |local, template: Template| {
                    let app_id = owner.clone();
                    Box::pin(async move { local.upsert_template(&app_id, template).await.map(|_| ()) })
                }),
            )
            .await
    }

    pub async fn upsert_template(&self, app_id: &str, template: Template) -> Result<Template> {
        let stored = match self.ctx.mutation_remote(app_id).await? {
            None => self.ctx.local.upsert_template(app_id, template).await?,
            Some(remote) => {
                let path = paths::template(app_id, &template.id);
                let accepted: Template = send_json(remote.as_ref(), Method::Put, &path, &template).await?;
                self.ctx.local.upsert_template(app_id, accepted).await?
            }
        };

        let cache = self.ctx.accessor.cache();
        cache.invalidate(&Self::cache_key(app_id, &stored.id, None));
        cache.invalidate(&Self::list_cache_key(app_id));
        Ok(stored)
    }

    pub async fn delete_template(&self, app_id: &str, template_id: &str) -> Result<()> {
        if let Some(remote) = self.ctx.mutation_remote(app_id).await? {
            send_unit(remote.as_ref(), Method::Delete, &paths::template(app_id, template_id), None)
                .await?;
        }
        self.ctx.local.delete_template(app_id, template_id).await?;

        let cache = self.ctx.accessor.cache();
        cache.invalidate(&Self::cache_key(app_id, template_id, None));
        cache.invalidate(&Self::list_cache_key(app_id));
        info!(app_id, template_id, "template deleted");
        Ok(())
    }
}
