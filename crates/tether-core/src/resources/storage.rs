use serde::Serialize;
use tracing::debug;

use super::{ResourceContext, write_back};
use crate::adapter::remote::{Method, paths, send_json, send_unit};
use crate::error::{Result, SyncError};
use crate::model::{SignedUrl, StorageItem, StorageListing};
use crate::sync::{CacheKey, ReadOptions};

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
}

#[derive(Serialize)]
struct PrefixesRequest<'a> {
    prefixes: &'a [String],
}

#[derive(Debug, Clone)]
pub struct StorageService {
    ctx: ResourceContext,
}

impl StorageService {
    #[must_use]
    pub const fn new(ctx: ResourceContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn cache_key(app_id: &str, prefix: &str) -> CacheKey {
        CacheKey::new("storage", &[app_id, prefix])
    }

    /// Objects under `prefix`. The local listing answers; online, the remote
    /// listing replaces it in the background when they differ.
    pub async fn list_storage_items(&self, app_id: &str, prefix: &str) -> Result<StorageListing> {
        let remote = self.ctx.online_remote(app_id).await.map(|remote| {
            let path = paths::data_list(app_id);
            let prefix = prefix.to_string();
            async move {
                let items: Vec<StorageItem> =
                    send_json(remote.as_ref(), Method::Post, &path, &ListRequest { prefix: &prefix })
                        .await
                        .map_err(SyncError::from)?;
                Ok::<_, SyncError>(StorageListing { prefix, items })
            }
        });

        let owner = app_id.to_string();
        self.ctx
            .accessor
            .read(
                ReadOptions::latest(Self::cache_key(app_id, prefix)).excluding(&[]),
                self.ctx.local.list_storage(app_id, prefix),
                remote,
                write_back(&self.ctx.local, move |local, listing: StorageListing| {
                    let app_id = owner.clone();
                    Box::pin(async move { local.put_storage_listing(&app_id, listing).await })
                }),
            )
            .await
    }

    /// Delete objects remotely when online, then always locally.
    pub async fn delete_storage_items(&self, app_id: &str, prefixes: &[String]) -> Result<()> {
        if let Some(remote) = self.ctx.mutation_remote(app_id).await? {
            let body = serde_json::to_value(PrefixesRequest { prefixes })?;
            send_unit(remote.as_ref(), Method::Delete, &paths::data(app_id), Some(body)).await?;
        }
        self.ctx.local.delete_storage(app_id, prefixes).await?;
        self.ctx
            .accessor
            .cache()
            .invalidate_prefix(&format!("storage/{app_id}/"));
        debug!(app_id, count = prefixes.len(), "storage objects deleted");
        Ok(())
    }

    /// Signed download URLs for `prefixes`.
    pub async fn download_storage_items(&self, app_id: &str, prefixes: &[String]) -> Result<Vec<SignedUrl>> {
        let remote = self.ctx.require_remote(app_id).await?;
        Ok(send_json(
            remote.as_ref(),
            Method::Post,
            &paths::data_download(app_id),
            &PrefixesRequest { prefixes },
        )
        .await?)
    }

    /// Presigned upload URLs, one per target location.
    pub async fn request_upload_urls(&self, app_id: &str, locations: &[String]) -> Result<Vec<SignedUrl>> {
        let remote = self.ctx.require_remote(app_id).await?;
        let urls: Vec<SignedUrl> = send_json(
            remote.as_ref(),
            Method::Put,
            &paths::data(app_id),
            &PrefixesRequest { prefixes: locations },
        )
        .await?;
        if urls.len() != locations.len() {
            debug!(app_id, requested = locations.len(), issued = urls.len(), "remote issued fewer upload urls");
        }
        Ok(urls)
    }
}
