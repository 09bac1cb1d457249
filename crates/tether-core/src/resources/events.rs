use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ResourceContext, write_back};
use crate::adapter::remote::{Method, get_json, paths, send_json, send_unit};
use crate::error::{Result, SyncError};
use crate::model::{Event, Feedback, SemVer};
use crate::sync::accessor::cache_only;
use crate::sync::{CacheKey, ReadOptions, VersionPin};

#[derive(Serialize)]
struct ValidateRequest {
    version: Option<SemVer>,
}

#[derive(Deserialize)]
struct FeedbackAck {
    feedback_id: String,
}

#[derive(Debug, Clone)]
pub struct EventService {
    ctx: ResourceContext,
}

impl EventService {
    #[must_use]
    pub const fn new(ctx: ResourceContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn cache_key(app_id: &str, event_id: &str, version: Option<SemVer>) -> CacheKey {
        match version {
            Some(v) => CacheKey::new("event", &[app_id, event_id, &v.to_string()]),
            None => CacheKey::new("event", &[app_id, event_id]),
        }
    }

    #[must_use]
    pub fn list_cache_key(app_id: &str) -> CacheKey {
        CacheKey::new("events", &[app_id])
    }

    pub async fn get_event(&self, app_id: &str, event_id: &str, version: Option<SemVer>) -> Result<Event> {
        let remote = self.ctx.online_remote(app_id).await.map(|remote| {
            let path = paths::with_version(paths::event(app_id, event_id), version);
            async move { get_json::<Event>(remote.as_ref(), &path).await.map_err(SyncError::from) }
        });

        let owner = app_id.to_string();
        self.ctx
            .accessor
            .read(
                ReadOptions::latest(Self::cache_key(app_id, event_id, version))
                    .pinned(VersionPin::from(version)),
                self.ctx.local.get_event(app_id, event_id, version),
                remote,
                write_back(&self.ctx.local, move |local, event: Event| {
                    let app_id = owner.clone();
                    Box::pin(async move { local.upsert_event(&app_id, event).await.map(|_| ()) })
                }),
            )
            .await
    }

    pub async fn get_events(&self, app_id: &str) -> Result<Vec<Event>> {
        let remote = self.ctx.online_remote(app_id).await.map(|remote| {
            let path = paths::events(app_id);
            async move {
                get_json::<Vec<Event>>(remote.as_ref(), &path)
                    .await
                    .map_err(SyncError::from)
            }
        });

        let owner = app_id.to_string();
        self.ctx
            .accessor
            .read_collection(
                ReadOptions::latest(Self::list_cache_key(app_id)),
                self.ctx.local.get_events(app_id),
                remote,
                write_back(&self.ctx.local, move |local, event: Event| {
                    let app_id = owner.clone();
                    Box::pin(async move { local.upsert_event(&app_id, event).await.map(|_| ()) })
                }),
            )
            .await
    }

    pub async fn get_event_versions(&self, app_id: &str, event_id: &str) -> Result<Vec<SemVer>> {
        let remote = self.ctx.online_remote(app_id).await.map(|remote| {
            let path = paths::event_versions(app_id, event_id);
            async move {
                get_json::<Vec<SemVer>>(remote.as_ref(), &path)
                    .await
                    .map_err(SyncError::from)
            }
        });

        self.ctx
            .accessor
            .read(
                ReadOptions::latest(CacheKey::new("event-versions", &[app_id, event_id])).excluding(&[]),
                self.ctx.local.get_event_versions(app_id, event_id),
                remote,
                cache_only,
            )
            .await
    }

    /// Online, the remote's copy of the event is what gets stored locally.
    pub async fn upsert_event(&self, app_id: &str, event: Event) -> Result<Event> {
        let stored = match self.ctx.mutation_remote(app_id).await? {
            None => self.ctx.local.upsert_event(app_id, event).await?,
            Some(remote) => {
                let path = paths::event(app_id, &event.id);
                let accepted: Event = send_json(remote.as_ref(), Method::Put, &path, &event).await?;
                debug!(app_id, event_id = %accepted.id, "remote accepted event");
                self.ctx.local.upsert_event(app_id, accepted).await?
            }
        };

        let cache = self.ctx.accessor.cache();
        cache.invalidate(&Self::cache_key(app_id, &stored.id, None));
        cache.invalidate(&Self::list_cache_key(app_id));
        Ok(stored)
    }

    pub async fn delete_event(&self, app_id: &str, event_id: &str) -> Result<()> {
        if let Some(remote) = self.ctx.mutation_remote(app_id).await? {
            send_unit(remote.as_ref(), Method::Delete, &paths::event(app_id, event_id), None).await?;
        }
        self.ctx.local.delete_event(app_id, event_id).await?;

        let cache = self.ctx.accessor.cache();
        cache.invalidate(&Self::cache_key(app_id, event_id, None));
        cache.invalidate(&Self::list_cache_key(app_id));
        info!(app_id, event_id, "event deleted");
        Ok(())
    }

    /// Ask the remote to validate an event definition.
    pub async fn validate_event(&self, app_id: &str, event_id: &str, version: Option<SemVer>) -> Result<()> {
        let remote = self.ctx.require_remote(app_id).await?;
        let body = serde_json::to_value(ValidateRequest { version })?;
        send_unit(remote.as_ref(), Method::Post, &paths::event_validate(app_id, event_id), Some(body))
            .await?;
        Ok(())
    }

    /// Store feedback remotely. Returns the feedback id, or `None` when the
    /// app is offline (feedback is not kept locally).
    pub async fn upsert_event_feedback(
        &self,
        app_id: &str,
        event_id: &str,
        feedback: &Feedback,
    ) -> Result<Option<String>> {
        let Some(remote) = self.ctx.mutation_remote(app_id).await? else {
            debug!(app_id, event_id, "app offline, feedback dropped");
            return Ok(None);
        };
        let ack: FeedbackAck =
            send_json(remote.as_ref(), Method::Put, &paths::event_feedback(app_id, event_id), feedback)
                .await?;
        Ok(Some(ack.feedback_id))
    }
}
