//! Read-through access: answer from local now, reconcile with remote later.
//!
//! The foreground caller gets the local value as soon as the local engine
//! returns it. When a remote producer is supplied, a supervised background
//! task awaits it, compares with the local value and, on any difference,
//! writes the remote value back through the local engine and publishes a
//! cache update. Background failures are logged and dropped.

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::cache::{Cache, CacheKey};
use super::reconcile::{
    DEFAULT_EXCLUSIONS, DiffEntry, Reconciliation, VersionPin, log_differences, reconcile,
};
use super::supervisor::TaskSupervisor;
use crate::error::Result;
use crate::model::Identified;

/// Per-read reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub key: CacheKey,
    pub exclusions: &'static [&'static str],
    pub pin: VersionPin,
}

impl ReadOptions {
    /// Latest version, excluding the locally authoritative `updated_at`.
    #[must_use]
    pub const fn latest(key: CacheKey) -> Self {
        Self {
            key,
            exclusions: DEFAULT_EXCLUSIONS,
            pin: VersionPin::Latest,
        }
    }

    #[must_use]
    pub const fn pinned(mut self, pin: VersionPin) -> Self {
        self.pin = pin;
        self
    }

    #[must_use]
    pub const fn excluding(mut self, exclusions: &'static [&'static str]) -> Self {
        self.exclusions = exclusions;
        self
    }
}

/// Write-back that does nothing. For values the local engine derives itself
/// (version lists) where only the cache should follow the remote.
pub fn cache_only<T: Send + 'static>(_: T) -> BoxFuture<'static, Result<()>> {
    Box::pin(async { Ok(()) })
}

#[derive(Debug, Clone)]
pub struct DualSourceAccessor {
    cache: Arc<Cache>,
    supervisor: TaskSupervisor,
}

impl DualSourceAccessor {
    #[must_use]
    pub const fn new(cache: Arc<Cache>, supervisor: TaskSupervisor) -> Self {
        Self { cache, supervisor }
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Supervisor owning the background reconciliations.
    #[must_use]
    pub const fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    /// Read one entity.
    ///
    /// `local` is awaited in the foreground. `remote`, when present, only runs
    /// in the background; `write_back` is invoked with the reconciled remote
    /// value when it differs from local.
    pub async fn read<T, L, R, W>(
        &self,
        options: ReadOptions,
        local: L,
        remote: Option<R>,
        write_back: W,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        L: Future<Output = Result<T>>,
        R: Future<Output = Result<T>> + Send + 'static,
        W: FnOnce(T) -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        let value = local.await?;
        let local_json = serde_json::to_value(&value)?;
        self.cache.prime(options.key.clone(), &local_json)?;

        let Some(remote) = remote else {
            return Ok(value);
        };

        let cache = Arc::clone(&self.cache);
        self.supervisor.spawn("reconcile", async move {
            let ReadOptions {
                key,
                exclusions,
                pin,
            } = options;
            let remote_value = match remote.await {
                Ok(v) => v,
                Err(err) => {
                    warn!(%key, error = %err, "background reconciliation failed");
                    return;
                }
            };
            let remote_json = match serde_json::to_value(&remote_value) {
                Ok(v) => v,
                Err(err) => {
                    warn!(%key, error = %err, "remote value does not serialize");
                    return;
                }
            };

            match reconcile(&local_json, remote_json, exclusions, pin) {
                Reconciliation::Skipped => debug!(%key, "pinned read, reconciliation skipped"),
                Reconciliation::InSync => debug!(%key, "local is up to date"),
                Reconciliation::Overwrite { differences, value } => {
                    log_differences(key.as_str(), &differences);
                    overwrite(&cache, key, value, write_back).await;
                }
            }
        });

        Ok(value)
    }

    /// Read a collection of entities identified by id.
    ///
    /// Local items are deduplicated by id (last wins). In the background each
    /// remote item is reconciled against the local item with the same id;
    /// changed or new items are written back one by one. Local-only items
    /// are kept.
    pub async fn read_collection<T, L, R, W>(
        &self,
        options: ReadOptions,
        local: L,
        remote: Option<R>,
        write_back: W,
    ) -> Result<Vec<T>>
    where
        T: Identified + Serialize + DeserializeOwned + Send + 'static,
        L: Future<Output = Result<Vec<T>>>,
        R: Future<Output = Result<Vec<T>>> + Send + 'static,
        W: Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let items = dedup_by_id(local.await?);
        let mut local_by_id: BTreeMap<String, Value> = BTreeMap::new();
        let mut order = Vec::with_capacity(items.len());
        for item in &items {
            local_by_id.insert(item.id().to_string(), serde_json::to_value(item)?);
            order.push(item.id().to_string());
        }
        self.cache.prime(options.key.clone(), &items)?;

        let Some(remote) = remote else {
            return Ok(items);
        };

        let cache = Arc::clone(&self.cache);
        self.supervisor.spawn("reconcile-collection", async move {
            let ReadOptions {
                key,
                exclusions,
                pin,
            } = options;
            let remote_items = match remote.await {
                Ok(v) => v,
                Err(err) => {
                    warn!(%key, error = %err, "background collection reconciliation failed");
                    return;
                }
            };

            let mut merged = local_by_id.clone();
            let mut changed = 0_usize;
            for item in remote_items {
                let id = item.id().to_string();
                let remote_json = match serde_json::to_value(&item) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(%key, %id, error = %err, "remote item does not serialize");
                        continue;
                    }
                };
                let outcome = match local_by_id.get(&id) {
                    Some(local_json) => reconcile(local_json, remote_json, exclusions, pin),
                    None => Reconciliation::Overwrite {
                        differences: vec![DiffEntry {
                            path: String::new(),
                            local: None,
                            remote: Some(remote_json.clone()),
                        }],
                        value: remote_json,
                    },
                };

                let Reconciliation::Overwrite { differences, value } = outcome else {
                    continue;
                };
                log_differences(&format!("{key}/{id}"), &differences);
                let typed: T = match serde_json::from_value(value.clone()) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(%key, %id, error = %err, "reconciled item does not decode");
                        continue;
                    }
                };
                if let Err(err) = write_back(typed).await {
                    warn!(%key, %id, error = %err, "write-back failed");
                    continue;
                }
                if !merged.contains_key(&id) {
                    order.push(id.clone());
                }
                merged.insert(id, value);
                changed += 1;
            }

            if changed == 0 {
                debug!(%key, "collection is up to date");
                return;
            }
            let list: Vec<Value> = order.iter().filter_map(|id| merged.remove(id)).collect();
            if let Err(err) = cache.put(key.clone(), &list) {
                warn!(%key, error = %err, "cache update failed");
            }
            debug!(%key, changed, "collection reconciled");
        });

        Ok(items)
    }
}

async fn overwrite<T, W>(cache: &Cache, key: CacheKey, value: Value, write_back: W)
where
    T: DeserializeOwned,
    W: FnOnce(T) -> BoxFuture<'static, Result<()>>,
{
    let typed: T = match serde_json::from_value(value.clone()) {
        Ok(v) => v,
        Err(err) => {
            warn!(%key, error = %err, "reconciled value does not decode");
            return;
        }
    };
    if let Err(err) = write_back(typed).await {
        warn!(%key, error = %err, "write-back failed");
        return;
    }
    if let Err(err) = cache.put(key.clone(), &value) {
        warn!(%key, error = %err, "cache update failed");
    }
}

/// Keep one item per id, at the position of its first occurrence, holding
/// the last value seen.
fn dedup_by_id<T: Identified>(items: Vec<T>) -> Vec<T> {
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if let Some(&at) = index.get(item.id()) {
            out[at] = item;
        } else {
            index.insert(item.id().to_string(), out.len());
            out.push(item);
        }
    }
    out
}
