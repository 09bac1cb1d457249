//! Local-first command execution with best-effort remote delivery.
//!
//! The local engine applies every batch unconditionally and its result is
//! what the caller gets back, whether the remote saw the batch, queued it, or
//! was skipped because the app is offline. Calls for the same board are
//! serialized on the lock table shared with offline replay.

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::connectivity::ConnectivityPolicy;
use super::offline::{OfflineQueue, deliver_batch};
use crate::adapter::{LocalStore, RemoteAuthority};
use crate::error::{Result, SyncError};
use crate::model::{Batch, GenericCommand, ResourceKey};

/// What happened to the remote side of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The remote accepted the batch.
    Delivered,
    /// The app is offline; nothing was attempted or queued.
    SkippedOffline,
    /// Delivery failed or no remote is configured; the batch is queued.
    Queued { command_id: String },
    /// Nothing to deliver.
    Empty,
}

/// Local result of a submission plus the remote outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub applied: Batch,
    pub delivery: Delivery,
}

#[derive(Clone)]
pub struct CommandPipeline {
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteAuthority>>,
    connectivity: Arc<dyn ConnectivityPolicy>,
    queue: OfflineQueue,
}

impl std::fmt::Debug for CommandPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPipeline")
            .field("remote", &self.remote.is_some())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl CommandPipeline {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteAuthority>>,
        connectivity: Arc<dyn ConnectivityPolicy>,
        queue: OfflineQueue,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
            queue,
        }
    }

    #[must_use]
    pub const fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Apply one command. Same contract as [`Self::execute_commands`].
    pub async fn execute_command(&self, key: &ResourceKey, command: GenericCommand) -> Result<Batch> {
        self.execute_commands(key, vec![command]).await
    }

    /// Apply `batch` locally, then forward it to the remote.
    ///
    /// Only local failures are returned. A remote failure of any kind queues
    /// the batch and still yields the local result.
    pub async fn execute_commands(&self, key: &ResourceKey, batch: Batch) -> Result<Batch> {
        Ok(self.submit(key, batch).await?.applied)
    }

    /// Like [`Self::execute_commands`], also reporting the remote outcome.
    pub async fn submit(&self, key: &ResourceKey, batch: Batch) -> Result<Submission> {
        if batch.is_empty() {
            return Ok(Submission {
                applied: Vec::new(),
                delivery: Delivery::Empty,
            });
        }

        let _guard = self.queue.locks().lock(&key.storage_key()).await;
        let applied = self.local.execute_commands(key, batch.clone()).await?;

        if self.connectivity.is_offline(&key.app_id).await {
            debug!(%key, commands = batch.len(), "app offline, local apply only");
            return Ok(Submission {
                applied,
                delivery: Delivery::SkippedOffline,
            });
        }

        let Some(remote) = &self.remote else {
            let record = self.queue.push(key, &batch)?;
            debug!(%key, command_id = %record.command_id, "no remote configured, batch queued");
            return Ok(Submission {
                applied,
                delivery: Delivery::Queued {
                    command_id: record.command_id,
                },
            });
        };

        match deliver_batch(remote.as_ref(), key, &batch).await {
            Ok(()) => {
                debug!(%key, commands = batch.len(), "batch delivered");
                Ok(Submission {
                    applied,
                    delivery: Delivery::Delivered,
                })
            }
            Err(err) => {
                let err = SyncError::from(err);
                if err.is_deliverable_later() {
                    warn!(%key, error = %err, code = %err.code(), "remote delivery failed, queueing batch");
                } else {
                    error!(%key, error = %err, code = %err.code(), "remote rejected batch, queueing for replay");
                }
                let record = self.queue.push(key, &batch)?;
                Ok(Submission {
                    applied,
                    delivery: Delivery::Queued {
                        command_id: record.command_id,
                    },
                })
            }
        }
    }
}
