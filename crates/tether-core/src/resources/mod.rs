//! Per-resource services.
//!
//! Every service follows the same discipline: reads answer from the local
//! engine and reconcile through the [`DualSourceAccessor`]; mutations go to
//! the remote first when the app is online and always land locally.
//!
//! Remote availability has three states, resolved per call by
//! [`ResourceContext::route`]:
//! - the app is offline: local only, no error;
//! - online with a configured remote: remote then local;
//! - online without a remote: reads fall back to local, mutations that need
//!   the remote fail with [`SyncError::Configuration`].

pub mod apps;
pub mod boards;
pub mod events;
pub mod storage;
pub mod templates;

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::adapter::{LocalStore, RemoteAuthority};
use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::sync::{ConnectivityPolicy, DualSourceAccessor};

pub use apps::AppService;
pub use boards::BoardService;
pub use events::EventService;
pub use storage::StorageService;
pub use templates::TemplateService;

/// Where one call should go.
#[derive(Clone)]
pub enum Route {
    Offline,
    Online(Arc<dyn RemoteAuthority>),
    /// Online, but no remote session is configured.
    Unconfigured,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Offline => "Offline",
            Self::Online(_) => "Online",
            Self::Unconfigured => "Unconfigured",
        })
    }
}

/// Collaborators shared by every resource service.
#[derive(Clone)]
pub struct ResourceContext {
    pub local: Arc<dyn LocalStore>,
    pub remote: Option<Arc<dyn RemoteAuthority>>,
    pub connectivity: Arc<dyn ConnectivityPolicy>,
    pub accessor: DualSourceAccessor,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceContext")
            .field("remote", &self.remote.is_some())
            .field("accessor", &self.accessor)
            .finish_non_exhaustive()
    }
}

impl ResourceContext {
    pub async fn is_offline(&self, app_id: &str) -> bool {
        self.connectivity.is_offline(app_id).await
    }

    pub async fn route(&self, app_id: &str) -> Route {
        if self.is_offline(app_id).await {
            return Route::Offline;
        }
        self.remote
            .as_ref()
            .map_or(Route::Unconfigured, |remote| Route::Online(Arc::clone(remote)))
    }

    /// The remote to reconcile reads against, if the app is online.
    pub async fn online_remote(&self, app_id: &str) -> Option<Arc<dyn RemoteAuthority>> {
        match self.route(app_id).await {
            Route::Online(remote) => Some(remote),
            Route::Offline | Route::Unconfigured => None,
        }
    }

    /// Like [`Self::route`], but an online app without remote is an error.
    /// `None` means offline.
    pub async fn mutation_remote(&self, app_id: &str) -> Result<Option<Arc<dyn RemoteAuthority>>> {
        match self.route(app_id).await {
            Route::Offline => Ok(None),
            Route::Online(remote) => Ok(Some(remote)),
            Route::Unconfigured => Err(SyncError::Configuration("remote session")),
        }
    }

    /// The remote for operations that only exist remotely.
    pub async fn require_remote(&self, app_id: &str) -> Result<Arc<dyn RemoteAuthority>> {
        match self.route(app_id).await {
            Route::Online(remote) => Ok(remote),
            Route::Unconfigured => Err(SyncError::Configuration("remote session")),
            Route::Offline => Err(SyncError::Connectivity(format!("app {app_id} is offline"))),
        }
    }
}

/// Write-back that upserts through the local engine.
pub(crate) fn write_back<T, F>(
    local: &Arc<dyn LocalStore>,
    f: F,
) -> impl Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static
where
    T: Send + 'static,
    F: Fn(Arc<dyn LocalStore>, T) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    let local = Arc::clone(local);
    move |value| f(Arc::clone(&local), value)
}

/// Locally minted id for resources created while no remote allocates one.
pub(crate) fn local_id(prefix: &str, clock: &dyn Clock) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let mut hasher = blake3::Hasher::new();
    hasher.update(prefix.as_bytes());
    hasher.update(&clock.now().timestamp_micros().to_le_bytes());
    hasher.update(&NEXT.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{prefix}-{}", &hex[..20])
}
