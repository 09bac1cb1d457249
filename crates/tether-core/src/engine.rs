//! Engine facade: wires the state database, adapters, accessor, pipeline and
//! bit orchestration into one handle owned by the host.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::adapter::http::HttpRemote;
use crate::adapter::{BitStore, LocalStore, RemoteAuthority};
use crate::bits::{DownloadHandle, DownloadOrchestrator, PackResolver};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::db::{StateDb, open_state_db};
use crate::error::{Result, SyncError};
use crate::model::{App, Bit, Board, DownloadSample, Event, ResolvedPack, ResourceKey, SemVer, Template};
use crate::resources::{
    AppService, BoardService, EventService, ResourceContext, StorageService, TemplateService,
};
use crate::sync::{
    Cache, CacheKey, CommandPipeline, ConnectivityPolicy, DualSourceAccessor, KeyedLocks,
    OfflineQueue, StaticConnectivity, Subscription, TaskSupervisor, UndoRedoHistory,
};

type Refetch<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// A value read for one cache key, with the means to read it again and to
/// hear about background reconciliations that change it.
pub struct Fetched<T> {
    pub value: T,
    key: CacheKey,
    cache: Arc<Cache>,
    refetch: Refetch<T>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for Fetched<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetched")
            .field("value", &self.value)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<T> Fetched<T> {
    async fn load<F>(key: CacheKey, cache: Arc<Cache>, read: F) -> Result<Self>
    where
        F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        let value = read().await?;
        Ok(Self {
            value,
            key,
            cache,
            refetch: Arc::new(read),
        })
    }

    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Read again through the same path. `self.value` is left untouched.
    pub async fn refetch(&self) -> Result<T> {
        (self.refetch)().await
    }

    /// Events for this key: reconciled writes and invalidations.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.cache.subscribe(self.key.clone())
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Bit operations routed to the local engine.
struct LocalBits(Arc<dyn LocalStore>);

#[async_trait]
impl BitStore for LocalBits {
    async fn get_pack_from_bit(&self, bit: &Bit) -> Result<ResolvedPack> {
        self.0.get_pack_from_bit(bit).await
    }

    async fn download_bit(&self, bit: &Bit, progress: mpsc::Sender<DownloadSample>) -> Result<()> {
        self.0.download_bit(bit, progress).await
    }

    async fn is_bit_installed(&self, bit: &Bit) -> Result<bool> {
        self.0.is_bit_installed(bit).await
    }

    async fn get_installed_bits(&self) -> Result<Vec<Bit>> {
        self.0.get_installed_bits().await
    }

    async fn unfinished_downloads(&self) -> Result<Vec<Bit>> {
        self.0.unfinished_downloads().await
    }
}

/// Assembles an [`Engine`]. Only the local engine is mandatory; everything
/// else falls back to what the config describes.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    local: Option<Arc<dyn LocalStore>>,
    remote: Option<Arc<dyn RemoteAuthority>>,
    connectivity: Option<Arc<dyn ConnectivityPolicy>>,
    clock: Option<Arc<dyn Clock>>,
    db: Option<StateDb>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("local", &self.local.is_some())
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn local(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Use this remote instead of building one from `[remote]`.
    #[must_use]
    pub fn remote(mut self, remote: Arc<dyn RemoteAuthority>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivityPolicy>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use an already open state database instead of `[store] path`.
    #[must_use]
    pub fn state_db(mut self, db: StateDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let Self {
            config,
            local,
            remote,
            connectivity,
            clock,
            db,
        } = self;

        let local = local.ok_or(SyncError::Configuration("local engine"))?;
        let db = match db {
            Some(db) => db,
            None => open_state_db(&config.state_db_path())?,
        };
        let remote = match remote {
            Some(remote) => Some(remote),
            None => HttpRemote::from_config(&config.remote)?
                .map(|remote| Arc::new(remote) as Arc<dyn RemoteAuthority>),
        };
        let connectivity = connectivity.unwrap_or_else(|| {
            Arc::new(StaticConnectivity::new(config.sync.offline_apps.iter().cloned()))
        });
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));

        let background = TaskSupervisor::new("background");
        let downloads = TaskSupervisor::new("downloads");
        let cache = Arc::new(Cache::new());
        let accessor = DualSourceAccessor::new(Arc::clone(&cache), background.clone());

        let ctx = ResourceContext {
            local: Arc::clone(&local),
            remote: remote.clone(),
            connectivity: Arc::clone(&connectivity),
            accessor,
            clock: Arc::clone(&clock),
        };
        let queue = OfflineQueue::new(
            db.clone(),
            Arc::clone(&clock),
            config.offline_expiry(),
            KeyedLocks::new(),
        );
        let pipeline = CommandPipeline::new(Arc::clone(&local), remote.clone(), connectivity, queue);
        let history = UndoRedoHistory::new(db.clone(), config.sync.history_limit);

        let bits: Arc<dyn BitStore> = Arc::new(LocalBits(Arc::clone(&local)));
        let resolver = PackResolver::new(db.clone(), Arc::clone(&bits), Arc::clone(&clock));
        let orchestrator =
            DownloadOrchestrator::new(bits, resolver.clone(), downloads.clone(), config.download_tick());

        info!(
            remote = remote.is_some(),
            state_db = ?db.path(),
            history_limit = config.sync.history_limit,
            "engine ready"
        );

        Ok(Engine {
            apps: AppService::new(ctx.clone()),
            boards: BoardService::new(ctx.clone(), pipeline, history),
            events: EventService::new(ctx.clone()),
            templates: TemplateService::new(ctx.clone()),
            storage: StorageService::new(ctx.clone()),
            ctx,
            resolver,
            orchestrator,
            background,
            downloads,
            cache,
            db,
            config,
        })
    }
}

#[derive(Clone)]
pub struct Engine {
    ctx: ResourceContext,
    apps: AppService,
    boards: BoardService,
    events: EventService,
    templates: TemplateService,
    storage: StorageService,
    resolver: PackResolver,
    orchestrator: DownloadOrchestrator,
    background: TaskSupervisor,
    downloads: TaskSupervisor,
    cache: Arc<Cache>,
    db: StateDb,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("ctx", &self.ctx)
            .field("background", &self.background)
            .field("downloads", &self.downloads)
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn state_db(&self) -> &StateDb {
        &self.db
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    #[must_use]
    pub const fn apps(&self) -> &AppService {
        &self.apps
    }

    #[must_use]
    pub const fn boards(&self) -> &BoardService {
        &self.boards
    }

    #[must_use]
    pub const fn events(&self) -> &EventService {
        &self.events
    }

    #[must_use]
    pub const fn templates(&self) -> &TemplateService {
        &self.templates
    }

    #[must_use]
    pub const fn storage(&self) -> &StorageService {
        &self.storage
    }

    #[must_use]
    pub const fn queue(&self) -> &OfflineQueue {
        self.boards.queue()
    }

    #[must_use]
    pub const fn history(&self) -> &UndoRedoHistory {
        self.boards.history()
    }

    #[must_use]
    pub const fn resolver(&self) -> &PackResolver {
        &self.resolver
    }

    /// Background reconciliations still in flight.
    #[must_use]
    pub fn pending_background(&self) -> usize {
        self.background.active()
    }

    pub async fn fetch_app(&self, app_id: &str) -> Result<Fetched<App>> {
        let apps = self.apps.clone();
        let id = app_id.to_string();
        Fetched::load(AppService::cache_key(app_id), Arc::clone(&self.cache), move || {
            let apps = apps.clone();
            let id = id.clone();
            Box::pin(async move { apps.get_app(&id).await })
        })
        .await
    }

    pub async fn fetch_board(&self, key: &ResourceKey, version: Option<SemVer>) -> Result<Fetched<Board>> {
        let boards = self.boards.clone();
        let owned = key.clone();
        Fetched::load(
            BoardService::cache_key(key, version),
            Arc::clone(&self.cache),
            move || {
                let boards = boards.clone();
                let key = owned.clone();
                Box::pin(async move { boards.get_board(&key, version).await })
            },
        )
        .await
    }

    pub async fn fetch_event(
        &self,
        app_id: &str,
        event_id: &str,
        version: Option<SemVer>,
    ) -> Result<Fetched<Event>> {
        let events = self.events.clone();
        let (app, id) = (app_id.to_string(), event_id.to_string());
        Fetched::load(
            EventService::cache_key(app_id, event_id, version),
            Arc::clone(&self.cache),
            move || {
                let events = events.clone();
                let (app, id) = (app.clone(), id.clone());
                Box::pin(async move { events.get_event(&app, &id, version).await })
            },
        )
        .await
    }

    pub async fn fetch_template(
        &self,
        app_id: &str,
        template_id: &str,
        version: Option<SemVer>,
    ) -> Result<Fetched<Template>> {
        let templates = self.templates.clone();
        let (app, id) = (app_id.to_string(), template_id.to_string());
        Fetched::load(
            TemplateService::cache_key(app_id, template_id, version),
            Arc::clone(&self.cache),
            move || {
                let templates = templates.clone();
                let (app, id) = (app.clone(), id.clone());
                Box::pin(async move { templates.get_template(&app, &id, version).await })
            },
        )
        .await
    }

    pub async fn is_bit_installed(&self, bit: &Bit) -> Result<bool> {
        self.ctx.local.is_bit_installed(bit).await
    }

    pub async fn installed_bits(&self) -> Result<Vec<Bit>> {
        self.ctx.local.get_installed_bits().await
    }

    /// Σ declared size over the resolved pack of `bit`.
    pub async fn pack_size(&self, bit: &Bit) -> Result<u64> {
        self.resolver.pack_size(bit).await
    }

    pub async fn download(&self, bit: &Bit) -> Result<DownloadHandle> {
        self.orchestrator.download(bit).await
    }

    pub async fn resume_downloads(&self) -> Result<Vec<DownloadHandle>> {
        self.orchestrator.resume().await
    }

    /// Drop offline records older than the configured expiry.
    pub fn prune_expired(&self) -> Result<Vec<String>> {
        self.queue().prune_expired(self.ctx.clock.now())
    }

    /// Wait for every background reconciliation to write back, then cancel
    /// running downloads. New background work is refused afterwards.
    pub async fn shutdown(&self) {
        debug!(in_flight = self.background.active(), "draining background work");
        self.background.shutdown().await;
        self.downloads.abort().await;
        info!("engine shut down");
    }
}
