//! In-memory stand-in for the embedded execution engine.
//!
//! Implements every `LocalStore` family against plain maps. Board commands
//! are not interpreted: the engine keeps an applied-command log per board so
//! callers can observe exactly what reached it. Every RPC is counted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tether_core::adapter::{AppStore, BitStore, BoardStore, EventStore, StorageStore, TemplateStore};
use tether_core::clock::{Clock, SystemClock};
use tether_core::model::{
    App, Batch, Bit, Board, DownloadSample, Event, ResolvedPack, ResourceKey, SemVer, StorageItem,
    StorageListing, SyncedResource, Template, VersionType,
};
use tether_core::{Result, SyncError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Current value plus snapshots by version.
#[derive(Debug, Clone)]
struct Versioned<T> {
    current: SyncedResource<T>,
    history: BTreeMap<SemVer, SyncedResource<T>>,
}

impl<T: Clone> Versioned<T> {
    fn new(value: SyncedResource<T>) -> Self {
        let mut history = BTreeMap::new();
        if let Some(v) = value.version {
            history.insert(v, value.clone());
        }
        Self {
            current: value,
            history,
        }
    }

    fn replace(&mut self, value: SyncedResource<T>) {
        if let Some(v) = value.version {
            self.history.insert(v, value.clone());
        }
        self.current = value;
    }

    fn at(&self, version: Option<SemVer>) -> Option<SyncedResource<T>> {
        match version {
            None => Some(self.current.clone()),
            Some(v) => self.history.get(&v).cloned(),
        }
    }

    fn versions(&self) -> Vec<SemVer> {
        self.history.keys().copied().collect()
    }
}

#[derive(Debug, Default)]
struct State {
    apps: BTreeMap<String, App>,
    boards: BTreeMap<(String, String), Versioned<tether_core::model::BoardBody>>,
    command_log: HashMap<(String, String), Vec<tether_core::model::GenericCommand>>,
    events: BTreeMap<(String, String), Versioned<tether_core::model::EventBody>>,
    templates: BTreeMap<(String, String), Versioned<tether_core::model::TemplateBody>>,
    listings: BTreeMap<(String, String), StorageListing>,
    registry: HashMap<String, Bit>,
    installed: HashSet<String>,
    unfinished: Vec<Bit>,
    schedules: HashMap<String, Vec<u64>>,
    failing_downloads: HashSet<String>,
    fail_next: HashMap<&'static str, String>,
    calls: HashMap<&'static str, usize>,
}

/// Deterministic in-memory local engine.
#[derive(Clone)]
pub struct SimEngine {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    sample_interval: Duration,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for SimEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEngine")
            .field("sample_interval", &self.sample_interval)
            .finish_non_exhaustive()
    }
}

fn board_key(key: &ResourceKey) -> (String, String) {
    (key.app_id.clone(), key.board_id.clone())
}

fn pair(app_id: &str, id: &str) -> (String, String) {
    (app_id.to_string(), id.to_string())
}

impl SimEngine {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            sample_interval: Duration::from_secs(1),
        }
    }

    /// Delay between two download samples of one artifact.
    #[must_use]
    pub const fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one RPC and consume a failure armed for it.
    fn call(&self, op: &'static str) -> Result<()> {
        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        match state.fail_next.remove(op) {
            Some(reason) => Err(SyncError::Local(reason)),
            None => Ok(()),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Number of times `op` (the trait method name) was called.
    #[must_use]
    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    /// Make the next call of `op` fail with `reason`.
    pub fn fail_next(&self, op: &'static str, reason: impl Into<String>) {
        self.state().fail_next.insert(op, reason.into());
    }

    /// Insert or replace a board without counting an RPC.
    pub fn seed_board(&self, app_id: &str, board: Board) {
        let mut state = self.state();
        let key = pair(app_id, &board.id);
        match state.boards.get_mut(&key) {
            Some(entry) => entry.replace(board),
            None => {
                state.boards.insert(key, Versioned::new(board));
            }
        }
    }

    pub fn seed_app(&self, app: App) {
        self.state().apps.insert(app.id.clone(), app);
    }

    /// Commands the engine applied to `key`, oldest first.
    #[must_use]
    pub fn command_log(&self, key: &ResourceKey) -> Vec<tether_core::model::GenericCommand> {
        self.state().command_log.get(&board_key(key)).cloned().unwrap_or_default()
    }

    /// Make `bit` resolvable by `hub:id` during dependency walks.
    pub fn register_bit(&self, bit: Bit) {
        self.state().registry.insert(bit.reference().to_string(), bit);
    }

    /// Progress values (`downloaded`) reported for `hash`, one per sample interval.
    pub fn schedule_download(&self, hash: &str, steps: Vec<u64>) {
        self.state().schedules.insert(hash.to_string(), steps);
    }

    pub fn fail_download(&self, hash: &str) {
        self.state().failing_downloads.insert(hash.to_string());
    }

    pub fn mark_unfinished(&self, bit: Bit) {
        self.state().unfinished.push(bit);
    }

    fn walk(&self, root: &Bit) -> Result<ResolvedPack> {
        let state = self.state();
        let mut graph: DiGraph<Bit, ()> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let root_idx = graph.add_node(root.clone());
        index.insert(root.reference().to_string(), root_idx);

        let mut frontier = vec![root_idx];
        while let Some(node) = frontier.pop() {
            let deps = graph[node].dependencies.clone();
            for dep in deps {
                let name = dep.to_string();
                let target = if let Some(idx) = index.get(&name) {
                    *idx
                } else {
                    let bit = state
                        .registry
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| SyncError::Local(format!("unknown dependency {name}")))?;
                    let idx = graph.add_node(bit);
                    index.insert(name, idx);
                    frontier.push(idx);
                    idx
                };
                graph.add_edge(node, target, ());
            }
        }
        drop(state);

        if is_cyclic_directed(&graph) {
            warn!(hash = %root.hash, "dependency graph contains a cycle");
        }

        let mut dfs = Dfs::new(&graph, root_idx);
        let mut order = Vec::with_capacity(graph.node_count());
        while let Some(idx) = dfs.next(&graph) {
            order.push(graph[idx].clone());
        }
        Ok(ResolvedPack::from_bits(order))
    }
}

#[async_trait]
impl AppStore for SimEngine {
    async fn get_app(&self, app_id: &str) -> Result<App> {
        self.call("get_app")?;
        self.state().apps.get(app_id).cloned().ok_or_else(|| SyncError::NotFound {
            kind: "app",
            id: app_id.to_string(),
        })
    }

    async fn get_apps(&self) -> Result<Vec<App>> {
        self.call("get_apps")?;
        Ok(self.state().apps.values().cloned().collect())
    }

    async fn create_app(&self, app: App) -> Result<App> {
        self.call("create_app")?;
        let mut state = self.state();
        if state.apps.contains_key(&app.id) {
            return Err(SyncError::Local(format!("app {} already exists", app.id)));
        }
        state.apps.insert(app.id.clone(), app.clone());
        Ok(app)
    }

    async fn upsert_app(&self, app: App) -> Result<()> {
        self.call("upsert_app")?;
        self.state().apps.insert(app.id.clone(), app);
        Ok(())
    }

    async fn delete_app(&self, app_id: &str) -> Result<()> {
        self.call("delete_app")?;
        let mut state = self.state();
        state.apps.remove(app_id);
        state.boards.retain(|(app, _), _| app != app_id);
        state.events.retain(|(app, _), _| app != app_id);
        state.templates.retain(|(app, _), _| app != app_id);
        state.listings.retain(|(app, _), _| app != app_id);
        Ok(())
    }
}

#[async_trait]
impl BoardStore for SimEngine {
    async fn get_board(&self, key: &ResourceKey, version: Option<SemVer>) -> Result<Board> {
        self.call("get_board")?;
        self.state()
            .boards
            .get(&board_key(key))
            .and_then(|entry| entry.at(version))
            .ok_or_else(|| SyncError::NotFound {
                kind: "board",
                id: key.to_string(),
            })
    }

    async fn get_boards(&self, app_id: &str) -> Result<Vec<Board>> {
        self.call("get_boards")?;
        Ok(self
            .state()
            .boards
            .iter()
            .filter(|((app, _), _)| app == app_id)
            .map(|(_, entry)| entry.current.clone())
            .collect())
    }

    async fn get_board_versions(&self, key: &ResourceKey) -> Result<Vec<SemVer>> {
        self.call("get_board_versions")?;
        Ok(self
            .state()
            .boards
            .get(&board_key(key))
            .map(Versioned::versions)
            .unwrap_or_default())
    }

    async fn create_board_version(&self, key: &ResourceKey, kind: VersionType) -> Result<SemVer> {
        self.call("create_board_version")?;
        let now = self.now();
        let mut state = self.state();
        let entry = state.boards.get_mut(&board_key(key)).ok_or_else(|| SyncError::NotFound {
            kind: "board",
            id: key.to_string(),
        })?;
        let latest = entry.history.keys().next_back().copied().unwrap_or(SemVer::new(0, 0, 0));
        let next = latest.bump(kind);
        let mut snapshot = entry.current.clone();
        snapshot.version = Some(next);
        snapshot.updated_at = now;
        entry.replace(snapshot);
        Ok(next)
    }

    async fn upsert_board(&self, app_id: &str, board: Board) -> Result<()> {
        self.call("upsert_board")?;
        let mut state = self.state();
        let key = pair(app_id, &board.id);
        match state.boards.get_mut(&key) {
            Some(entry) => entry.replace(board),
            None => {
                state.boards.insert(key, Versioned::new(board));
            }
        }
        Ok(())
    }

    async fn delete_board(&self, key: &ResourceKey) -> Result<()> {
        self.call("delete_board")?;
        let mut state = self.state();
        state.boards.remove(&board_key(key));
        state.command_log.remove(&board_key(key));
        Ok(())
    }

    async fn execute_commands(&self, key: &ResourceKey, batch: Batch) -> Result<Batch> {
        self.call("execute_commands")?;
        let now = self.now();
        let mut state = self.state();
        let entry = state.boards.get_mut(&board_key(key)).ok_or_else(|| SyncError::NotFound {
            kind: "board",
            id: key.to_string(),
        })?;
        entry.current.updated_at = now;
        state
            .command_log
            .entry(board_key(key))
            .or_default()
            .extend(batch.iter().cloned());
        debug!(%key, commands = batch.len(), "sim engine applied batch");
        Ok(batch)
    }

    async fn undo_board(&self, key: &ResourceKey, batch: Batch) -> Result<()> {
        self.call("undo_board")?;
        let mut state = self.state();
        let log = state.command_log.entry(board_key(key)).or_default();
        if !log.ends_with(&batch) {
            return Err(SyncError::Local(format!("undo of {key}: batch is not the newest applied step")));
        }
        log.truncate(log.len() - batch.len());
        Ok(())
    }

    async fn redo_board(&self, key: &ResourceKey, batch: Batch) -> Result<()> {
        self.call("redo_board")?;
        self.state().command_log.entry(board_key(key)).or_default().extend(batch);
        Ok(())
    }
}

#[async_trait]
impl EventStore for SimEngine {
    async fn get_event(&self, app_id: &str, event_id: &str, version: Option<SemVer>) -> Result<Event> {
        self.call("get_event")?;
        self.state()
            .events
            .get(&pair(app_id, event_id))
            .and_then(|entry| entry.at(version))
            .ok_or_else(|| SyncError::NotFound {
                kind: "event",
                id: event_id.to_string(),
            })
    }

    async fn get_events(&self, app_id: &str) -> Result<Vec<Event>> {
        self.call("get_events")?;
        Ok(self
            .state()
            .events
            .iter()
            .filter(|((app, _), _)| app == app_id)
            .map(|(_, entry)| entry.current.clone())
            .collect())
    }

    async fn get_event_versions(&self, app_id: &str, event_id: &str) -> Result<Vec<SemVer>> {
        self.call("get_event_versions")?;
        Ok(self
            .state()
            .events
            .get(&pair(app_id, event_id))
            .map(Versioned::versions)
            .unwrap_or_default())
    }

    async fn upsert_event(&self, app_id: &str, event: Event) -> Result<Event> {
        self.call("upsert_event")?;
        let mut state = self.state();
        let key = pair(app_id, &event.id);
        match state.events.get_mut(&key) {
            Some(entry) => entry.replace(event.clone()),
            None => {
                state.events.insert(key, Versioned::new(event.clone()));
            }
        }
        Ok(event)
    }

    async fn delete_event(&self, app_id: &str, event_id: &str) -> Result<()> {
        self.call("delete_event")?;
        self.state().events.remove(&pair(app_id, event_id));
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for SimEngine {
    async fn get_template(
        &self,
        app_id: &str,
        template_id: &str,
        version: Option<SemVer>,
    ) -> Result<Template> {
        self.call("get_template")?;
        self.state()
            .templates
            .get(&pair(app_id, template_id))
            .and_then(|entry| entry.at(version))
            .ok_or_else(|| SyncError::NotFound {
                kind: "template",
                id: template_id.to_string(),
            })
    }

    async fn get_templates(&self, app_id: &str) -> Result<Vec<Template>> {
        self.call("get_templates")?;
        Ok(self
            .state()
            .templates
            .iter()
            .filter(|((app, _), _)| app == app_id)
            .map(|(_, entry)| entry.current.clone())
            .collect())
    }

    async fn upsert_template(&self, app_id: &str, template: Template) -> Result<Template> {
        self.call("upsert_template")?;
        let mut state = self.state();
        let key = pair(app_id, &template.id);
        match state.templates.get_mut(&key) {
            Some(entry) => entry.replace(template.clone()),
            None => {
                state.templates.insert(key, Versioned::new(template.clone()));
            }
        }
        Ok(template)
    }

    async fn delete_template(&self, app_id: &str, template_id: &str) -> Result<()> {
        self.call("delete_template")?;
        self.state().templates.remove(&pair(app_id, template_id));
        Ok(())
    }
}

#[async_trait]
impl StorageStore for SimEngine {
    async fn list_storage(&self, app_id: &str, prefix: &str) -> Result<StorageListing> {
        self.call("list_storage")?;
        Ok(self
            .state()
            .listings
            .get(&pair(app_id, prefix))
            .cloned()
            .unwrap_or_else(|| StorageListing {
                prefix: prefix.to_string(),
                items: Vec::new(),
            }))
    }

    async fn put_storage_listing(&self, app_id: &str, listing: StorageListing) -> Result<()> {
        self.call("put_storage_listing")?;
        self.state().listings.insert(pair(app_id, &listing.prefix), listing);
        Ok(())
    }

    async fn delete_storage(&self, app_id: &str, prefixes: &[String]) -> Result<()> {
        self.call("delete_storage")?;
        let doomed = |item: &StorageItem| prefixes.iter().any(|p| item.location.starts_with(p.as_str()));
        for ((app, _), listing) in &mut self.state().listings {
            if app == app_id {
                listing.items.retain(|item| !doomed(item));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BitStore for SimEngine {
    async fn get_pack_from_bit(&self, bit: &Bit) -> Result<ResolvedPack> {
        self.call("get_pack_from_bit")?;
        self.walk(bit)
    }

    async fn download_bit(&self, bit: &Bit, progress: mpsc::Sender<DownloadSample>) -> Result<()> {
        self.call("download_bit")?;
        let (steps, fails) = {
            let state = self.state();
            let max = bit.size_bytes.unwrap_or(0);
            let steps = state.schedules.get(&bit.hash).cloned().unwrap_or_else(|| vec![0, max]);
            (steps, state.failing_downloads.contains(&bit.hash))
        };
        let max = bit.size_bytes.unwrap_or(0);

        for (i, downloaded) in steps.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.sample_interval).await;
            }
            let sample = DownloadSample {
                hash: bit.hash.clone(),
                downloaded,
                max,
                path: format!("bits/{}", bit.hash),
            };
            if progress.send(sample).await.is_err() {
                return Err(SyncError::Local(format!("progress receiver for {} dropped", bit.hash)));
            }
        }

        if fails {
            return Err(SyncError::Local(format!("download of {} failed", bit.hash)));
        }
        let mut state = self.state();
        state.installed.insert(bit.hash.clone());
        state.unfinished.retain(|b| b.hash != bit.hash);
        Ok(())
    }

    async fn is_bit_installed(&self, bit: &Bit) -> Result<bool> {
        self.call("is_bit_installed")?;
        Ok(self.state().installed.contains(&bit.hash))
    }

    async fn get_installed_bits(&self) -> Result<Vec<Bit>> {
        self.call("get_installed_bits")?;
        let state = self.state();
        let mut bits: Vec<Bit> = state
            .registry
            .values()
            .filter(|bit| state.installed.contains(&bit.hash))
            .cloned()
            .collect();
        bits.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(bits)
    }

    async fn unfinished_downloads(&self) -> Result<Vec<Bit>> {
        self.call("unfinished_downloads")?;
        Ok(self.state().unfinished.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::model::{BitRef, BoardBody, CommandPayload, GenericCommand};

    fn bit(id: &str, size: u64, deps: &[&str]) -> Bit {
        Bit {
            id: id.to_string(),
            hub: "hub".to_string(),
            hash: format!("h-{id}"),
            dependency_tree_hash: format!("t-{id}"),
            dependencies: deps.iter().map(|d| BitRef::new("hub", *d)).collect(),
            download_link: None,
            size_bytes: Some(size),
        }
    }

    #[tokio::test]
    async fn walk_dedups_diamonds_and_survives_cycles() {
        let engine = SimEngine::default();
        engine.register_bit(bit("b", 2, &["d"]));
        engine.register_bit(bit("c", 3, &["d"]));
        engine.register_bit(bit("d", 4, &["a"]));
        let root = bit("a", 1, &["b", "c"]);
        engine.register_bit(root.clone());

        let pack = engine.get_pack_from_bit(&root).await.expect("walk");
        assert_eq!(pack.len(), 4);
        assert_eq!(pack.bits[0].hash, "h-a");
        assert_eq!(pack.size_bytes(), 10);
        assert_eq!(engine.calls("get_pack_from_bit"), 1);
    }

    #[tokio::test]
    async fn unknown_dependency_is_a_local_error() {
        let engine = SimEngine::default();
        let err = engine
            .get_pack_from_bit(&bit("a", 1, &["ghost"]))
            .await
            .expect_err("missing dependency");
        assert!(matches!(err, SyncError::Local(_)));
    }

    #[tokio::test]
    async fn undo_removes_newest_step_only() {
        let engine = SimEngine::default();
        engine.seed_board("a", Board::new("b", Utc::now(), BoardBody::default()));
        let key = ResourceKey::new("a", "b");
        let step = |n: i64| vec![GenericCommand::AddNode(CommandPayload::new().with("n", n))];

        engine.execute_commands(&key, step(1)).await.expect("apply");
        engine.execute_commands(&key, step(2)).await.expect("apply");
        assert!(engine.undo_board(&key, step(1)).await.is_err());
        engine.undo_board(&key, step(2)).await.expect("undo");
        assert_eq!(engine.command_log(&key), step(1));
        engine.redo_board(&key, step(2)).await.expect("redo");
        assert_eq!(engine.command_log(&key).len(), 2);
    }

    #[tokio::test]
    async fn armed_failures_fire_once() {
        let engine = SimEngine::default();
        engine.fail_next("get_apps", "engine busy");
        assert!(engine.get_apps().await.is_err());
        assert!(engine.get_apps().await.is_ok());
        assert_eq!(engine.calls("get_apps"), 2);
    }

    #[tokio::test]
    async fn versions_snapshot_the_current_board() {
        let engine = SimEngine::default();
        engine.seed_board("a", Board::new("b", Utc::now(), BoardBody::default()));
        let key = ResourceKey::new("a", "b");
        let v1 = engine.create_board_version(&key, VersionType::Minor).await.expect("version");
        let v2 = engine.create_board_version(&key, VersionType::Major).await.expect("version");
        assert_eq!(v1, SemVer::new(0, 1, 0));
        assert_eq!(v2, SemVer::new(1, 0, 0));
        assert_eq!(engine.get_board_versions(&key).await.expect("versions"), vec![v1, v2]);
        assert!(engine.get_board(&key, Some(SemVer::new(9, 9, 9))).await.is_err());
    }
}
