//! Local Store Adapter contract.
//!
//! The embedded execution engine is locally authoritative: every read is
//! answered from it and every mutation lands in it first. One trait per
//! resource family; [`LocalStore`] is the umbrella the engine holds.
//!
//! Implementations must make each write a single atomic upsert. The sync
//! layer relies on that to re-issue reconciliations without coordination.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::{
    App, Batch, Bit, Board, DownloadSample, Event, ResolvedPack, ResourceKey, SemVer,
    StorageListing, Template, VersionType,
};

#[async_trait]
pub trait AppStore: Send + Sync {
    async fn get_app(&self, app_id: &str) -> Result<App>;
    async fn get_apps(&self) -> Result<Vec<App>>;
    /// Create an app. The id of `app` is used as given.
    async fn create_app(&self, app: App) -> Result<App>;
    async fn upsert_app(&self, app: App) -> Result<()>;
    async fn delete_app(&self, app_id: &str) -> Result<()>;
}

#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Read a board, optionally at a pinned historical version.
    async fn get_board(&self, key: &ResourceKey, version: Option<SemVer>) -> Result<Board>;
    async fn get_boards(&self, app_id: &str) -> Result<Vec<Board>>;
    async fn get_board_versions(&self, key: &ResourceKey) -> Result<Vec<SemVer>>;
    async fn create_board_version(&self, key: &ResourceKey, kind: VersionType) -> Result<SemVer>;
    async fn upsert_board(&self, app_id: &str, board: Board) -> Result<()>;
    async fn delete_board(&self, key: &ResourceKey) -> Result<()>;
    /// Apply a batch atomically. Returns the commands as the engine applied them.
    async fn execute_commands(&self, key: &ResourceKey, batch: Batch) -> Result<Batch>;
    /// Apply the inverse of `batch`.
    async fn undo_board(&self, key: &ResourceKey, batch: Batch) -> Result<()>;
    /// Re-apply `batch` after an undo.
    async fn redo_board(&self, key: &ResourceKey, batch: Batch) -> Result<()>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_event(&self, app_id: &str, event_id: &str, version: Option<SemVer>)
    -> Result<Event>;
    async fn get_events(&self, app_id: &str) -> Result<Vec<Event>>;
    async fn get_event_versions(&self, app_id: &str, event_id: &str) -> Result<Vec<SemVer>>;
    async fn upsert_event(&self, app_id: &str, event: Event) -> Result<Event>;
    async fn delete_event(&self, app_id: &str, event_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(
        &self,
        app_id: &str,
        template_id: &str,
        version: Option<SemVer>,
    ) -> Result<Template>;
    async fn get_templates(&self, app_id: &str) -> Result<Vec<Template>>;
    async fn upsert_template(&self, app_id: &str, template: Template) -> Result<Template>;
    async fn delete_template(&self, app_id: &str, template_id: &str) -> Result<()>;
}

#[async_trait]
pub trait StorageStore: Send + Sync {
    async fn list_storage(&self, app_id: &str, prefix: &str) -> Result<StorageListing>;
    /// Replace the cached listing for `listing.prefix`.
    async fn put_storage_listing(&self, app_id: &str, listing: StorageListing) -> Result<()>;
    async fn delete_storage(&self, app_id: &str, prefixes: &[String]) -> Result<()>;
}

#[async_trait]
pub trait BitStore: Send + Sync {
    /// Walk the dependency graph of `bit` and return its closure, root included.
    async fn get_pack_from_bit(&self, bit: &Bit) -> Result<ResolvedPack>;
    /// Materialize one artifact, streaming progress into `progress` until done.
    async fn download_bit(&self, bit: &Bit, progress: mpsc::Sender<DownloadSample>) -> Result<()>;
    async fn is_bit_installed(&self, bit: &Bit) -> Result<bool>;
    async fn get_installed_bits(&self) -> Result<Vec<Bit>>;
    /// Root bits whose materialization started but never finished.
    async fn unfinished_downloads(&self) -> Result<Vec<Bit>>;
}

/// Every resource family of the embedded engine.
pub trait LocalStore: AppStore + BoardStore + EventStore + TemplateStore + StorageStore + BitStore {}

impl<T> LocalStore for T where
    T: AppStore + BoardStore + EventStore + TemplateStore + StorageStore + BitStore
{
}
