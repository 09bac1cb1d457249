//! Bit dependency resolution and pack materialization.

pub mod download;
pub mod resolver;

pub use download::{DownloadAggregator, DownloadHandle, DownloadOrchestrator, DownloadStatus};
pub use resolver::{CachedPack, PackResolver, evict_pack, list_cached_packs};
