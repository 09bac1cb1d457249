//! Dependency packs cached by dependency tree hash.
//!
//! The tree hash changes exactly when the dependency set changes, so cached
//! packs never expire. Empty packs are not cached: an empty walk usually
//! means the engine has not indexed the hub yet.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::adapter::BitStore;
use crate::clock::Clock;
use crate::db::{StateDb, from_micros, to_micros};
use crate::error::{Result, StoreError};
use crate::model::{Bit, ResolvedPack};
use crate::sync::KeyedLocks;

/// One row of the pack cache, without the pack itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedPack {
    pub dependency_tree_hash: String,
    pub root_hash: String,
    pub bit_count: u64,
    pub size_bytes: u64,
    pub cached_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PackResolver {
    db: StateDb,
    bits: Arc<dyn BitStore>,
    clock: Arc<dyn Clock>,
    inflight: KeyedLocks,
}

impl std::fmt::Debug for PackResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackResolver").field("db", &self.db).finish_non_exhaustive()
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl PackResolver {
    pub fn new(db: StateDb, bits: Arc<dyn BitStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            bits,
            clock,
            inflight: KeyedLocks::new(),
        }
    }

    /// Cached pack for `dependency_tree_hash`, if any.
    pub fn cached(&self, dependency_tree_hash: &str) -> Result<Option<ResolvedPack>> {
        let json: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT pack_json FROM pack_cache WHERE dependency_tree_hash = ?1",
                    [dependency_tree_hash],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        Ok(json
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()?)
    }

    /// The full transitive closure of `bit`, root included.
    ///
    /// Concurrent calls for the same tree hash share one engine walk.
    pub async fn resolve(&self, bit: &Bit) -> Result<ResolvedPack> {
        let tree_hash = &bit.dependency_tree_hash;
        if let Some(pack) = self.cached(tree_hash)? {
            debug!(hash = %bit.hash, %tree_hash, "pack cache hit");
            return Ok(pack);
        }

        let _guard = self.inflight.lock(tree_hash).await;
        if let Some(pack) = self.cached(tree_hash)? {
            return Ok(pack);
        }

        let pack = self.bits.get_pack_from_bit(bit).await?;
        debug!(hash = %bit.hash, %tree_hash, bits = pack.len(), "dependency walk finished");
        if !pack.is_empty() {
            self.store(bit, &pack)?;
        }
        Ok(pack)
    }

    fn store(&self, bit: &Bit, pack: &ResolvedPack) -> Result<()> {
        let json = serde_json::to_string(pack)?;
        let count = i64::try_from(pack.len()).unwrap_or(i64::MAX);
        let size = to_i64(pack.size_bytes());
        let now = to_micros(self.clock.now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pack_cache
                    (dependency_tree_hash, root_hash, pack_json, bit_count, size_bytes, cached_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![bit.dependency_tree_hash, bit.hash, json, count, size, now],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Σ declared size over the resolved pack of `bit`.
    pub async fn pack_size(&self, bit: &Bit) -> Result<u64> {
        Ok(self.resolve(bit).await?.size_bytes())
    }

    /// Every cached pack, newest first.
    pub fn list_cached(&self) -> Result<Vec<CachedPack>> {
        list_cached_packs(&self.db)
    }

    /// Drop one cached pack. Returns `false` when nothing was cached.
    pub fn evict(&self, dependency_tree_hash: &str) -> Result<bool> {
        evict_pack(&self.db, dependency_tree_hash)
    }
}

/// Every cached pack in `db`, newest first. Needs no engine.
pub fn list_cached_packs(db: &StateDb) -> Result<Vec<CachedPack>> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT dependency_tree_hash, root_hash, bit_count, size_bytes, cached_at_us
             FROM pack_cache ORDER BY cached_at_us DESC, dependency_tree_hash",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(dependency_tree_hash, root_hash, count, size, cached_at)| {
                Ok(CachedPack {
                    dependency_tree_hash,
                    root_hash,
                    bit_count: to_u64(count),
                    size_bytes: to_u64(size),
                    cached_at: from_micros(cached_at)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()
    })?;
    Ok(rows)
}

pub fn evict_pack(db: &StateDb, dependency_tree_hash: &str) -> Result<bool> {
    let removed = db.with_conn(|conn| {
        Ok(conn.execute(
            "DELETE FROM pack_cache WHERE dependency_tree_hash = ?1",
            [dependency_tree_hash],
        )?)
    })?;
    if removed > 0 {
        debug!(%dependency_tree_hash, "pack evicted");
    }
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::model::DownloadSample;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct CountingBits {
        walks: AtomicUsize,
        empty: bool,
    }

    fn bit(hash: &str, size: u64) -> Bit {
        Bit {
            id: format!("id-{hash}"),
            hub: "hub".to_string(),
            hash: hash.to_string(),
            dependency_tree_hash: format!("tree-{hash}"),
            dependencies: Vec::new(),
            download_link: None,
            size_bytes: Some(size),
        }
    }

    #[async_trait]
    impl BitStore for CountingBits {
        async fn get_pack_from_bit(&self, root: &Bit) -> Result<ResolvedPack> {
            self.walks.fetch_add(1, Ordering::SeqCst);
            if self.empty {
                return Ok(ResolvedPack::default());
            }
            Ok(ResolvedPack::from_bits([root.clone(), bit("dep-a", 30), bit("dep-b", 12)]))
        }

        async fn download_bit(&self, _bit: &Bit, _progress: mpsc::Sender<DownloadSample>) -> Result<()> {
            Ok(())
        }

        async fn is_bit_installed(&self, _bit: &Bit) -> Result<bool> {
            Ok(false)
        }

        async fn get_installed_bits(&self) -> Result<Vec<Bit>> {
            Ok(Vec::new())
        }

        async fn unfinished_downloads(&self) -> Result<Vec<Bit>> {
            Ok(Vec::new())
        }
    }

    fn resolver(bits: Arc<CountingBits>) -> PackResolver {
        PackResolver::new(StateDb::open_in_memory().expect("db"), bits, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn unchanged_tree_hash_walks_once() {
        let bits = Arc::new(CountingBits::default());
        let resolver = resolver(Arc::clone(&bits));
        let root = bit("root", 100);

        let first = resolver.resolve(&root).await.expect("resolve");
        let second = resolver.resolve(&root).await.expect("resolve");
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(bits.walks.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.pack_size(&root).await.expect("size"), 142);
    }

    #[tokio::test]
    async fn changed_tree_hash_walks_again() {
        let bits = Arc::new(CountingBits::default());
        let resolver = resolver(Arc::clone(&bits));
        let mut root = bit("root", 1);
        resolver.resolve(&root).await.expect("resolve");
        root.dependency_tree_hash = "tree-root-v2".to_string();
        resolver.resolve(&root).await.expect("resolve");
        assert_eq!(bits.walks.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.list_cached().expect("list").len(), 2);
    }

    #[tokio::test]
    async fn empty_packs_are_not_cached() {
        let bits = Arc::new(CountingBits {
            empty: true,
            ..CountingBits::default()
        });
        let resolver = resolver(Arc::clone(&bits));
        let root = bit("root", 1);
        assert!(resolver.resolve(&root).await.expect("resolve").is_empty());
        assert!(resolver.resolve(&root).await.expect("resolve").is_empty());
        assert_eq!(bits.walks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn evicted_packs_are_walked_again() {
        let bits = Arc::new(CountingBits::default());
        let resolver = resolver(Arc::clone(&bits));
        let root = bit("root", 1);
        resolver.resolve(&root).await.expect("resolve");

        let listed = resolver.list_cached().expect("list");
        assert_eq!(listed[0].root_hash, "root");
        assert_eq!(listed[0].bit_count, 3);
        assert!(resolver.evict("tree-root").expect("evict"));
        assert!(!resolver.evict("tree-root").expect("evict"));

        resolver.resolve(&root).await.expect("resolve");
        assert_eq!(bits.walks.load(Ordering::SeqCst), 2);
    }
}
