//! Explicit value cache with per-key change notification.
//!
//! Values are kept as JSON so one cache serves every resource type. The
//! accessor primes entries with the local value on each read and publishes an
//! [`CacheEvent::Updated`] only when a background reconciliation replaced it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Identifies one cached resource read, e.g. `board/app1/board1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn new(kind: &str, parts: &[&str]) -> Self {
        let mut key = kind.to_string();
        for part in parts {
            key.push('/');
            key.push_str(part);
        }
        Self(key)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A reconciliation wrote a changed value.
    Updated(CacheKey),
    /// The entry was dropped; readers should refetch.
    Invalidated(CacheKey),
}

impl CacheEvent {
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        match self {
            Self::Updated(key) | Self::Invalidated(key) => key,
        }
    }
}

#[derive(Debug)]
pub struct Cache {
    entries: Mutex<HashMap<CacheKey, Value>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Value>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entries().get(key).cloned()
    }

    /// Typed read. Entries that no longer decode as `T` read as absent.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Store without notifying subscribers.
    pub fn prime<T: Serialize>(&self, key: CacheKey, value: &T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.entries().insert(key, value);
        Ok(())
    }

    /// Store and notify subscribers of `key`.
    pub fn put<T: Serialize>(&self, key: CacheKey, value: &T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.entries().insert(key.clone(), value);
        // No receivers is fine.
        let _ = self.events.send(CacheEvent::Updated(key));
        Ok(())
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.entries().remove(key);
        let _ = self.events.send(CacheEvent::Invalidated(key.clone()));
    }

    /// Drop every entry whose key starts with `prefix`, e.g. all boards of an app.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let removed: Vec<CacheKey> = {
            let mut entries = self.entries();
            let keys: Vec<CacheKey> = entries
                .keys()
                .filter(|k| k.as_str().starts_with(prefix))
                .cloned()
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };
        for key in removed {
            let _ = self.events.send(CacheEvent::Invalidated(key));
        }
    }

    /// Subscribe to changes of one key.
    #[must_use]
    pub fn subscribe(&self, key: CacheKey) -> Subscription {
        Subscription {
            key: Some(key),
            rx: self.events.subscribe(),
        }
    }

    /// Subscribe to changes of every key.
    #[must_use]
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            key: None,
            rx: self.events.subscribe(),
        }
    }
}

/// Receiver half of a cache subscription.
#[derive(Debug)]
pub struct Subscription {
    key: Option<CacheKey>,
    rx: broadcast::Receiver<CacheEvent>,
}

impl Subscription {
    /// Wait for the next matching event. `None` once the cache is gone.
    ///
    /// A slow subscriber that lagged behind gets a synthetic invalidation for
    /// its key so it refetches instead of silently missing an update.
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.key.as_ref().is_none_or(|k| k == event.key()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "cache subscriber lagged");
                    if let Some(key) = &self.key {
                        return Some(CacheEvent::Invalidated(key.clone()));
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll for a matching event that is already queued.
    pub fn try_recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.key.as_ref().is_none_or(|k| k == event.key()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    if let Some(key) = &self.key {
                        return Some(CacheEvent::Invalidated(key.clone()));
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prime_does_not_notify_but_put_does() {
        let cache = Cache::new();
        let key = CacheKey::new("board", &["a1", "b1"]);
        let mut sub = cache.subscribe(key.clone());

        cache.prime(key.clone(), &json!({"v": 1})).expect("prime");
        assert!(sub.try_recv().is_none());
        assert_eq!(cache.get(&key), Some(json!({"v": 1})));

        cache.put(key.clone(), &json!({"v": 2})).expect("put");
        assert_eq!(sub.try_recv(), Some(CacheEvent::Updated(key.clone())));
        assert_eq!(cache.get(&key), Some(json!({"v": 2})));
    }

    #[test]
    fn subscriptions_filter_by_key() {
        let cache = Cache::new();
        let mine = CacheKey::new("board", &["a1", "b1"]);
        let other = CacheKey::new("board", &["a1", "b2"]);
        let mut sub = cache.subscribe(mine.clone());
        let mut all = cache.subscribe_all();

        cache.put(other.clone(), &1).expect("put");
        cache.invalidate(&mine);

        assert_eq!(sub.try_recv(), Some(CacheEvent::Invalidated(mine.clone())));
        assert!(sub.try_recv().is_none());
        assert_eq!(all.try_recv(), Some(CacheEvent::Updated(other)));
        assert_eq!(all.try_recv(), Some(CacheEvent::Invalidated(mine)));
    }

    #[test]
    fn invalidate_prefix_drops_matching_entries() {
        let cache = Cache::new();
        cache.prime(CacheKey::new("boards", &["a1"]), &1).expect("prime");
        cache.prime(CacheKey::new("board", &["a1", "b1"]), &1).expect("prime");
        cache.prime(CacheKey::new("board", &["a2", "b1"]), &1).expect("prime");

        cache.invalidate_prefix("board/a1/");
        assert!(cache.get(&CacheKey::new("board", &["a1", "b1"])).is_none());
        assert!(cache.get(&CacheKey::new("board", &["a2", "b1"])).is_some());
        assert!(cache.get(&CacheKey::new("boards", &["a1"])).is_some());
    }

    #[test]
    fn typed_reads_decode_or_miss() {
        let cache = Cache::new();
        let key = CacheKey::new("count", &[]);
        cache.prime(key.clone(), &42_u32).expect("prime");
        assert_eq!(cache.get_as::<u32>(&key), Some(42));
        assert_eq!(cache.get_as::<String>(&key), None);
        assert_eq!(key.as_str(), "count");
    }
}
