//! Connectivity is decided by the host, never probed here.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

/// Tells the sync layer whether an app currently works offline.
#[async_trait]
pub trait ConnectivityPolicy: Send + Sync {
    async fn is_offline(&self, app_id: &str) -> bool;
}

/// Every app is online.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

#[async_trait]
impl ConnectivityPolicy for AlwaysOnline {
    async fn is_offline(&self, _app_id: &str) -> bool {
        false
    }
}

/// An explicit, mutable set of offline apps, optionally with a global switch.
#[derive(Debug, Default)]
pub struct StaticConnectivity {
    offline_apps: RwLock<HashSet<String>>,
    all_offline: RwLock<bool>,
}

impl StaticConnectivity {
    pub fn new(offline_apps: impl IntoIterator<Item = String>) -> Self {
        Self {
            offline_apps: RwLock::new(offline_apps.into_iter().collect()),
            all_offline: RwLock::new(false),
        }
    }

    pub fn set_offline(&self, app_id: &str, offline: bool) {
        let mut apps = match self.offline_apps.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if offline {
            apps.insert(app_id.to_string());
        } else {
            apps.remove(app_id);
        }
    }

    /// Force every app offline (or clear the override).
    pub fn set_all_offline(&self, offline: bool) {
        match self.all_offline.write() {
            Ok(mut guard) => *guard = offline,
            Err(poisoned) => *poisoned.into_inner() = offline,
        }
    }
}

#[async_trait]
impl ConnectivityPolicy for StaticConnectivity {
    async fn is_offline(&self, app_id: &str) -> bool {
        let all = match self.all_offline.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if all {
            return true;
        }
        match self.offline_apps.read() {
            Ok(apps) => apps.contains(app_id),
            Err(poisoned) => poisoned.into_inner().contains(app_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_policy_tracks_per_app_and_global_state() {
        let policy = StaticConnectivity::new(["a1".to_string()]);
        assert!(policy.is_offline("a1").await);
        assert!(!policy.is_offline("a2").await);

        policy.set_offline("a1", false);
        policy.set_offline("a2", true);
        assert!(!policy.is_offline("a1").await);
        assert!(policy.is_offline("a2").await);

        policy.set_all_offline(true);
        assert!(policy.is_offline("a1").await);
        assert!(!AlwaysOnline.is_offline("a1").await);
    }
}
