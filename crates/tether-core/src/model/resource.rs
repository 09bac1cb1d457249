use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Composite key `(app_id, board_id)` partitioning history and offline state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub app_id: String,
    pub board_id: String,
}

impl ResourceKey {
    pub fn new(app_id: impl Into<String>, board_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            board_id: board_id.into(),
        }
    }

    /// Row key used by the persisted history and queue tables.
    ///
    /// The app id is prefixed with its length in characters so that no two keys encode the same,
    /// whatever characters the ids contain.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}:{}/{}", self.app_id.chars().count(), self.app_id, self.board_id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_id, self.board_id)
    }
}

/// Semantic version triple, serialized as `[major, minor, patch]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemVer(pub u32, pub u32, pub u32);

impl SemVer {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self(major, minor, patch)
    }

    #[must_use]
    pub const fn major(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn minor(self) -> u32 {
        self.1
    }

    #[must_use]
    pub const fn patch(self) -> u32 {
        self.2
    }

    /// Next version for a bump of the given kind.
    #[must_use]
    pub const fn bump(self, kind: VersionType) -> Self {
        match kind {
            VersionType::Major => Self(self.0 + 1, 0, 0),
            VersionType::Minor => Self(self.0, self.1 + 1, 0),
            VersionType::Patch => Self(self.0, self.1, self.2 + 1),
        }
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

impl std::str::FromStr for SemVer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &str| -> Result<u32, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing {name} component in '{s}'"))?
                .parse::<u32>()
                .map_err(|e| format!("invalid {name} component in '{s}': {e}"))
        };
        let version = Self(next("major")?, next("minor")?, next("patch")?);
        if parts.next().is_some() {
            return Err(format!("too many components in '{s}'"));
        }
        Ok(version)
    }
}

/// Which component a new board version bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionType {
    Major,
    Minor,
    Patch,
}

/// Anything addressable by a stable string id.
pub trait Identified {
    fn id(&self) -> &str;
}

/// A remote-synchronizable entity: identity, optional version, a locally
/// authoritative `updated_at`, and the resource body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedResource<T> {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<SemVer>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> SyncedResource<T> {
    pub fn new(id: impl Into<String>, updated_at: DateTime<Utc>, body: T) -> Self {
        Self {
            id: id.into(),
            version: None,
            updated_at,
            body,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: SemVer) -> Self {
        self.version = Some(version);
        self
    }
}

impl<T> Identified for SyncedResource<T> {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Nodes, comments, variables and layers. Opaque to the sync layer.
    #[serde(flatten)]
    pub graph: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub name: String,
    pub board_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_version: Option<SemVer>,
    #[serde(default)]
    pub active: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type App = SyncedResource<AppBody>;
pub type Board = SyncedResource<BoardBody>;
pub type Event = SyncedResource<EventBody>;
pub type Template = SyncedResource<TemplateBody>;

/// Fields for creating or updating a board's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Board>,
}

/// One object of an app's storage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
    pub location: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

/// Storage objects under one prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageListing {
    pub prefix: String,
    pub items: Vec<StorageItem>,
}

/// User feedback on an event run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_id: Option<String>,
}

/// A presigned URL for uploading or downloading one storage object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    #[serde(alias = "prefix")]
    pub location: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn semver_serializes_as_triple() {
        let v = SemVer::new(1, 4, 2);
        assert_eq!(serde_json::to_value(v).expect("serialize"), json!([1, 4, 2]));
        assert_eq!(v.to_string(), "1.4.2");
        assert_eq!("1.4.2".parse::<SemVer>(), Ok(v));
        assert!("1.4".parse::<SemVer>().is_err());
        assert!("1.4.2.0".parse::<SemVer>().is_err());
    }

    #[test]
    fn bump_resets_lower_components() {
        let v = SemVer::new(1, 4, 2);
        assert_eq!(v.bump(VersionType::Major), SemVer::new(2, 0, 0));
        assert_eq!(v.bump(VersionType::Minor), SemVer::new(1, 5, 0));
        assert_eq!(v.bump(VersionType::Patch), SemVer::new(1, 4, 3));
    }

    #[test]
    fn storage_key_prefixes_app_length() {
        let key = ResourceKey::new("app1", "board1");
        assert_eq!(key.storage_key(), "4:app1/board1");
        assert_eq!(key.to_string(), "app1/board1");
    }

    #[test]
    fn storage_keys_of_separator_laden_ids_stay_distinct() {
        let pairs = [("a_b", "c"), ("a", "b_c"), ("a/b", "c"), ("a", "b/c"), ("1:a", "b"), ("1", "a:b")];
        let keys: std::collections::HashSet<String> = pairs
            .iter()
            .map(|(app, board)| ResourceKey::new(*app, *board).storage_key())
            .collect();
        assert_eq!(keys.len(), pairs.len());
    }

    #[test]
    fn board_body_keeps_unknown_graph_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid ts");
        let raw = json!({
            "id": "b1",
            "version": [0, 1, 0],
            "updated_at": ts,
            "name": "Main",
            "description": "",
            "nodes": {"n1": {"name": "start"}},
        });
        let board: Board = serde_json::from_value(raw.clone()).expect("deserialize");
        assert_eq!(board.version, Some(SemVer::new(0, 1, 0)));
        assert_eq!(board.body.graph["nodes"]["n1"]["name"], "start");
        assert_eq!(serde_json::to_value(&board).expect("serialize"), raw);
    }
}
