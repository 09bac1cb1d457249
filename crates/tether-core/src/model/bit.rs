//! Installable artifacts ("bits") and their materialization progress.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Reference to another bit, written `hub:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BitRef {
    pub hub: String,
    pub id: String,
}

impl BitRef {
    pub fn new(hub: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            hub: hub.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for BitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hub, self.id)
    }
}

impl TryFrom<String> for BitRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        // Hubs are URLs and may contain ':' themselves; the id never does.
        match value.rsplit_once(':') {
            Some((hub, id)) if !hub.is_empty() && !id.is_empty() => Ok(Self::new(hub, id)),
            _ => Err(format!("bit reference '{value}' is not of the form hub:id")),
        }
    }
}

impl From<BitRef> for String {
    fn from(value: BitRef) -> Self {
        value.to_string()
    }
}

/// Content-addressed artifact descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bit {
    pub id: String,
    #[serde(default)]
    pub hub: String,
    pub hash: String,
    /// Stable hash of the full transitive dependency set.
    pub dependency_tree_hash: String,
    #[serde(default)]
    pub dependencies: Vec<BitRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
    #[serde(default, rename = "size", skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl Bit {
    #[must_use]
    pub fn reference(&self) -> BitRef {
        BitRef::new(self.hub.clone(), self.id.clone())
    }
}

/// Flattened, deduplicated transitive closure of a bit's dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPack {
    pub bits: Vec<Bit>,
}

impl ResolvedPack {
    /// Build a pack, dropping repeated artifacts by hash. First occurrence wins.
    #[must_use]
    pub fn from_bits(bits: impl IntoIterator<Item = Bit>) -> Self {
        let mut seen = HashSet::new();
        let bits = bits
            .into_iter()
            .filter(|bit| seen.insert(bit.hash.clone()))
            .collect();
        Self { bits }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Sum of the declared sizes. Bits without a size count as zero.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.bits.iter().filter_map(|b| b.size_bytes).sum()
    }
}

/// One artifact's download progress at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSample {
    pub hash: String,
    pub downloaded: u64,
    pub max: u64,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bit(hash: &str, size: Option<u64>) -> Bit {
        Bit {
            id: format!("id-{hash}"),
            hub: "hub.example".to_string(),
            hash: hash.to_string(),
            dependency_tree_hash: format!("tree-{hash}"),
            dependencies: Vec::new(),
            download_link: None,
            size_bytes: size,
        }
    }

    #[test]
    fn bit_ref_parses_hub_urls_with_colons() {
        let parsed = BitRef::try_from("https://hub.example:8443:llama".to_string())
            .expect("valid reference");
        assert_eq!(parsed.hub, "https://hub.example:8443");
        assert_eq!(parsed.id, "llama");
        assert!(BitRef::try_from("no-separator".to_string()).is_err());
        assert!(BitRef::try_from("hub:".to_string()).is_err());
    }

    #[test]
    fn dependencies_serialize_as_strings() {
        let mut b = bit("h1", Some(3));
        b.dependencies.push(BitRef::new("hub.example", "tokenizer"));
        let value = serde_json::to_value(&b).expect("serialize");
        assert_eq!(value["dependencies"], json!(["hub.example:tokenizer"]));
        assert_eq!(value["size"], 3);
    }

    #[test]
    fn pack_dedups_by_hash_and_sums_sizes() {
        let pack = ResolvedPack::from_bits([bit("a", Some(10)), bit("b", None), bit("a", Some(10))]);
        assert_eq!(pack.len(), 2);
        assert_eq!(pack.size_bytes(), 10);
    }
}
