//! Structural diff and the remote-wins overwrite policy.
//!
//! The policy is deliberately coarse: any difference outside the excluded
//! fields replaces the whole local entity with the remote one. There is no
//! field-level merge, so a concurrent local edit that has not reached the
//! remote yet is overwritten. Pinned historical reads are never reconciled.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::model::SemVer;

/// Fields that are locally authoritative on every synced resource.
pub const DEFAULT_EXCLUSIONS: &[&str] = &["updated_at"];

/// One leaf-level difference. `None` means the key is absent on that side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffEntry {
    pub path: String,
    pub local: Option<Value>,
    pub remote: Option<Value>,
}

/// Which version of a resource a read asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPin {
    #[default]
    Latest,
    Pinned(SemVer),
}

impl VersionPin {
    #[must_use]
    pub const fn is_pinned(self) -> bool {
        matches!(self, Self::Pinned(_))
    }

    #[must_use]
    pub const fn version(self) -> Option<SemVer> {
        match self {
            Self::Latest => None,
            Self::Pinned(v) => Some(v),
        }
    }
}

impl From<Option<SemVer>> for VersionPin {
    fn from(version: Option<SemVer>) -> Self {
        version.map_or(Self::Latest, Self::Pinned)
    }
}

/// Outcome of comparing a local value against a fresh remote one.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The read was pinned to a historical version.
    Skipped,
    /// Nothing differs outside the excluded fields.
    InSync,
    /// Local must be replaced by `value` (remote with local excluded fields).
    Overwrite {
        differences: Vec<DiffEntry>,
        value: Value,
    },
}

impl Reconciliation {
    #[must_use]
    pub const fn is_overwrite(&self) -> bool {
        matches!(self, Self::Overwrite { .. })
    }
}

/// Recursively union the keys of both sides and report every path where the
/// values differ and are not both composites of the same shape.
#[must_use]
pub fn deep_differences(local: &Value, remote: &Value) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    walk(Some(local), Some(remote), "", &mut out);
    out
}

fn child_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn walk(local: Option<&Value>, remote: Option<&Value>, path: &str, out: &mut Vec<DiffEntry>) {
    if local == remote {
        return;
    }

    match (local, remote) {
        (Some(Value::Object(l)), Some(Value::Object(r))) => {
            let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
            for key in keys {
                walk(l.get(key), r.get(key), &child_path(path, key), out);
            }
        }
        (Some(Value::Array(l)), Some(Value::Array(r))) => {
            for index in 0..l.len().max(r.len()) {
                walk(l.get(index), r.get(index), &child_path(path, &index.to_string()), out);
            }
        }
        _ => out.push(DiffEntry {
            path: path.to_string(),
            local: local.cloned(),
            remote: remote.cloned(),
        }),
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn parent_object<'a>(value: &'a mut Value, path: &str) -> Option<(&'a mut Map<String, Value>, String)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop()?.to_string();
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            _ => return None,
        };
    }
    match current {
        Value::Object(map) => Some((map, last)),
        _ => None,
    }
}

/// Copy the local value of every excluded dotted path into `remote`, so those
/// fields never count as a difference and survive the overwrite.
pub fn apply_exclusions(remote: &mut Value, local: &Value, exclusions: &[&str]) {
    for path in exclusions {
        let local_value = lookup(local, path).cloned();
        let Some((parent, field)) = parent_object(remote, path) else {
            continue;
        };
        match local_value {
            Some(value) => {
                parent.insert(field, value);
            }
            None => {
                parent.remove(&field);
            }
        }
    }
}

/// Decide whether the local value must be replaced by `remote`.
#[must_use]
pub fn reconcile(
    local: &Value,
    mut remote: Value,
    exclusions: &[&str],
    pin: VersionPin,
) -> Reconciliation {
    if pin.is_pinned() {
        return Reconciliation::Skipped;
    }

    apply_exclusions(&mut remote, local, exclusions);
    let differences = deep_differences(local, &remote);
    if differences.is_empty() {
        Reconciliation::InSync
    } else {
        Reconciliation::Overwrite {
            differences,
            value: remote,
        }
    }
}

/// Log an overwrite at `debug`: the count, then one line per path.
pub fn log_differences(key: &str, differences: &[DiffEntry]) {
    tracing::debug!(key, count = differences.len(), "remote differs from local, overwriting");
    for diff in differences {
        tracing::debug!(
            key,
            path = %diff.path,
            local = %preview(diff.local.as_ref()),
            remote = %preview(diff.remote.as_ref()),
            "difference"
        );
    }
}

fn preview(value: Option<&Value>) -> String {
    const MAX: usize = 100;
    let Some(value) = value else {
        return "<absent>".to_string();
    };
    let rendered = value.to_string();
    if rendered.len() <= MAX {
        return rendered;
    }
    let mut cut = MAX;
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &rendered[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn single_leaf_difference_is_reported_by_path() {
        let diff = deep_differences(&json!({"a": 1, "b": 2}), &json!({"a": 1, "b": 3}));
        assert_eq!(
            diff,
            vec![DiffEntry {
                path: "b".into(),
                local: Some(json!(2)),
                remote: Some(json!(3)),
            }]
        );
    }

    #[test]
    fn nested_objects_and_arrays_recurse() {
        let local = json!({"nodes": {"n1": {"x": 1}}, "layers": [1, 2]});
        let remote = json!({"nodes": {"n1": {"x": 2}, "n2": {}}, "layers": [1]});
        let paths: Vec<String> = deep_differences(&local, &remote)
            .into_iter()
            .map(|d| d.path)
            .collect();
        assert_eq!(paths, vec!["layers.1", "nodes.n1.x", "nodes.n2"]);
    }

    #[test]
    fn shape_mismatch_is_a_leaf_difference() {
        let diff = deep_differences(&json!({"a": [1]}), &json!({"a": {"0": 1}}));
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].path, "a");
    }

    #[test]
    fn excluded_fields_never_count() {
        let local = json!({"id": "b1", "updated_at": "2024-01-01", "name": "x"});
        let remote = json!({"id": "b1", "updated_at": "2024-06-01", "name": "x"});
        assert_eq!(
            reconcile(&local, remote, DEFAULT_EXCLUSIONS, VersionPin::Latest),
            Reconciliation::InSync
        );
    }

    #[test]
    fn overwrite_keeps_local_excluded_fields() {
        let local = json!({"a": 1, "b": 2, "meta": {"seen": 5}});
        let remote = json!({"a": 1, "b": 3, "meta": {"seen": 9}});
        let Reconciliation::Overwrite { differences, value } =
            reconcile(&local, remote, &["meta.seen"], VersionPin::Latest)
        else {
            panic!("expected overwrite");
        };
        assert_eq!(differences.len(), 1);
        assert_eq!(value, json!({"a": 1, "b": 3, "meta": {"seen": 5}}));
    }

    #[test]
    fn excluded_field_absent_locally_is_removed_from_remote() {
        let mut remote = json!({"a": 1, "updated_at": "x"});
        apply_exclusions(&mut remote, &json!({"a": 1}), DEFAULT_EXCLUSIONS);
        assert_eq!(remote, json!({"a": 1}));
    }

    #[test]
    fn pinned_reads_are_skipped() {
        let pin = VersionPin::from(Some(SemVer::new(1, 0, 0)));
        assert_eq!(
            reconcile(&json!({"a": 1}), json!({"a": 2}), &[], pin),
            Reconciliation::Skipped
        );
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = Value::String("é".repeat(80));
        let rendered = preview(Some(&long));
        assert!(rendered.ends_with("..."));
        assert_eq!(preview(None), "<absent>");
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,4}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-c]", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn differences_are_empty_iff_equal(a in arb_json(), b in arb_json()) {
            prop_assert_eq!(deep_differences(&a, &b).is_empty(), a == b);
        }

        #[test]
        fn overwrite_value_is_in_sync_afterwards(a in arb_json(), b in arb_json()) {
            if let Reconciliation::Overwrite { value, .. } =
                reconcile(&a, b, &[], VersionPin::Latest)
            {
                prop_assert!(deep_differences(&value, &value).is_empty());
                prop_assert_eq!(
                    reconcile(&value, value.clone(), &[], VersionPin::Latest),
                    Reconciliation::InSync
                );
            }
        }
    }
}
