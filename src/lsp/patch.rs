//! Setting key -> `workspace/didChangeConfiguration` payload
//!
//! A changed setting becomes one or more dotted protocol paths. Each path is
//! turned into a nested tree with the value at the leaf, and the trees are
//! deep-merged into a single patch under the server's settings namespace.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Value};

use crate::settings::registry::{self, ChangeEffect, SETTINGS};
use crate::settings::value::ValueType;
use crate::settings::ResolvedSettings;

/// Top-level key of the server's configuration section
pub const PROTOCOL_NAMESPACE: &str = "pylsp";

/// Settings whose protocol location differs from their own key, in
/// declaration order. Later paths win if two ever write the same leaf.
static PROTOCOL_OVERRIDES: &[(&str, &[&str])] = &[(
    "plugins.rope.enabled",
    &["plugins.rope_autoimport.enabled", "plugins.rope_completion.enabled"],
)];

/// Ordered path segments into the configuration tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn parse(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Configuration tree: a value or a mapping of further trees
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigTree {
    Leaf(Value),
    Map(BTreeMap<String, ConfigTree>),
}

impl ConfigTree {
    pub fn empty() -> Self {
        ConfigTree::Map(BTreeMap::new())
    }

    /// Build `{a: {b: {c: value}}}` for the path `a.b.c`
    pub fn at_path(path: &KeyPath, value: Value) -> Self {
        path.segments()
            .iter()
            .rev()
            .fold(ConfigTree::Leaf(value), |child, segment| {
                let mut map = BTreeMap::new();
                map.insert(segment.clone(), child);
                ConfigTree::Map(map)
            })
    }

    /// Recursive merge. Mappings merge key by key; anything else is replaced
    /// by `other`.
    pub fn merge(self, other: ConfigTree) -> ConfigTree {
        match (self, other) {
            (ConfigTree::Map(mut base), ConfigTree::Map(incoming)) => {
                for (key, value) in incoming {
                    let merged = match base.remove(&key) {
                        Some(existing) => existing.merge(value),
                        None => value,
                    };
                    base.insert(key, merged);
                }
                ConfigTree::Map(base)
            }
            (_, other) => other,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ConfigTree::Leaf(value) => value.clone(),
            ConfigTree::Map(map) => Value::Object(
                map.iter()
                    .map(|(key, tree)| (key.clone(), tree.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Protocol paths for a namespace-relative setting key
pub fn protocol_paths(relative_key: &str) -> Vec<KeyPath> {
    match PROTOCOL_OVERRIDES.iter().find(|(key, _)| *key == relative_key) {
        Some((_, paths)) => paths.iter().map(|p| KeyPath::parse(p)).collect(),
        None => vec![KeyPath::parse(relative_key)],
    }
}

/// A transient configuration patch, merged and then sent once
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigPatch {
    tree: ConfigTree,
}

impl ConfigPatch {
    pub fn empty() -> Self {
        Self {
            tree: ConfigTree::empty(),
        }
    }

    /// Patch for one changed setting. The root namespace prefix is optional.
    pub fn for_key(key: &str, value: Value) -> Self {
        let relative = registry::strip_namespace(key);
        let tree = protocol_paths(relative)
            .iter()
            .map(|path| ConfigTree::at_path(path, value.clone()))
            .fold(ConfigTree::empty(), ConfigTree::merge);
        Self { tree }
    }

    /// Patch carrying every pushed setting, as sent right after start
    pub fn full_snapshot(settings: &ResolvedSettings) -> Self {
        SETTINGS
            .iter()
            .filter(|spec| spec.effect == ChangeEffect::PushConfig)
            .map(|spec| {
                let value = match settings.get(spec.key) {
                    Some(value) => value.to_json(),
                    None if spec.value_type == ValueType::Boolean => Value::Bool(false),
                    None => Value::Null,
                };
                ConfigPatch::for_key(spec.key, value)
            })
            .fold(ConfigPatch::empty(), ConfigPatch::merge)
    }

    pub fn merge(self, other: ConfigPatch) -> Self {
        Self {
            tree: self.tree.merge(other.tree),
        }
    }

    #[cfg(test)]
    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    /// `DidChangeConfigurationParams` body
    pub fn to_params(&self) -> Value {
        json!({
            "settings": {
                PROTOCOL_NAMESPACE: self.tree.to_json()
            }
        })
    }
}
