//! Layered settings storage
//!
//! Two flat key/value stores back the user-facing settings: one per
//! workspace (`<workspace>/.pylsp-bridge/settings.toml`) and one global
//! (`~/.config/pylsp-bridge/settings.toml`). Nested TOML tables are
//! flattened into dotted keys on load, so `[pylsp] virtualenvPath = ".."`
//! and `"pylsp.virtualenvPath" = ".."` are the same setting.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Raw stored value, before any type coercion
pub type ConfigValue = serde_json::Value;

/// Which layer of the configuration a value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigScope {
    Workspace,
    Global,
}

impl fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigScope::Workspace => write!(f, "workspace"),
            ConfigScope::Global => write!(f, "global"),
        }
    }
}

/// A single layer of key/value configuration
pub trait ConfigStore: Send + Sync {
    /// Look up a key. Missing keys and explicit nulls both read as `None`.
    fn get(&self, key: &str) -> Option<ConfigValue>;

    /// Store a value and persist it
    fn set(&mut self, key: &str, value: ConfigValue) -> Result<(), ConfigError>;

    /// Re-read the backing storage and return the keys whose values changed
    fn reload(&mut self) -> Result<Vec<String>, ConfigError>;

    /// Backing file, if any
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// TOML file backed store
pub struct TomlConfigStore {
    path: PathBuf,
    values: BTreeMap<String, ConfigValue>,
}

impl TomlConfigStore {
    /// Open a store. A missing or unreadable file yields an empty store.
    pub fn open(path: PathBuf) -> Self {
        let values = match Self::read_values(&path) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Failed to load settings from {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self { path, values }
    }

    fn read_values(path: &Path) -> Result<BTreeMap<String, ConfigValue>, ConfigError> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        let table: toml::Table = toml::from_str(&content)?;
        let mut values = BTreeMap::new();
        flatten_table(None, &table, &mut values);
        Ok(values)
    }

    fn write(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut table = toml::Table::new();
        for (key, value) in &self.values {
            // TOML has no null
            if value.is_null() {
                continue;
            }
            let value = toml::Value::try_from(value)?;
            table.insert(key.clone(), value);
        }

        let content = toml::to_string_pretty(&table)?;

        // Write to a sibling temp file, then rename over the target so the
        // watcher never sees a half-written file
        let temp_path = self.path.with_extension("toml.tmp");
        {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl ConfigStore for TomlConfigStore {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.get(key).filter(|v| !v.is_null()).cloned()
    }

    fn set(&mut self, key: &str, value: ConfigValue) -> Result<(), ConfigError> {
        self.values.insert(key.to_string(), value);
        self.write()
    }

    fn reload(&mut self) -> Result<Vec<String>, ConfigError> {
        let fresh = Self::read_values(&self.path)?;
        let changed = changed_keys(&self.values, &fresh);
        self.values = fresh;
        Ok(changed)
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// In-memory store for tests
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, ConfigValue>,
    staged: Option<BTreeMap<String, ConfigValue>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: ConfigValue) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    /// Replace the contents seen by the next `reload`, as an external edit would
    pub fn stage(&mut self, values: BTreeMap<String, ConfigValue>) {
        self.staged = Some(values);
    }
}

#[cfg(test)]
impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.get(key).filter(|v| !v.is_null()).cloned()
    }

    fn set(&mut self, key: &str, value: ConfigValue) -> Result<(), ConfigError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn reload(&mut self) -> Result<Vec<String>, ConfigError> {
        match self.staged.take() {
            Some(fresh) => {
                let changed = changed_keys(&self.values, &fresh);
                self.values = fresh;
                Ok(changed)
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Workspace layer over global layer
pub struct LayeredConfig {
    workspace: Box<dyn ConfigStore>,
    global: Box<dyn ConfigStore>,
}

impl LayeredConfig {
    pub fn new(workspace: Box<dyn ConfigStore>, global: Box<dyn ConfigStore>) -> Self {
        Self { workspace, global }
    }

    pub fn store(&self, scope: ConfigScope) -> &dyn ConfigStore {
        match scope {
            ConfigScope::Workspace => self.workspace.as_ref(),
            ConfigScope::Global => self.global.as_ref(),
        }
    }

    pub fn store_mut(&mut self, scope: ConfigScope) -> &mut dyn ConfigStore {
        match scope {
            ConfigScope::Workspace => self.workspace.as_mut(),
            ConfigScope::Global => self.global.as_mut(),
        }
    }

    /// Find the scope whose backing file is `path`
    pub fn scope_for_path(&self, path: &Path) -> Option<ConfigScope> {
        [ConfigScope::Workspace, ConfigScope::Global]
            .into_iter()
            .find(|scope| self.store(*scope).path() == Some(path))
    }

    /// Reload one layer. Read failures keep the previous values.
    pub fn reload(&mut self, scope: ConfigScope) -> Vec<String> {
        match self.store_mut(scope).reload() {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!("Failed to reload {} settings: {}", scope, e);
                Vec::new()
            }
        }
    }
}

fn flatten_table(prefix: Option<&str>, table: &toml::Table, out: &mut BTreeMap<String, ConfigValue>) {
    for (key, value) in table {
        let full_key = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            toml::Value::Table(inner) => flatten_table(Some(&full_key), inner, out),
            other => match serde_json::to_value(other) {
                Ok(json) => {
                    out.insert(full_key, json);
                }
                Err(e) => tracing::warn!("Skipping setting {}: {}", full_key, e),
            },
        }
    }
}

fn changed_keys(
    old: &BTreeMap<String, ConfigValue>,
    new: &BTreeMap<String, ConfigValue>,
) -> Vec<String> {
    let mut changed: Vec<String> = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    changed.extend(old.keys().filter(|key| !new.contains_key(*key)).cloned());
    changed.sort();
    changed
}
