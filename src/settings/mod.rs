//! Settings resolver
//!
//! Resolves logical settings against the workspace layer first and the
//! global layer second, coerces them to their declared type, and turns raw
//! change notifications into debounced [`SettingChange`]s for the app to act
//! on.
//!
//! # Components
//!
//! - [`registry`] - the static table of logical settings
//! - [`value`] - typed values, coercion, path helpers
//! - [`migrate`] - one-shot legacy key migration
//! - [`debounce`] - duplicate notification suppression

pub mod debounce;
pub mod migrate;
pub mod registry;
pub mod value;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ConfigScope, ConfigValue, LayeredConfig};
use debounce::Debouncer;
use registry::{ChangeEffect, SettingSpec, ALERTED_DEPRECATED_SERVER, SETTINGS, VIRTUALENV_PATH};
use value::{coerce, human_readable_path, is_executable, tri_state_bool, SettingValue, ValueType};

const PYTHON_BIN: &str = "python";
const SERVER_BIN: &str = "pylsp";
const DEPRECATED_SERVER_BIN: &str = "pyls";

/// The settings resolver. Built at activation, dropped at deactivation.
pub struct Settings {
    config: LayeredConfig,
    debouncer: Debouncer,
}

/// An accepted change to a registered setting
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub spec: &'static SettingSpec,
    pub value: Option<SettingValue>,
}

impl SettingChange {
    pub fn effect(&self) -> ChangeEffect {
        self.spec.effect
    }
}

impl Settings {
    /// Migrate legacy keys, then start resolving against `config`
    pub fn activate(mut config: LayeredConfig, debounce: Duration) -> Self {
        let migrated = migrate::migrate_legacy_settings(&mut config);
        if migrated > 0 {
            tracing::info!("Migrated {} legacy setting value(s)", migrated);
        }
        Self {
            config,
            debouncer: Debouncer::new(debounce),
        }
    }

    /// Resolve a registered setting. Unknown keys and all failures read as `None`.
    pub fn get(&self, key: &str) -> Option<SettingValue> {
        match registry::lookup(key) {
            Some(spec) => self.resolve(spec.key, spec.value_type),
            None => {
                tracing::debug!("Lookup of unregistered setting {}", key);
                None
            }
        }
    }

    fn resolve(&self, key: &str, ty: ValueType) -> Option<SettingValue> {
        let workspace = self.config.store(ConfigScope::Workspace).get(key);
        let from_workspace = workspace.and_then(|raw| Self::workspace_value(&raw, ty));

        from_workspace.or_else(|| {
            self.config
                .store(ConfigScope::Global)
                .get(key)
                .and_then(|raw| coerce(&raw, ty))
        })
    }

    fn workspace_value(raw: &ConfigValue, ty: ValueType) -> Option<SettingValue> {
        match (ty, raw) {
            (ValueType::Boolean, ConfigValue::String(_)) => {
                tri_state_bool(raw).map(SettingValue::Boolean)
            }
            _ => coerce(raw, ty),
        }
    }

    /// Fresh snapshot of every registered setting
    pub fn snapshot(&self) -> ResolvedSettings {
        let values = SETTINGS
            .iter()
            .map(|spec| (spec.key, self.resolve(spec.key, spec.value_type)))
            .collect();
        ResolvedSettings { values }
    }

    /// Handle a change notification from either layer.
    ///
    /// Returns `None` for unregistered keys and for duplicates inside the
    /// debounce window.
    pub fn on_did_change(&mut self, key: &str) -> Option<SettingChange> {
        let spec = registry::lookup(key)?;

        if !self.debouncer.accept(spec.key) {
            tracing::debug!(key = %spec.key, "Suppressed duplicate change notification");
            return None;
        }

        let value = self.resolve(spec.key, spec.value_type);
        tracing::debug!(key = %spec.key, ?value, "Setting changed");
        Some(SettingChange { spec, value })
    }

    /// Reload one layer from its backing storage. Returns the changed keys.
    pub fn reload(&mut self, scope: ConfigScope) -> Vec<String> {
        self.config.reload(scope)
    }

    pub fn scope_for_path(&self, path: &Path) -> Option<ConfigScope> {
        self.config.scope_for_path(path)
    }

    /// Virtualenv path for which the deprecated-server alert was dismissed
    pub fn acknowledged_deprecated_server(&self) -> Option<String> {
        self.config
            .store(ConfigScope::Global)
            .get(ALERTED_DEPRECATED_SERVER)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn acknowledge_deprecated_server(&mut self, virtualenv: &Path) {
        let value = ConfigValue::String(virtualenv.display().to_string());
        if let Err(e) = self
            .config
            .store_mut(ConfigScope::Global)
            .set(ALERTED_DEPRECATED_SERVER, value)
        {
            tracing::warn!("Failed to persist deprecated server acknowledgment: {}", e);
        }
    }
}

/// Immutable view of every registered setting at one point in time.
///
/// Derived paths are recomputed against the filesystem on every call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSettings {
    values: BTreeMap<&'static str, Option<SettingValue>>,
}

impl ResolvedSettings {
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key).and_then(Option::as_ref)
    }

    pub fn virtualenv_path(&self) -> Option<&Path> {
        self.get(VIRTUALENV_PATH).and_then(SettingValue::as_path)
    }

    /// Unset plugin flags read as disabled
    pub fn plugin_enabled(&self, plugin: &str) -> bool {
        self.get(&registry::plugin_enabled_key(plugin))
            .and_then(SettingValue::as_bool)
            .unwrap_or(false)
    }

    pub fn python_bin_path(&self) -> Option<PathBuf> {
        self.bin_in_virtualenv(PYTHON_BIN)
    }

    pub fn server_bin_path(&self) -> Option<PathBuf> {
        self.bin_in_virtualenv(SERVER_BIN)
    }

    pub fn deprecated_server_bin_path(&self) -> Option<PathBuf> {
        self.bin_in_virtualenv(DEPRECATED_SERVER_BIN)
    }

    pub fn human_readable_virtualenv_path(&self) -> String {
        human_readable_path(self.virtualenv_path())
    }

    pub fn human_readable_server_bin_path(&self) -> String {
        human_readable_path(self.server_bin_path().as_deref())
    }

    fn bin_in_virtualenv(&self, name: &str) -> Option<PathBuf> {
        let path = self.virtualenv_path()?.join("bin").join(name);
        is_executable(&path).then_some(path)
    }
}
