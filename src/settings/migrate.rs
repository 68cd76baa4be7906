//! One-shot migration of legacy `pyls.*` keys
//!
//! Runs once at activation. For each legacy key, and independently for each
//! layer, the transformed legacy value is copied to the new key only when the
//! new key is unset in that layer. Legacy keys are left in place and never
//! read again.

use std::path::{Path, PathBuf};

use super::registry::{self, VIRTUALENV_PATH};
use super::value::{coerce, normalize_path};
use crate::config::{ConfigScope, ConfigValue, LayeredConfig};

/// Minimum components (`/`, at least one dir, `bin`, exe) for a binary path
/// inside an interpreter root
const MIN_BIN_PATH_COMPONENTS: usize = 4;

type Transform = fn(&ConfigValue) -> Option<ConfigValue>;

pub struct Migration {
    pub legacy_key: &'static str,
    pub target_key: &'static str,
    transform: Transform,
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        legacy_key: "pyls.executable",
        target_key: VIRTUALENV_PATH,
        transform: executable_to_virtualenv,
    },
    Migration::identity("pyls.plugins.mccabe.enabled", "pylsp.plugins.mccabe.enabled"),
    Migration::identity("pyls.plugins.pycodestyle.enabled", "pylsp.plugins.pycodestyle.enabled"),
    Migration::identity("pyls.plugins.pydocstyle.enabled", "pylsp.plugins.pydocstyle.enabled"),
    Migration::identity("pyls.plugins.pyflakes.enabled", "pylsp.plugins.pyflakes.enabled"),
    Migration::identity("pyls.plugins.pylint.enabled", "pylsp.plugins.pylint.enabled"),
    Migration::identity("pyls.plugins.yapf.enabled", "pylsp.plugins.yapf.enabled"),
];

impl Migration {
    const fn identity(legacy_key: &'static str, target_key: &'static str) -> Self {
        Self {
            legacy_key,
            target_key,
            transform: identity,
        }
    }

    /// Migrate one layer. Returns true if a value was written.
    fn apply(&self, config: &mut LayeredConfig, scope: ConfigScope) -> bool {
        let store = config.store(scope);
        if store.get(self.target_key).is_some() {
            return false;
        }
        let legacy = match store.get(self.legacy_key) {
            Some(value) => value,
            None => return false,
        };
        let migrated = match (self.transform)(&legacy) {
            Some(value) => value,
            None => {
                tracing::debug!("Legacy {} value for {} not migratable", scope, self.legacy_key);
                return false;
            }
        };

        // Only ever copy values the target setting would accept
        let valid = registry::lookup(self.target_key)
            .map(|spec| coerce(&migrated, spec.value_type).is_some())
            .unwrap_or(false);
        if !valid {
            return false;
        }

        match config.store_mut(scope).set(self.target_key, migrated) {
            Ok(()) => {
                tracing::info!(
                    "Migrated {} setting {} -> {}",
                    scope,
                    self.legacy_key,
                    self.target_key
                );
                true
            }
            Err(e) => {
                tracing::warn!("Failed to migrate {}: {}", self.legacy_key, e);
                false
            }
        }
    }
}

/// Run every migration against both layers. Returns the number of values written.
pub fn migrate_legacy_settings(config: &mut LayeredConfig) -> usize {
    let mut written = 0;
    for migration in MIGRATIONS {
        for scope in [ConfigScope::Workspace, ConfigScope::Global] {
            if migration.apply(config, scope) {
                written += 1;
            }
        }
    }
    written
}

fn identity(value: &ConfigValue) -> Option<ConfigValue> {
    Some(value.clone())
}

fn executable_to_virtualenv(value: &ConfigValue) -> Option<ConfigValue> {
    let bin_path = value.as_str()?;
    let root = interpreter_root(Path::new(bin_path))?;
    Some(ConfigValue::String(root.display().to_string()))
}

/// Interpreter root of a binary living at `<root>/bin/<exe>`.
///
/// `None` when the normalized path is too shallow to contain that suffix.
pub fn interpreter_root(bin_path: &Path) -> Option<PathBuf> {
    let normalized = normalize_path(bin_path);
    let components: Vec<_> = normalized.components().collect();
    if components.len() < MIN_BIN_PATH_COMPONENTS {
        return None;
    }
    Some(components[..components.len() - 2].iter().collect())
}
