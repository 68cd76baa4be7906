//! Static table of every logical setting the bridge understands

use super::value::ValueType;
use crate::lsp::patch::{self, KeyPath};

/// Namespace prefix of every logical setting key
pub const ROOT_NAMESPACE: &str = "pylsp";

/// Plugins the language server ships integrations for, and the only plugin
/// names the environment probe will report.
pub const KNOWN_PLUGINS: &[&str] = &[
    "autopep8",
    "flake8",
    "mccabe",
    "pycodestyle",
    "pydocstyle",
    "pyflakes",
    "pylint",
    "rope",
    "yapf",
];

pub const VIRTUALENV_PATH: &str = "pylsp.virtualenvPath";

/// Persisted virtualenv path for which the deprecated-server alert was dismissed
pub const ALERTED_DEPRECATED_SERVER: &str = "pylsp.alerted-deprecated-server";

/// What happens downstream when a setting changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEffect {
    /// Restart the language server. Supersedes a config push.
    RestartServer,
    /// Send a configuration patch to the running server
    PushConfig,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingSpec {
    pub key: &'static str,
    pub value_type: ValueType,
    pub effect: ChangeEffect,
    pub refreshes_sidebar: bool,
}

impl SettingSpec {
    const fn new(
        key: &'static str,
        value_type: ValueType,
        effect: ChangeEffect,
        refreshes_sidebar: bool,
    ) -> Self {
        Self {
            key,
            value_type,
            effect,
            refreshes_sidebar,
        }
    }

    const fn plugin(key: &'static str) -> Self {
        Self::new(key, ValueType::Boolean, ChangeEffect::PushConfig, true)
    }

    /// Key with the root namespace removed (`plugins.flake8.enabled`)
    pub fn relative_key(&self) -> &'static str {
        strip_namespace(self.key)
    }

    /// Protocol locations this setting is written to
    #[cfg(test)]
    pub fn protocol_paths(&self) -> Vec<KeyPath> {
        match self.effect {
            ChangeEffect::PushConfig => patch::protocol_paths(self.relative_key()),
            _ => Vec::new(),
        }
    }
}

pub static SETTINGS: &[SettingSpec] = &[
    SettingSpec::new(VIRTUALENV_PATH, ValueType::Path, ChangeEffect::RestartServer, false),
    SettingSpec::plugin("pylsp.plugins.autopep8.enabled"),
    SettingSpec::plugin("pylsp.plugins.flake8.enabled"),
    SettingSpec::plugin("pylsp.plugins.mccabe.enabled"),
    SettingSpec::plugin("pylsp.plugins.pycodestyle.enabled"),
    SettingSpec::plugin("pylsp.plugins.pydocstyle.enabled"),
    SettingSpec::plugin("pylsp.plugins.pyflakes.enabled"),
    SettingSpec::plugin("pylsp.plugins.pylint.enabled"),
    SettingSpec::plugin("pylsp.plugins.rope.enabled"),
    SettingSpec::plugin("pylsp.plugins.yapf.enabled"),
];

pub fn lookup(key: &str) -> Option<&'static SettingSpec> {
    SETTINGS.iter().find(|spec| spec.key == key)
}

/// Logical enable/disable key for a plugin
pub fn plugin_enabled_key(plugin: &str) -> String {
    format!("{}.plugins.{}.enabled", ROOT_NAMESPACE, plugin)
}

pub fn is_known_plugin(name: &str) -> bool {
    KNOWN_PLUGINS.contains(&name)
}

pub fn strip_namespace(key: &str) -> &str {
    key.strip_prefix(ROOT_NAMESPACE)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(key)
}
