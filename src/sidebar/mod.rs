//! Sidebar presenter
//!
//! Maps the probe state and current settings to a tree of display nodes.
//! Children are computed when a node is expanded, never up front.

pub mod render;

use crate::probe::{PythonPackage, PythonSetup};
use crate::settings::ResolvedSettings;

pub use render::render_tree;

/// What the sidebar is currently showing
#[derive(Debug, Clone, PartialEq)]
pub enum SidebarState {
    Loading,
    Error(String),
    Content(PythonSetup),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Python,
    Tag,
    Path,
    Plugin,
    Enabled,
    Disabled,
    NotInstalled,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLeaf {
    pub label: &'static str,
    pub detail: String,
    pub icon: Icon,
}

impl StatusLeaf {
    fn new(label: &'static str, detail: impl Into<String>, icon: Icon) -> Self {
        Self {
            label,
            detail: detail.into(),
            icon,
        }
    }

    fn version(version: Option<&str>) -> Self {
        Self::new("Version", version.unwrap_or("?"), Icon::Tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidebarNode {
    Interpreter,
    ServerInfo,
    PackageGroup,
    Package(PythonPackage),
    StatusLeaf(StatusLeaf),
    ErrorLeaf(String),
}

/// Display properties of a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    pub label: String,
    pub detail: String,
    pub icon: Option<Icon>,
    pub expandable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SidebarView {
    state: SidebarState,
    settings: ResolvedSettings,
}

impl SidebarView {
    pub fn new(state: SidebarState, settings: ResolvedSettings) -> Self {
        Self { state, settings }
    }

    pub fn loading(settings: ResolvedSettings) -> Self {
        Self::new(SidebarState::Loading, settings)
    }

    pub fn state(&self) -> &SidebarState {
        &self.state
    }

    pub fn roots(&self) -> Vec<SidebarNode> {
        match &self.state {
            SidebarState::Loading => Vec::new(),
            SidebarState::Error(message) => vec![
                SidebarNode::ErrorLeaf(message.clone()),
                SidebarNode::Interpreter,
                SidebarNode::ServerInfo,
            ],
            SidebarState::Content(_) => vec![SidebarNode::Interpreter, SidebarNode::ServerInfo],
        }
    }

    pub fn children(&self, node: &SidebarNode) -> Vec<SidebarNode> {
        let setup = match &self.state {
            SidebarState::Content(setup) => Some(setup),
            _ => None,
        };

        match node {
            SidebarNode::Interpreter => vec![
                SidebarNode::StatusLeaf(StatusLeaf::version(
                    setup.map(|s| s.python_version.as_str()),
                )),
                SidebarNode::StatusLeaf(StatusLeaf::new(
                    "Virtualenv Path",
                    self.settings.human_readable_virtualenv_path(),
                    Icon::Path,
                )),
            ],
            SidebarNode::ServerInfo => {
                let mut nodes = vec![
                    SidebarNode::StatusLeaf(StatusLeaf::version(
                        setup.and_then(|s| s.server_package.version.as_deref()),
                    )),
                    SidebarNode::StatusLeaf(StatusLeaf::new(
                        "Binary Path",
                        self.settings.human_readable_server_bin_path(),
                        Icon::Path,
                    )),
                ];
                if setup.is_some() {
                    nodes.push(SidebarNode::PackageGroup);
                }
                nodes
            }
            SidebarNode::PackageGroup => setup
                .map(|s| {
                    s.plugin_packages
                        .iter()
                        .cloned()
                        .map(SidebarNode::Package)
                        .collect()
                })
                .unwrap_or_default(),
            SidebarNode::Package(package) => self.package_children(package),
            SidebarNode::StatusLeaf(_) | SidebarNode::ErrorLeaf(_) => Vec::new(),
        }
    }

    fn package_children(&self, package: &PythonPackage) -> Vec<SidebarNode> {
        if !package.is_installed() {
            return vec![SidebarNode::StatusLeaf(StatusLeaf::new(
                "Not Installed",
                "",
                Icon::NotInstalled,
            ))];
        }

        let status = if self.settings.plugin_enabled(&package.name) {
            StatusLeaf::new("Enabled", "", Icon::Enabled)
        } else {
            StatusLeaf::new("Disabled", "", Icon::Disabled)
        };
        vec![
            SidebarNode::StatusLeaf(status),
            SidebarNode::StatusLeaf(StatusLeaf::version(package.version.as_deref())),
        ]
    }

    pub fn item(&self, node: &SidebarNode) -> TreeItem {
        let (label, detail, icon, expandable) = match node {
            SidebarNode::Interpreter => ("Python".to_string(), String::new(), Some(Icon::Python), true),
            SidebarNode::ServerInfo => (
                "Python Language Server".to_string(),
                String::new(),
                Some(Icon::Python),
                true,
            ),
            SidebarNode::PackageGroup => ("Plugins".to_string(), String::new(), None, true),
            SidebarNode::Package(package) => (package.name.clone(), String::new(), Some(Icon::Plugin), true),
            SidebarNode::StatusLeaf(leaf) => (leaf.label.to_string(), leaf.detail.clone(), Some(leaf.icon), false),
            SidebarNode::ErrorLeaf(message) => (message.clone(), String::new(), Some(Icon::Warning), false),
        };
        TreeItem {
            label,
            detail,
            icon,
            expandable,
        }
    }
}
