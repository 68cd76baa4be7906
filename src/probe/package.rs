//! Probe output document

use std::cmp::Ordering;

use serde::Deserialize;

use super::ProbeError;
use crate::settings::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Main,
    /// Anything that is not the server itself
    #[serde(other)]
    Plugin,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PythonPackage {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PackageKind,
    #[serde(default)]
    pub version: Option<String>,
}

impl PythonPackage {
    pub fn is_installed(&self) -> bool {
        self.version.is_some()
    }
}

/// What the detection script found in the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonSetup {
    pub python_version: String,
    pub server_package: PythonPackage,
    /// Supported plugins only, sorted by name
    pub plugin_packages: Vec<PythonPackage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProbeDocument {
    Error {
        error: String,
    },
    Setup {
        python: String,
        #[serde(default)]
        packages: Vec<PythonPackage>,
    },
}

/// Parse the detection script's stdout
pub fn parse_probe_output(stdout: &str) -> Result<PythonSetup, ProbeError> {
    let (python_version, packages) = match serde_json::from_str(stdout.trim())? {
        ProbeDocument::Error { error } => return Err(ProbeError::Reported(error)),
        ProbeDocument::Setup { python, packages } => (python, packages),
    };

    let mut server_package = None;
    let mut plugin_packages = Vec::new();
    for package in packages {
        match package.kind {
            PackageKind::Main => server_package = Some(package),
            PackageKind::Plugin if registry::is_known_plugin(&package.name) => {
                plugin_packages.push(package)
            }
            PackageKind::Plugin => {
                tracing::warn!(plugin = %package.name, "Ignoring unsupported plugin package");
            }
        }
    }

    let server_package = server_package.ok_or(ProbeError::MainPackageNotFound)?;
    plugin_packages.sort_by(|a, b| collate(&a.name, &b.name));

    Ok(PythonSetup {
        python_version,
        server_package,
        plugin_packages,
    })
}

/// Case-insensitive first, byte order to break ties
fn collate(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
