//! Environment prober
//!
//! Runs the detection script with the virtualenv's interpreter and turns its
//! JSON report into a [`PythonSetup`]. Never retries and has no timeout: a
//! script that never answers leaves the caller waiting.

pub mod package;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::settings::ResolvedSettings;
pub use package::{parse_probe_output, PythonPackage, PythonSetup};

const DETECTION_SCRIPT: &str = include_str!("../../scripts/detect_environment.py");
const DETECTION_SCRIPT_NAME: &str = "detect_environment.py";

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Expected a valid virtualenv path to be set")]
    VirtualenvNotSet,

    #[error("Unable to find a python binary in the provided virtualenv")]
    PythonNotFound,

    #[error("Failed to prepare detection script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run {python}: {source}")]
    Spawn {
        python: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Detection script produced no output{}", stderr_suffix(.0))]
    EmptyOutput(String),

    #[error("Invalid detection output: {0}")]
    Parse(#[from] serde_json::Error),

    /// Error document written by the script itself
    #[error("{0}")]
    Reported(String),

    #[error("Python language server main package not found, is \"python-lsp-server\" installed?")]
    MainPackageNotFound,
}

fn stderr_suffix(stderr: &str) -> String {
    match stderr.trim() {
        "" => String::new(),
        s => format!(": {}", s.lines().last().unwrap_or(s)),
    }
}

/// Where the detection script comes from
#[derive(Debug, Clone)]
enum ScriptSource {
    /// User-provided script path
    External(PathBuf),
    /// Embedded copy, written into this directory on first use
    Embedded(PathBuf),
}

#[derive(Debug, Clone)]
pub struct EnvironmentProber {
    script: ScriptSource,
}

impl EnvironmentProber {
    pub fn new(script_override: Option<PathBuf>, cache_dir: PathBuf) -> Self {
        let script = match script_override {
            Some(path) => ScriptSource::External(path),
            None => ScriptSource::Embedded(cache_dir),
        };
        Self { script }
    }

    /// Probe the interpreter configured by `settings`
    pub async fn probe_settings(&self, settings: &ResolvedSettings) -> Result<PythonSetup, ProbeError> {
        let virtualenv = settings.virtualenv_path().ok_or(ProbeError::VirtualenvNotSet)?;
        let python = settings.python_bin_path().ok_or(ProbeError::PythonNotFound)?;
        self.probe(&python, Some(virtualenv)).await
    }

    /// `<python> <script> [virtualenv]`, stdout parsed as one JSON document
    pub async fn probe(&self, python: &Path, virtualenv: Option<&Path>) -> Result<PythonSetup, ProbeError> {
        let script = self.script_path().await?;

        let mut command = Command::new(python);
        command
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(virtualenv) = virtualenv {
            command.arg(virtualenv);
        }

        tracing::debug!("Probing {} with {}", python.display(), script.display());
        let output = command.output().await.map_err(|source| ProbeError::Spawn {
            python: python.to_path_buf(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(ProbeError::EmptyOutput(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        if !output.status.success() {
            tracing::debug!("Detection script exited with {}", output.status);
        }

        let setup = parse_probe_output(&stdout)?;
        tracing::info!(
            python = %setup.python_version,
            plugins = setup.plugin_packages.len(),
            "Environment probed"
        );
        Ok(setup)
    }

    async fn script_path(&self) -> Result<PathBuf, ProbeError> {
        match &self.script {
            ScriptSource::External(path) => Ok(path.clone()),
            ScriptSource::Embedded(dir) => {
                let path = dir.join(DETECTION_SCRIPT_NAME);
                let current = tokio::fs::read_to_string(&path).await.ok();
                if current.as_deref() != Some(DETECTION_SCRIPT) {
                    let write = async {
                        tokio::fs::create_dir_all(dir).await?;
                        tokio::fs::write(&path, DETECTION_SCRIPT).await
                    };
                    write.await.map_err(|source| ProbeError::Script {
                        path: path.clone(),
                        source,
                    })?;
                }
                Ok(path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::settings::registry::VIRTUALENV_PATH;
    use crate::settings::tests::settings_with;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unset_virtualenv() {
        let dir = TempDir::new().unwrap();
        let prober = EnvironmentProber::new(None, dir.path().to_path_buf());
        let settings = settings_with(MemoryStore::new(), MemoryStore::new());

        let err = prober.probe_settings(&settings.snapshot()).await.unwrap_err();
        assert_eq!(err.to_string(), "Expected a valid virtualenv path to be set");
    }

    #[tokio::test]
    async fn test_missing_python() {
        let dir = TempDir::new().unwrap();
        let prober = EnvironmentProber::new(None, dir.path().to_path_buf());
        let settings = settings_with(
            MemoryStore::new().with(VIRTUALENV_PATH, json!(dir.path().display().to_string())),
            MemoryStore::new(),
        );

        let err = prober.probe_settings(&settings.snapshot()).await.unwrap_err();
        assert!(matches!(err, ProbeError::PythonNotFound));
    }

    #[tokio::test]
    async fn test_embedded_script_is_materialized() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        let prober = EnvironmentProber::new(None, cache.clone());

        let path = prober.script_path().await.unwrap();
        assert_eq!(path, cache.join(DETECTION_SCRIPT_NAME));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DETECTION_SCRIPT);

        // Stale copies are replaced
        std::fs::write(&path, "old").unwrap();
        prober.script_path().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DETECTION_SCRIPT);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_runs_interpreter_with_arguments() {
        use crate::settings::tests::fake_virtualenv;

        // Fake interpreter: echoes its virtualenv argument back as the version
        let venv = fake_virtualenv(&[(
            "python",
            "#!/bin/sh\nprintf '{\"python\": \"%s\", \"packages\": [{\"name\": \"python-lsp-server\", \"type\": \"main\", \"version\": \"1.0\"}, {\"name\": \"rope\", \"type\": \"plugin\"}]}' \"$2\"\n",
        )]);
        let cache = TempDir::new().unwrap();
        let prober = EnvironmentProber::new(None, cache.path().to_path_buf());
        let settings = settings_with(
            MemoryStore::new().with(VIRTUALENV_PATH, json!(venv.path().display().to_string())),
            MemoryStore::new(),
        );

        let setup = prober.probe_settings(&settings.snapshot()).await.unwrap();
        assert_eq!(setup.python_version, venv.path().display().to_string());
        assert_eq!(setup.server_package.name, "python-lsp-server");
        assert_eq!(setup.plugin_packages.len(), 1);
        assert!(!setup.plugin_packages[0].is_installed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_reports_error_document_and_empty_output() {
        use crate::settings::tests::fake_virtualenv;

        let venv = fake_virtualenv(&[
            ("python", "#!/bin/sh\necho '{\"error\": \"boom\"}'\nexit 1\n"),
            ("silent", "#!/bin/sh\necho 'ModuleNotFoundError: json' >&2\n"),
        ]);
        let cache = TempDir::new().unwrap();
        let prober = EnvironmentProber::new(None, cache.path().to_path_buf());

        let err = prober.probe(&venv.path().join("bin/python"), None).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let err = prober.probe(&venv.path().join("bin/silent"), None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Detection script produced no output: ModuleNotFoundError: json"
        );
    }
}
