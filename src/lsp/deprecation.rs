//! Alert for virtualenvs that still ship the old `pyls` server

use std::path::PathBuf;

use tokio::sync::oneshot;

use crate::settings::ResolvedSettings;

pub const HELP_URL: &str =
    "https://github.com/python-lsp/python-lsp-server#installation";

/// A notification with a fixed set of actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: &'static str,
    pub title: String,
    pub body: String,
    pub actions: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Ok,
    MoreInfo,
    Ignore,
}

impl AlertAction {
    const ALL: [AlertAction; 3] = [AlertAction::Ok, AlertAction::MoreInfo, AlertAction::Ignore];

    fn label(self) -> &'static str {
        match self {
            AlertAction::Ok => "OK",
            AlertAction::MoreInfo => "More info",
            AlertAction::Ignore => "Ignore",
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification dismissed without a reply")]
    Dismissed,
    #[error("Notification failed: {0}")]
    Failed(String),
}

/// Reply to an alert: the index of the chosen action
pub type AlertReply = oneshot::Receiver<Result<usize, NotifyError>>;

/// Where user-facing alerts are shown
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: Alert) -> AlertReply;
}

/// Writes alerts to the log. Never gets a reply.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: Alert) -> AlertReply {
        tracing::warn!(id = alert.id, "{}: {}", alert.title, alert.body);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(NotifyError::Dismissed));
        rx
    }
}

/// A virtualenv that only contains the deprecated server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprecatedServer {
    pub virtualenv: PathBuf,
    pub binary: PathBuf,
}

impl DeprecatedServer {
    /// Detect the situation, honoring a previous "Ignore" for the same virtualenv
    pub fn detect(settings: &ResolvedSettings, acknowledged: Option<&str>) -> Option<Self> {
        if settings.server_bin_path().is_some() {
            return None;
        }
        let virtualenv = settings.virtualenv_path()?.to_path_buf();
        if acknowledged == Some(virtualenv.display().to_string().as_str()) {
            return None;
        }
        let binary = settings.deprecated_server_bin_path()?;
        Some(Self { virtualenv, binary })
    }

    pub fn alert(&self) -> Alert {
        Alert {
            id: "pylsp-bridge-deprecated-server",
            title: "Deprecated Language Server".to_string(),
            body: format!(
                "\"python-language-server\" ({}) is no longer supported. You should install \"python-lsp-server\" instead.",
                self.binary.display()
            ),
            actions: AlertAction::ALL.iter().map(|a| a.label()).collect(),
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

    #[test]
    fn test_alert_actions_order() {
        let server = DeprecatedServer {
            virtualenv: PathBuf::from("/venv"),
            binary: PathBuf::from("/venv/bin/pyls"),
        };
        let alert = server.alert();
        assert_eq!(alert.title, "Deprecated Language Server");
        assert_eq!(alert.actions, vec!["OK", "More info", "Ignore"]);
        assert_eq!(AlertAction::from_index(1), Some(AlertAction::MoreInfo));
        assert_eq!(AlertAction::from_index(3), None);
    }

    #[test]
    fn test_no_virtualenv_no_alert() {
        let settings = settings_with(MemoryStore::new(), MemoryStore::new());
        assert_eq!(DeprecatedServer::detect(&settings.snapshot(), None), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_detects_pyls_only_virtualenv() {
        use crate::settings::tests::fake_virtualenv;

        let venv = fake_virtualenv(&[("pyls", "#!/bin/sh\n")]);
        let venv_str = venv.path().display().to_string();
        let settings = settings_with(
            MemoryStore::new().with(VIRTUALENV_PATH, json!(venv_str.clone())),
            MemoryStore::new(),
        );
        let snapshot = settings.snapshot();

        let detected = DeprecatedServer::detect(&snapshot, None).unwrap();
        assert_eq!(detected.binary, venv.path().join("bin/pyls"));

        // Acknowledged for this exact virtualenv
        assert_eq!(DeprecatedServer::detect(&snapshot, Some(&venv_str)), None);
        // A different virtualenv was acknowledged
        assert!(DeprecatedServer::detect(&snapshot, Some("/other/venv")).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_no_alert_when_new_server_present() {
        use crate::settings::tests::fake_virtualenv;

        let venv = fake_virtualenv(&[("pyls", "#!/bin/sh\n"), ("pylsp", "#!/bin/sh\n")]);
        let settings = settings_with(
            MemoryStore::new().with(VIRTUALENV_PATH, json!(venv.path().display().to_string())),
            MemoryStore::new(),
        );
        assert_eq!(DeprecatedServer::detect(&settings.snapshot(), None), None);
    }

    #[tokio::test]
    async fn test_log_notifier_replies_dismissed() {
        let reply = LogNotifier.notify(Alert {
            id: "x",
            title: "t".into(),
            body: "b".into(),
            actions: vec!["OK"],
        });
        assert!(matches!(reply.await, Ok(Err(NotifyError::Dismissed))));
    }
}
