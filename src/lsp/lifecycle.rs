//! Language server lifecycle
//!
//! Sole owner of the server handle. Every start gets a new generation; events
//! carrying an older generation belong to a replaced handle and are ignored.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::client::{LaunchRequest, LspError, ServerEvent, ServerHandle, ServerLauncher};
use super::patch::ConfigPatch;
use super::protocol::DID_CHANGE_CONFIGURATION;
use crate::settings::ResolvedSettings;

/// Callback run once the freshly started server has received its configuration
pub type OnStarted = Box<dyn FnOnce(u64) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Result of a start attempt
#[derive(Debug)]
pub enum StartOutcome {
    Started { generation: u64 },
    /// No server binary resolvable from the current settings
    MissingServer,
    Failed(LspError),
}

pub struct LanguageClientLifecycle {
    launcher: Arc<dyn ServerLauncher>,
    handle: Option<Box<dyn ServerHandle>>,
    state: ProcessState,
    generation: u64,
    initialized_grace: Duration,
    workspace_root: PathBuf,
    events: mpsc::UnboundedSender<ServerEvent>,
    on_started: Option<OnStarted>,
}

impl LanguageClientLifecycle {
    pub fn new(
        launcher: Arc<dyn ServerLauncher>,
        workspace_root: PathBuf,
        initialized_grace: Duration,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            launcher,
            handle: None,
            state: ProcessState::Stopped,
            generation: 0,
            initialized_grace,
            workspace_root,
            events,
            on_started: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Generation of the most recent start attempt
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the current server, then start a new one
    pub async fn restart(
        &mut self,
        settings: &ResolvedSettings,
        on_started: Option<OnStarted>,
    ) -> StartOutcome {
        self.stop().await;
        self.start(settings, on_started).await
    }

    async fn start(&mut self, settings: &ResolvedSettings, on_started: Option<OnStarted>) -> StartOutcome {
        self.generation += 1;
        let generation = self.generation;
        self.state = ProcessState::Starting;

        let Some(binary) = settings.server_bin_path() else {
            tracing::warn!(generation, "No language server binary found, not starting");
            self.state = ProcessState::Stopped;
            return StartOutcome::MissingServer;
        };

        let request = LaunchRequest {
            generation,
            binary,
            root: self.workspace_root.clone(),
            events: self.events.clone(),
        };

        match self.launcher.launch(request).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.on_started = on_started;
                self.schedule_ready(generation);
                tracing::info!(generation, "Language server starting");
                StartOutcome::Started { generation }
            }
            Err(e) => {
                tracing::error!(generation, "Failed to start language server: {}", e);
                self.state = ProcessState::Stopped;
                StartOutcome::Failed(e)
            }
        }
    }

    /// The server gives no usable "initialized" signal to this side, so the
    /// configuration push waits out a fixed grace period instead.
    fn schedule_ready(&self, generation: u64) {
        let events = self.events.clone();
        let grace = tokio::time::sleep(self.initialized_grace);
        tokio::spawn(async move {
            grace.await;
            let _ = events.send(ServerEvent::Ready { generation });
        });
    }

    /// Stop the current server. No-op when nothing is running.
    pub async fn stop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            self.state = ProcessState::Stopped;
            return;
        };

        self.state = ProcessState::Stopping;
        self.on_started = None;
        if let Err(e) = handle.stop().await {
            tracing::warn!(generation = handle.generation(), "Error stopping language server: {}", e);
        }
        self.state = ProcessState::Stopped;
        tracing::info!(generation = handle.generation(), "Language server stopped");
    }

    /// Grace period elapsed: push the full configuration and run the callback.
    pub async fn on_ready(&mut self, generation: u64, settings: &ResolvedSettings) {
        if !self.is_current(generation) || self.state != ProcessState::Starting {
            tracing::debug!(generation, "Ignoring ready signal for replaced server");
            return;
        }

        self.state = ProcessState::Running;
        self.send_patch(ConfigPatch::full_snapshot(settings)).await;

        if let Some(on_started) = self.on_started.take() {
            on_started(generation);
        }
    }

    /// The process died on its own. Logged only; nothing restarts it.
    pub fn on_exit(&mut self, generation: u64, reason: &str) {
        if !self.is_current(generation) {
            tracing::debug!(generation, "Ignoring exit of replaced server: {}", reason);
            return;
        }

        tracing::error!(generation, "Language server error: {}", reason);
        self.handle = None;
        self.on_started = None;
        self.state = ProcessState::Stopped;
    }

    /// Push configuration to the running server: one key when given, the
    /// full snapshot otherwise. A null value counts as no value.
    pub async fn reload_configuration(
        &self,
        settings: &ResolvedSettings,
        changed: Option<(&str, serde_json::Value)>,
    ) {
        let patch = match changed {
            Some((key, value)) if !value.is_null() => ConfigPatch::for_key(key, value),
            _ => ConfigPatch::full_snapshot(settings),
        };
        self.send_patch(patch).await;
    }

    async fn send_patch(&self, patch: ConfigPatch) {
        if self.state != ProcessState::Running {
            tracing::debug!(state = ?self.state, "Server not running, configuration not sent");
            return;
        }
        let Some(handle) = self.handle.as_ref() else {
            return;
        };

        if let Err(e) = handle.notify(DID_CHANGE_CONFIGURATION, patch.to_params()).await {
            tracing::warn!(generation = handle.generation(), "Failed to send configuration: {}", e);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && generation == self.generation
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every launcher and handle call in order
    #[derive(Default, Clone)]
    pub(crate) struct FakeLauncher {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub sent: Arc<Mutex<Vec<(u64, serde_json::Value)>>>,
        pub fail: Arc<AtomicBool>,
    }

    struct FakeHandle {
        generation: u64,
        launcher: FakeLauncher,
        stopped: bool,
    }

    #[async_trait]
    impl ServerLauncher for FakeLauncher {
        async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn ServerHandle>, LspError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(LspError::Io("launch refused".into()));
            }
            self.calls.lock().unwrap().push(format!("launch {}", request.generation));
            Ok(Box::new(FakeHandle {
                generation: request.generation,
                launcher: self.clone(),
                stopped: false,
            }))
        }
    }

    #[async_trait]
    impl ServerHandle for FakeHandle {
        fn generation(&self) -> u64 {
            self.generation
        }

        async fn notify(&self, method: &str, params: serde_json::Value) -> Result<(), LspError> {
            assert!(!self.stopped, "notify on a stopped handle");
            self.launcher
                .calls
                .lock()
                .unwrap()
                .push(format!("notify {} {}", self.generation, method));
            self.launcher.sent.lock().unwrap().push((self.generation, params));
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), LspError> {
            if !self.stopped {
                self.stopped = true;
                self.launcher
                    .calls
                    .lock()
                    .unwrap()
                    .push(format!("stop {}", self.generation));
            }
            Ok(())
        }
    }

    fn lifecycle(launcher: &FakeLauncher) -> (LanguageClientLifecycle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let lifecycle = LanguageClientLifecycle::new(
            Arc::new(launcher.clone()),
            std::env::temp_dir(),
            Duration::from_millis(500),
            tx,
        );
        (lifecycle, rx)
    }

    #[cfg(unix)]
    fn runnable_settings() -> (tempfile::TempDir, ResolvedSettings) {
        use crate::config::MemoryStore;
        use crate::settings::registry::VIRTUALENV_PATH;
        use crate::settings::tests::{fake_virtualenv, settings_with};

        let venv = fake_virtualenv(&[("pylsp", "#!/bin/sh\n")]);
        let settings = settings_with(
            MemoryStore::new()
                .with(VIRTUALENV_PATH, json!(venv.path().display().to_string()))
                .with("pylsp.plugins.flake8.enabled", json!(true)),
            MemoryStore::new(),
        );
        (venv, settings.snapshot())
    }

    fn calls(launcher: &FakeLauncher) -> Vec<String> {
        launcher.calls.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_server_stays_stopped() {
        let launcher = FakeLauncher::default();
        let (mut lifecycle, _rx) = lifecycle(&launcher);

        let outcome = lifecycle.restart(&ResolvedSettings::default(), None).await;
        assert!(matches!(outcome, StartOutcome::MissingServer));
        assert_eq!(lifecycle.state(), ProcessState::Stopped);
        assert!(calls(&launcher).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let launcher = FakeLauncher::default();
        let (mut lifecycle, _rx) = lifecycle(&launcher);

        lifecycle.stop().await;
        lifecycle.stop().await;
        assert_eq!(lifecycle.state(), ProcessState::Stopped);
        assert!(calls(&launcher).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_config_pushed_only_after_grace_period() {
        let launcher = FakeLauncher::default();
        let (mut lifecycle, mut rx) = lifecycle(&launcher);
        let (_venv, settings) = runnable_settings();

        let started = Arc::new(Mutex::new(None));
        let started_clone = started.clone();
        let outcome = lifecycle
            .restart(
                &settings,
                Some(Box::new(move |generation| {
                    *started_clone.lock().unwrap() = Some(generation);
                })),
            )
            .await;
        assert!(matches!(outcome, StartOutcome::Started { generation: 1 }));
        assert_eq!(lifecycle.state(), ProcessState::Starting);

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event, ServerEvent::Ready { generation: 1 });

        lifecycle.on_ready(1, &settings).await;
        assert_eq!(lifecycle.state(), ProcessState::Running);
        assert_eq!(*started.lock().unwrap(), Some(1));
        assert_eq!(
            calls(&launcher),
            vec!["launch 1", "notify 1 workspace/didChangeConfiguration"]
        );

        let sent = launcher.sent.lock().unwrap();
        assert_eq!(sent[0].1["settings"]["pylsp"]["plugins"]["flake8"]["enabled"], json!(true));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_restart_stops_before_starting() {
        let launcher = FakeLauncher::default();
        let (mut lifecycle, _rx) = lifecycle(&launcher);
        let (_venv, settings) = runnable_settings();

        lifecycle.restart(&settings, None).await;
        lifecycle.restart(&settings, None).await;
        lifecycle.restart(&settings, None).await;

        assert_eq!(
            calls(&launcher),
            vec!["launch 1", "stop 1", "launch 2", "stop 2", "launch 3"]
        );
        assert_eq!(lifecycle.generation(), 3);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_stale_events_are_ignored() {
        let launcher = FakeLauncher::default();
        let (mut lifecycle, _rx) = lifecycle(&launcher);
        let (_venv, settings) = runnable_settings();

        lifecycle.restart(&settings, None).await;
        lifecycle.restart(&settings, None).await;

        // Generation 1 was replaced
        lifecycle.on_ready(1, &settings).await;
        lifecycle.on_exit(1, "crashed");
        assert_eq!(lifecycle.state(), ProcessState::Starting);

        lifecycle.on_ready(2, &settings).await;
        assert_eq!(lifecycle.state(), ProcessState::Running);
        assert!(calls(&launcher).iter().all(|c| !c.starts_with("notify 1")));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_fatal_exit_does_not_restart() {
        let launcher = FakeLauncher::default();
        let (mut lifecycle, _rx) = lifecycle(&launcher);
        let (_venv, settings) = runnable_settings();

        lifecycle.restart(&settings, None).await;
        lifecycle.on_ready(1, &settings).await;
        lifecycle.on_exit(1, "segfault");

        assert_eq!(lifecycle.state(), ProcessState::Stopped);
        assert_eq!(calls(&launcher).iter().filter(|c| c.starts_with("launch")).count(), 1);

        // Nothing to push to
        lifecycle.reload_configuration(&settings, None).await;
        assert_eq!(launcher.sent.lock().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_reload_single_key() {
        let launcher = FakeLauncher::default();
        let (mut lifecycle, _rx) = lifecycle(&launcher);
        let (_venv, settings) = runnable_settings();

        lifecycle.restart(&settings, None).await;
        // Not running yet
        lifecycle
            .reload_configuration(&settings, Some(("pylsp.plugins.yapf.enabled", json!(true))))
            .await;
        assert!(launcher.sent.lock().unwrap().is_empty());

        lifecycle.on_ready(1, &settings).await;
        lifecycle
            .reload_configuration(&settings, Some(("pylsp.plugins.yapf.enabled", json!(true))))
            .await;

        let sent = launcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].1,
            json!({"settings": {"pylsp": {"plugins": {"yapf": {"enabled": true}}}}})
        );
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_reload_null_value_sends_full_snapshot() {
        let launcher = FakeLauncher::default();
        let (mut lifecycle, _rx) = lifecycle(&launcher);
        let (_venv, settings) = runnable_settings();

        lifecycle.restart(&settings, None).await;
        lifecycle.on_ready(1, &settings).await;
        lifecycle
            .reload_configuration(&settings, Some(("pylsp.plugins.yapf.enabled", serde_json::Value::Null)))
            .await;

        let sent = launcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1, ConfigPatch::full_snapshot(&settings).to_params());
        assert_eq!(sent[1].1["settings"]["pylsp"]["plugins"]["yapf"]["enabled"], json!(false));
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_returns_to_stopped() {
        let launcher = FakeLauncher::default();
        launcher.fail.store(true, Ordering::SeqCst);
        let (mut lifecycle, _rx) = lifecycle(&launcher);
        let (_venv, settings) = runnable_settings();

        let outcome = lifecycle.restart(&settings, None).await;
        assert!(matches!(outcome, StartOutcome::Failed(_)));
        assert_eq!(lifecycle.state(), ProcessState::Stopped);
    }
}
