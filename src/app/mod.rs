// App module
// - mod.rs: App struct, construction, activation
// - event.rs: AppEvent, commands and their parser
// - event_loop.rs: run(), event dispatch, stdin command reader

mod event;
mod event_loop;

pub use event::{parse_command, AppCommand, AppEvent, COMMAND_HELP};

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{ConfigEvent, ConfigManager, ConfigWatcher};
use crate::error::Result;
use crate::lsp::deprecation::{AlertAction, DeprecatedServer, LogNotifier, Notifier, NotifyError};
use crate::lsp::lifecycle::OnStarted;
use crate::lsp::{LanguageClientLifecycle, ProcessLauncher, ServerEvent, ServerLauncher, StartOutcome};
use crate::probe::EnvironmentProber;
use crate::settings::{ResolvedSettings, Settings};
use crate::sidebar::{render_tree, SidebarState, SidebarView};

/// Collaborators the app is built from
pub struct AppParts {
    pub settings: Settings,
    pub launcher: Arc<dyn ServerLauncher>,
    pub prober: EnvironmentProber,
    pub notifier: Arc<dyn Notifier>,
    pub workspace_root: PathBuf,
    pub initialized_grace: std::time::Duration,
}

/// One activation: owns the settings, the server lifecycle and the sidebar
pub struct App {
    settings: Settings,
    lifecycle: LanguageClientLifecycle,
    prober: Arc<EnvironmentProber>,
    notifier: Arc<dyn Notifier>,
    sidebar: SidebarView,
    probe_generation: u64,
    event_tx: mpsc::UnboundedSender<AppEvent>,
    event_rx: mpsc::UnboundedReceiver<AppEvent>,
    server_rx: mpsc::UnboundedReceiver<ServerEvent>,
    should_quit: bool,
    _watcher: Option<ConfigWatcher>,
}

impl App {
    pub fn new(parts: AppParts) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        let lifecycle = LanguageClientLifecycle::new(
            parts.launcher,
            parts.workspace_root,
            parts.initialized_grace,
            server_tx,
        );
        let sidebar = SidebarView::loading(parts.settings.snapshot());

        Self {
            settings: parts.settings,
            lifecycle,
            prober: Arc::new(parts.prober),
            notifier: parts.notifier,
            sidebar,
            probe_generation: 0,
            event_tx,
            event_rx,
            server_rx,
            should_quit: false,
            _watcher: None,
        }
    }

    /// Build the real app: TOML settings, `pylsp` processes, file watching
    pub fn with_config(config: &ConfigManager) -> Result<Self> {
        let app_config = config.app_config();
        let settings = Settings::activate(config.open_settings(), app_config.settings.debounce());

        let mut app = Self::new(AppParts {
            settings,
            launcher: Arc::new(ProcessLauncher::new(
                app_config.server.request_timeout(),
                app_config.server.shutdown_timeout(),
            )),
            prober: EnvironmentProber::new(app_config.probe.script.clone(), config.cache_dir()),
            notifier: Arc::new(LogNotifier),
            workspace_root: config.workspace_dir().to_path_buf(),
            initialized_grace: app_config.server.initialized_grace(),
        });

        if app_config.general.watch_config {
            app._watcher = app.watch_settings(config);
        }
        Ok(app)
    }

    fn watch_settings(&self, config: &ConfigManager) -> Option<ConfigWatcher> {
        let tx = self.event_tx.clone();
        let files = vec![config.workspace_settings_path(), config.global_settings_path()];

        let watcher = ConfigWatcher::new(files, move |event| match event {
            ConfigEvent::Changed(path) => {
                let _ = tx.send(AppEvent::ConfigFileChanged(path));
            }
            ConfigEvent::Error(e) => tracing::warn!("Settings watcher error: {}", e),
        });

        match watcher {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("Settings changes will not be picked up: {}", e);
                None
            }
        }
    }

    #[cfg(test)]
    pub fn sidebar(&self) -> &SidebarView {
        &self.sidebar
    }

    pub fn lifecycle(&self) -> &LanguageClientLifecycle {
        &self.lifecycle
    }

    #[cfg(test)]
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Sender for feeding events from outside the loop
    pub fn event_sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.event_tx.clone()
    }

    pub fn render_sidebar(&self) -> String {
        render_tree(&self.sidebar)
    }

    /// Initial start of the server
    pub async fn activate(&mut self) {
        let on_started: OnStarted = Box::new(|generation| {
            tracing::info!(generation, "Python Language Server started.");
        });
        self.restart_server(Some(on_started)).await;
    }

    pub async fn deactivate(&mut self) {
        self.lifecycle.stop().await;
    }

    /// Restart the server, then re-probe whether or not it came up
    pub(crate) async fn restart_server(&mut self, on_started: Option<OnStarted>) {
        let snapshot = self.settings.snapshot();
        let outcome = self.lifecycle.restart(&snapshot, on_started).await;

        if matches!(outcome, StartOutcome::MissingServer) {
            self.alert_deprecated_server_if_needed(&snapshot);
        }
        self.detect_setup(snapshot);
    }

    /// Show Loading and probe in the background. Older probes still in
    /// flight are superseded.
    pub(crate) fn detect_setup(&mut self, snapshot: ResolvedSettings) {
        self.probe_generation += 1;
        let generation = self.probe_generation;
        self.sidebar = SidebarView::loading(snapshot.clone());

        let prober = self.prober.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = prober.probe_settings(&snapshot).await;
            let _ = tx.send(AppEvent::ProbeFinished { generation, result });
        });
    }

    /// One-shot status: probe inline and return the rendered tree
    pub async fn status(&mut self) -> String {
        let snapshot = self.settings.snapshot();
        let state = match self.prober.probe_settings(&snapshot).await {
            Ok(setup) => SidebarState::Content(setup),
            Err(e) => SidebarState::Error(e.to_string()),
        };
        self.sidebar = SidebarView::new(state, snapshot);
        self.render_sidebar()
    }

    fn alert_deprecated_server_if_needed(&self, snapshot: &ResolvedSettings) {
        let acknowledged = self.settings.acknowledged_deprecated_server();
        let Some(deprecated) = DeprecatedServer::detect(snapshot, acknowledged.as_deref()) else {
            return;
        };

        let reply = self.notifier.notify(deprecated.alert());
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            match reply.await {
                Ok(Ok(index)) => {
                    if let Some(action) = AlertAction::from_index(index) {
                        let _ = tx.send(AppEvent::AlertAnswered {
                            virtualenv: deprecated.virtualenv,
                            action,
                        });
                    }
                }
                Ok(Err(NotifyError::Dismissed)) => {}
                Ok(Err(e)) => tracing::error!("{}", e),
                Err(_) => tracing::debug!("Alert reply channel dropped"),
            }
        });
    }
}
