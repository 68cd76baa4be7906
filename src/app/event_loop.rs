// Event loop - run(), event dispatch and the stdin command reader

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{parse_command, App, AppCommand, AppEvent, COMMAND_HELP};
use crate::error::Result;
use crate::lsp::deprecation::{AlertAction, HELP_URL};
use crate::settings::registry::ChangeEffect;
use crate::sidebar::{SidebarState, SidebarView};

impl App {
    /// Long-lived session: start the server, then process events until quit
    pub async fn run(&mut self) -> Result<()> {
        Self::spawn_command_reader(self.event_sender());
        Self::spawn_signal_handler(self.event_sender());

        self.activate().await;
        println!("{}", COMMAND_HELP);

        while !self.should_quit {
            let Some(event) = self.next_event().await else {
                break;
            };
            self.handle_event(event).await;
        }

        self.deactivate().await;
        Ok(())
    }

    /// Next event from either the app channel or the server handle
    pub async fn next_event(&mut self) -> Option<AppEvent> {
        tokio::select! {
            Some(event) = self.event_rx.recv() => Some(event),
            Some(event) = self.server_rx.recv() => Some(event.into()),
            else => None,
        }
    }

    pub async fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::SettingChanged { key } => self.on_setting_changed(&key).await,
            AppEvent::ConfigFileChanged(path) => self.on_config_file_changed(&path),
            AppEvent::Command(command) => self.handle_command(command).await,
            AppEvent::ServerReady { generation } => {
                let snapshot = self.settings.snapshot();
                self.lifecycle.on_ready(generation, &snapshot).await;
            }
            AppEvent::ServerExited { generation, reason } => self.lifecycle.on_exit(generation, &reason),
            AppEvent::ProbeFinished { generation, result } => {
                if generation != self.probe_generation {
                    tracing::debug!(generation, "Discarding superseded probe result");
                    return;
                }
                let state = match result {
                    Ok(setup) => SidebarState::Content(setup),
                    Err(e) => {
                        tracing::error!("Environment probe failed: {}", e);
                        SidebarState::Error(e.to_string())
                    }
                };
                self.sidebar = SidebarView::new(state, self.settings.snapshot());
            }
            AppEvent::AlertAnswered { virtualenv, action } => match action {
                AlertAction::Ok => {}
                AlertAction::MoreInfo => tracing::info!("Deprecated server help: {}", HELP_URL),
                AlertAction::Ignore => self.settings.acknowledge_deprecated_server(&virtualenv),
            },
        }
    }

    async fn handle_command(&mut self, command: AppCommand) {
        match command {
            AppCommand::Restart => self.restart_server(None).await,
            AppCommand::Reload(changed) => {
                let snapshot = self.settings.snapshot();
                let changed = changed.as_ref().map(|(key, value)| (key.as_str(), value.clone()));
                self.lifecycle.reload_configuration(&snapshot, changed).await;
            }
            AppCommand::Refresh => {
                let snapshot = self.settings.snapshot();
                self.detect_setup(snapshot);
            }
            AppCommand::PrintTree => {
                let lifecycle = self.lifecycle();
                println!("server: {:?} (generation {})", lifecycle.state(), lifecycle.generation());
                match self.sidebar.state() {
                    SidebarState::Loading => println!("(loading)"),
                    _ => print!("{}", self.render_sidebar()),
                }
            }
            AppCommand::Quit => self.should_quit = true,
        }
    }

    async fn on_setting_changed(&mut self, key: &str) {
        let Some(change) = self.settings.on_did_change(key) else {
            return;
        };

        let restarts = matches!(change.effect(), ChangeEffect::RestartServer);
        match change.effect() {
            // Restart pushes the full configuration and re-probes itself
            ChangeEffect::RestartServer => self.restart_server(None).await,
            ChangeEffect::PushConfig => {
                let snapshot = self.settings.snapshot();
                let changed = change.value.as_ref().map(|v| (change.spec.key, v.to_json()));
                self.lifecycle.reload_configuration(&snapshot, changed).await;
            }
            ChangeEffect::None => {}
        }

        if change.spec.refreshes_sidebar && !restarts {
            let snapshot = self.settings.snapshot();
            self.detect_setup(snapshot);
        }
    }

    /// A settings file changed on disk: reload that layer and fan out one
    /// change per key
    fn on_config_file_changed(&mut self, path: &std::path::Path) {
        let Some(scope) = self.settings.scope_for_path(path) else {
            tracing::debug!("Change to unrelated file {}", path.display());
            return;
        };

        for key in self.settings.reload(scope) {
            tracing::debug!(%scope, key = %key, "Settings file changed");
            let _ = self.event_tx.send(AppEvent::SettingChanged { key });
        }
    }

    fn spawn_command_reader(tx: mpsc::UnboundedSender<AppEvent>) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_command(&line) {
                        Ok(Some(command)) => {
                            if tx.send(AppEvent::Command(command)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => println!("{} ({})", e, COMMAND_HELP),
                    },
                    Ok(None) => {
                        let _ = tx.send(AppEvent::Command(AppCommand::Quit));
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        let _ = tx.send(AppEvent::Command(AppCommand::Quit));
                        break;
                    }
                }
            }
        });
    }

    fn spawn_signal_handler(tx: mpsc::UnboundedSender<AppEvent>) {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, shutting down");
                let _ = tx.send(AppEvent::Command(AppCommand::Quit));
            }
        });
    }
}
