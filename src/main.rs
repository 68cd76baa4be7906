mod app;
mod cli;
mod config;
mod error;
mod lsp;
mod probe;
mod settings;
mod sidebar;

use color_eyre::eyre::{Result, WrapErr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Command};
use config::{AppConfig, ConfigManager};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse_args();
    let workspace = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().wrap_err("Cannot determine the current directory")?,
    };

    let config = ConfigManager::new(workspace, cli.config_dir.clone())?;
    if let Err(e) = config.write_default_config() {
        eprintln!("Warning: {}", e);
    }
    let _log_guard = init_logging(&cli, config.app_config());
    tracing::debug!(
        workspace = %config.workspace_dir().display(),
        "Using config dir {}",
        config.config_dir().display()
    );

    // Single-threaded: every handler runs to its next await point uninterrupted
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut app = app::App::with_config(&config)?;
        match cli.command() {
            Command::Run => app.run().await?,
            Command::Status => print!("{}", app.status().await),
        }
        Ok::<_, color_eyre::eyre::Report>(())
    })
}

/// stderr by default, a non-blocking file writer when `general.log_file` is set.
/// The returned guard flushes the file on drop.
fn init_logging(cli: &Cli, app_config: &AppConfig) -> Option<WorkerGuard> {
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&app_config.general.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &app_config.general.log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| "pylsp-bridge.log".as_ref());
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}
