use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::lsp::LspError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings store error: {0}")]
    Store(#[from] ConfigError),

    #[error("Language server error: {0}")]
    Lsp(#[from] LspError),

    #[error("Workspace directory not found: {path}")]
    WorkspaceNotFound { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
