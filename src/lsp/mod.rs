//! Language server plumbing
//!
//! # Components
//!
//! - [`patch`] - setting change -> `workspace/didChangeConfiguration` payload
//! - [`protocol`] - JSON-RPC message handling
//! - [`client`] - server process handle
//! - [`lifecycle`] - start/stop/restart state machine owning the handle
//! - [`deprecation`] - alert for virtualenvs with only the old `pyls` server

pub mod client;
pub mod deprecation;
pub mod lifecycle;
pub mod patch;
pub mod protocol;

pub use client::{LspError, ProcessLauncher, ServerEvent, ServerLauncher};
pub use lifecycle::{LanguageClientLifecycle, StartOutcome};
