//! Events processed by the app loop, and the stdin command grammar

use std::path::PathBuf;

use crate::lsp::deprecation::AlertAction;
use crate::lsp::ServerEvent;
use crate::probe::{ProbeError, PythonSetup};

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Restart,
    /// Push configuration: one key/value pair, or everything
    Reload(Option<(String, serde_json::Value)>),
    Refresh,
    PrintTree,
    Quit,
}

#[derive(Debug)]
pub enum AppEvent {
    SettingChanged { key: String },
    ConfigFileChanged(PathBuf),
    Command(AppCommand),
    ServerReady { generation: u64 },
    ServerExited { generation: u64, reason: String },
    ProbeFinished {
        generation: u64,
        result: Result<PythonSetup, ProbeError>,
    },
    AlertAnswered {
        virtualenv: PathBuf,
        action: AlertAction,
    },
}

impl From<ServerEvent> for AppEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Ready { generation } => AppEvent::ServerReady { generation },
            ServerEvent::Exited { generation, reason } => AppEvent::ServerExited { generation, reason },
        }
    }
}

pub const COMMAND_HELP: &str = "commands: restart | reload [<key> <json>] | refresh | tree | quit";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("reload takes a key and a JSON value, or nothing")]
    ReloadArguments,
    #[error("invalid JSON value: {0}")]
    InvalidValue(String),
}

/// Parse one console line. Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<AppCommand>, CommandError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "" => return Ok(None),
        "restart" => AppCommand::Restart,
        "refresh" => AppCommand::Refresh,
        "tree" => AppCommand::PrintTree,
        "quit" | "exit" => AppCommand::Quit,
        "reload" if rest.is_empty() => AppCommand::Reload(None),
        "reload" => {
            let (key, value) = rest
                .split_once(char::is_whitespace)
                .ok_or(CommandError::ReloadArguments)?;
            let value = serde_json::from_str(value.trim())
                .map_err(|e| CommandError::InvalidValue(e.to_string()))?;
            AppCommand::Reload(Some((key.to_string(), value)))
        }
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("restart", AppCommand::Restart)]
    #[case("  refresh  ", AppCommand::Refresh)]
    #[case("tree", AppCommand::PrintTree)]
    #[case("exit", AppCommand::Quit)]
    #[case("reload", AppCommand::Reload(None))]
    #[case(
        "reload pylsp.plugins.pylint.enabled true",
        AppCommand::Reload(Some(("pylsp.plugins.pylint.enabled".into(), json!(true))))
    )]
    #[case(
        "reload plugins.rope.enabled   {\"x\": [1, 2]}",
        AppCommand::Reload(Some(("plugins.rope.enabled".into(), json!({"x": [1, 2]}))))
    )]
    fn test_parse_command(#[case] line: &str, #[case] expected: AppCommand) {
        assert_eq!(parse_command(line), Ok(Some(expected)));
    }

    #[test]
    fn test_parse_blank_and_errors() {
        assert_eq!(parse_command("   "), Ok(None));
        assert_eq!(parse_command("start"), Err(CommandError::Unknown("start".into())));
        assert_eq!(parse_command("reload somekey"), Err(CommandError::ReloadArguments));
        assert!(matches!(parse_command("reload k tru"), Err(CommandError::InvalidValue(_))));
    }

    #[test]
    fn test_server_event_conversion() {
        let event: AppEvent = ServerEvent::Exited {
            generation: 2,
            reason: "gone".into(),
        }
        .into();
        assert!(matches!(event, AppEvent::ServerExited { generation: 2, .. }));
    }
}
