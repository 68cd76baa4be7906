//! Typed setting values and coercion from raw stored values

use std::path::{Component, Path, PathBuf};

use crate::config::ConfigValue;

/// Declared type of a logical setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Boolean,
    StringArray,
    /// A string with `~` expanded to the home directory
    Path,
}

/// A resolved, typed setting value
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    String(String),
    Number(f64),
    Boolean(bool),
    StringArray(Vec<String>),
    Path(PathBuf),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            SettingValue::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Wire representation, as sent to the language server
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SettingValue::String(s) => serde_json::Value::String(s.clone()),
            SettingValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SettingValue::Boolean(b) => serde_json::Value::Bool(*b),
            SettingValue::StringArray(items) => serde_json::Value::Array(
                items.iter().cloned().map(serde_json::Value::String).collect(),
            ),
            SettingValue::Path(p) => serde_json::Value::String(p.display().to_string()),
        }
    }
}

/// Coerce a stored value into the declared type. Mismatches read as unset.
pub fn coerce(value: &ConfigValue, ty: ValueType) -> Option<SettingValue> {
    match (ty, value) {
        (ValueType::String, ConfigValue::String(s)) => Some(SettingValue::String(s.clone())),
        (ValueType::Number, ConfigValue::Number(n)) => n.as_f64().map(SettingValue::Number),
        (ValueType::Boolean, ConfigValue::Bool(b)) => Some(SettingValue::Boolean(*b)),
        (ValueType::StringArray, ConfigValue::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(SettingValue::StringArray),
        (ValueType::Path, ConfigValue::String(s)) => Some(SettingValue::Path(expand_user(s))),
        _ => None,
    }
}

/// Workspace booleans may be stored as a three-state string enum.
///
/// Returns `None` for "inherit" (fall through to the global layer).
pub fn tri_state_bool(value: &ConfigValue) -> Option<bool> {
    match value {
        ConfigValue::Bool(b) => Some(*b),
        ConfigValue::String(s) if is_inherit(s) => None,
        ConfigValue::String(s) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    }
}

fn is_inherit(s: &str) -> bool {
    s.eq_ignore_ascii_case("inherit") || s.eq_ignore_ascii_case("inherited")
}

/// Expand a leading `~` to the user's home directory
pub fn expand_user(path: &str) -> PathBuf {
    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return PathBuf::from(path),
    };

    if path == "~" {
        home
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Display form of an optional path: home shortened to `~`, absent as "Not Found"
pub fn human_readable_path(path: Option<&Path>) -> String {
    let path = match path {
        Some(path) => path,
        None => return "Not Found".to_string(),
    };

    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            if rest.as_os_str().is_empty() {
                return "~".to_string();
            }
            return format!("~/{}", rest.display());
        }
    }
    path.display().to_string()
}

/// Whether `path` is an existing file the current user may execute
pub fn is_executable(path: &Path) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return false,
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!("abc"), ValueType::String, Some(SettingValue::String("abc".into())))]
    #[case(json!(3), ValueType::Number, Some(SettingValue::Number(3.0)))]
    #[case(json!(true), ValueType::Boolean, Some(SettingValue::Boolean(true)))]
    #[case(json!(["a", "b"]), ValueType::StringArray, Some(SettingValue::StringArray(vec!["a".into(), "b".into()])))]
    #[case(json!(["a", 1]), ValueType::StringArray, None)]
    #[case(json!("true"), ValueType::Boolean, None)]
    #[case(json!(1), ValueType::String, None)]
    #[case(json!("/opt/venv"), ValueType::Path, Some(SettingValue::Path(PathBuf::from("/opt/venv"))))]
    fn test_coerce(
        #[case] raw: ConfigValue,
        #[case] ty: ValueType,
        #[case] expected: Option<SettingValue>,
    ) {
        assert_eq!(coerce(&raw, ty), expected);
    }

    #[rstest]
    #[case(json!("inherited"), None)]
    #[case(json!("inherit"), None)]
    #[case(json!("true"), Some(true))]
    #[case(json!("TRUE"), Some(true))]
    #[case(json!("false"), Some(false))]
    #[case(json!("garbage"), Some(false))]
    #[case(json!(true), Some(true))]
    #[case(json!(42), None)]
    fn test_tri_state_bool(#[case] raw: ConfigValue, #[case] expected: Option<bool>) {
        assert_eq!(tri_state_bool(&raw), expected);
    }

    #[test]
    fn test_expand_user() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_user("~"), home);
        assert_eq!(expand_user("~/venv"), home.join("venv"));
        assert_eq!(expand_user("/abs/venv"), PathBuf::from("/abs/venv"));
        assert_eq!(expand_user("~other/venv"), PathBuf::from("~other/venv"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("a//b/")), PathBuf::from("a/b"));
    }

    #[test]
    fn test_human_readable_path() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(human_readable_path(None), "Not Found");
        assert_eq!(human_readable_path(Some(&home.join("venv"))), "~/venv");
        assert_eq!(human_readable_path(Some(Path::new("/opt/venv"))), "/opt/venv");
    }

    #[test]
    fn test_setting_value_to_json() {
        assert_eq!(SettingValue::Boolean(false).to_json(), json!(false));
        assert_eq!(
            SettingValue::Path(PathBuf::from("/opt/venv")).to_json(),
            json!("/opt/venv")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tool");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        assert!(!is_executable(&path));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&path));
        assert!(!is_executable(dir.path()));
        assert!(!is_executable(&dir.path().join("missing")));
    }
}
