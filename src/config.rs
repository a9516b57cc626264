//! Engine configuration
//!
//! Loaded from YAML (`.yaml`/`.yml`) or JSON, then overridden by the
//! environment:
//! - `PLAYER_THROW_ERRORS`: `1`/`true`/`yes` or `0`/`false`/`no`
//! - `PLAYER_LOG`: tracing filter directive (e.g. `player_core=debug`)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, Result};

pub const ENV_THROW_ERRORS: &str = "PLAYER_THROW_ERRORS";
pub const ENV_LOG: &str = "PLAYER_LOG";

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerConfig {
    /// Expression errors propagate instead of evaluating to `null`
    pub throw_errors: bool,
    /// Unknown functions and bad syntax are errors rather than warnings
    pub strict_expressions: bool,
    pub log_filter: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            throw_errors: false,
            strict_expressions: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl PlayerConfig {
    /// Read a config file; the extension picks the format
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let config = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(config)
    }

    /// File config (or defaults) with environment overrides applied
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `PLAYER_*` overrides read through `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_THROW_ERRORS) {
            self.throw_errors = parse_flag(&raw).ok_or_else(|| PlayerError::Config {
                path: ENV_THROW_ERRORS.to_string(),
                details: format!("expected a boolean, got '{raw}'"),
            })?;
        }

        if let Some(filter) = lookup(ENV_LOG).filter(|f| !f.trim().is_empty()) {
            self.log_filter = filter;
        }

        Ok(self)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn yaml_files_fill_missing_fields_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "throwErrors: true").unwrap();

        let config = PlayerConfig::load(file.path()).unwrap();
        assert!(config.throw_errors);
        assert!(config.strict_expressions);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn json_files_are_detected_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"logFilter": "debug", "strictExpressions": false}}"#).unwrap();

        let config = PlayerConfig::load(file.path()).unwrap();
        assert_eq!(config.log_filter, "debug");
        assert!(!config.strict_expressions);
    }

    #[test]
    fn environment_overrides_win() {
        let config = PlayerConfig::default()
            .with_overrides(env(&[(ENV_THROW_ERRORS, "yes"), (ENV_LOG, "player_core=trace")]))
            .unwrap();

        assert!(config.throw_errors);
        assert_eq!(config.log_filter, "player_core=trace");
    }

    #[test]
    fn bad_flags_are_config_errors() {
        let err = PlayerConfig::default()
            .with_overrides(env(&[(ENV_THROW_ERRORS, "maybe")]))
            .unwrap_err();
        assert!(err.to_string().starts_with("PLY-080"));
    }
}
