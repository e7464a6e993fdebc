//! Process configuration.
//!
//! Every setting is read once at start-up from the environment and then
//! passed down through constructors. Each variable is optional; an unset or
//! empty variable falls back to a conservative default.
//!
//! | variable | meaning |
//! |---|---|
//! | `TOOLBRIDGE_WORKSPACE_ROOT` | directory the filesystem provider is confined to |
//! | `TOOLBRIDGE_SCRIPTS_DIR` | directory provider executables must live in |
//! | `TOOLBRIDGE_AUTO_EXECUTE` | comma-separated tool names allowed to run unattended |
//! | `TOOLBRIDGE_MODEL` | model identifier sent to the chat endpoint |
//! | `TOOLBRIDGE_MODEL_URL` | chat endpoint URL |
//! | `TOOLBRIDGE_TOOL_TIMEOUT_MS` | bound on one provider round-trip |
//! | `TOOLBRIDGE_MODEL_TIMEOUT_MS` | bound on one model request |
//! | `TOOLBRIDGE_TIME_ZONE` | `local`, `utc` or a fixed offset such as `+05:30` |
//! | `TOOLBRIDGE_HISTORY_LIMIT` | number of past messages replayed to the model |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::gate::Allowlist;
use crate::prompt::ClockZone;

/// Environment variable naming the workspace root.
pub const WORKSPACE_ROOT_VAR: &str = "TOOLBRIDGE_WORKSPACE_ROOT";
/// Environment variable naming the provider scripts directory.
pub const SCRIPTS_DIR_VAR: &str = "TOOLBRIDGE_SCRIPTS_DIR";
/// Environment variable listing auto-executable tools.
pub const AUTO_EXECUTE_VAR: &str = "TOOLBRIDGE_AUTO_EXECUTE";
/// Environment variable naming the model.
pub const MODEL_VAR: &str = "TOOLBRIDGE_MODEL";
/// Environment variable naming the chat endpoint.
pub const MODEL_URL_VAR: &str = "TOOLBRIDGE_MODEL_URL";
/// Environment variable bounding provider round-trips.
pub const TOOL_TIMEOUT_VAR: &str = "TOOLBRIDGE_TOOL_TIMEOUT_MS";
/// Environment variable bounding model requests.
pub const MODEL_TIMEOUT_VAR: &str = "TOOLBRIDGE_MODEL_TIMEOUT_MS";
/// Environment variable selecting the clock zone for the time context.
pub const TIME_ZONE_VAR: &str = "TOOLBRIDGE_TIME_ZONE";
/// Environment variable bounding replayed history.
pub const HISTORY_LIMIT_VAR: &str = "TOOLBRIDGE_HISTORY_LIMIT";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "llama3.2:3b-instruct-q8_0";
/// Chat endpoint used when none is configured (a local Ollama server).
pub const DEFAULT_MODEL_URL: &str = "http://localhost:11434/api/chat";
/// Tools allowed to run unattended when no allowlist is configured.
///
/// Only non-mutating operations are on it.
pub const DEFAULT_AUTO_EXECUTE: &[&str] =
    &["read_file", "list_directory", "get_directory_or_file_info"];

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);
/// Messages of history kept when no limit is configured.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Resolved configuration shared by the provider and the client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the filesystem provider is confined to.
    pub workspace_root: PathBuf,
    /// Directory provider executables must resolve into.
    pub scripts_dir: PathBuf,
    /// Tools permitted to run without confirmation.
    pub allowlist: Allowlist,
    /// Model identifier.
    pub model: String,
    /// Chat endpoint URL.
    pub model_url: String,
    /// Bound on a single provider request/response round-trip.
    pub tool_timeout: Duration,
    /// Bound on a single model request.
    pub model_timeout: Duration,
    /// Zone used for the time context in the system prompt.
    pub clock_zone: ClockZone,
    /// Number of most recent history messages replayed each turn.
    pub history_limit: usize,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let base = default_base_dir();

        let workspace_root = get(WORKSPACE_ROOT_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| base.join("workspace"));
        let scripts_dir = get(SCRIPTS_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| base.join("providers"));

        let allowlist = match get(AUTO_EXECUTE_VAR) {
            Some(raw) => Allowlist::parse(&raw),
            None => Allowlist::new(DEFAULT_AUTO_EXECUTE.iter().copied()),
        };

        let tool_timeout = match get(TOOL_TIMEOUT_VAR) {
            Some(raw) => parse_millis(TOOL_TIMEOUT_VAR, raw)?,
            None => DEFAULT_TOOL_TIMEOUT,
        };
        let model_timeout = match get(MODEL_TIMEOUT_VAR) {
            Some(raw) => parse_millis(MODEL_TIMEOUT_VAR, raw)?,
            None => DEFAULT_MODEL_TIMEOUT,
        };

        let clock_zone = match get(TIME_ZONE_VAR) {
            Some(raw) => raw.parse().map_err(|reason: String| ConfigError::Invalid {
                var: TIME_ZONE_VAR,
                value: raw,
                reason,
            })?,
            None => ClockZone::Local,
        };

        let history_limit = match get(HISTORY_LIMIT_VAR) {
            Some(raw) => raw.parse::<usize>().map_err(|e| ConfigError::Invalid {
                var: HISTORY_LIMIT_VAR,
                reason: e.to_string(),
                value: raw,
            })?,
            None => DEFAULT_HISTORY_LIMIT,
        };

        Ok(Self {
            workspace_root,
            scripts_dir,
            allowlist,
            model: get(MODEL_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            model_url: get(MODEL_URL_VAR).unwrap_or_else(|| DEFAULT_MODEL_URL.to_string()),
            tool_timeout,
            model_timeout,
            clock_zone,
            history_limit,
        })
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("toolbridge")
}

fn parse_millis(var: &'static str, raw: String) -> Result<Duration, ConfigError> {
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.model_url, DEFAULT_MODEL_URL);
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.history_limit, 20);
        assert!(config.workspace_root.ends_with("toolbridge/workspace"));
        assert!(config.scripts_dir.ends_with("toolbridge/providers"));
        assert!(config.allowlist.contains("read_file"));
        assert!(!config.allowlist.contains("write_file"));
        assert!(!config.allowlist.contains("delete_path"));
    }

    #[test]
    fn test_each_variable_overrides_independently() {
        let config = Config::from_lookup(lookup(&[
            (WORKSPACE_ROOT_VAR, "/tmp/ws"),
            (AUTO_EXECUTE_VAR, "write_file, read_file"),
            (TOOL_TIMEOUT_VAR, "1500"),
        ]))
        .unwrap();

        assert_eq!(config.workspace_root, PathBuf::from("/tmp/ws"));
        assert!(config.scripts_dir.ends_with("toolbridge/providers"));
        assert!(config.allowlist.contains("write_file"));
        assert!(!config.allowlist.contains("list_directory"));
        assert_eq!(config.tool_timeout, Duration::from_millis(1500));
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[(MODEL_VAR, "   ")])).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[(TOOL_TIMEOUT_VAR, "soon")])).unwrap_err();
        assert!(err.to_string().contains(TOOL_TIMEOUT_VAR));

        let err = Config::from_lookup(lookup(&[(MODEL_TIMEOUT_VAR, "0")])).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_time_zone_parsing() {
        let config = Config::from_lookup(lookup(&[(TIME_ZONE_VAR, "utc")])).unwrap();
        assert_eq!(config.clock_zone, ClockZone::Utc);

        assert!(Config::from_lookup(lookup(&[(TIME_ZONE_VAR, "Mars/Olympus")])).is_err());
    }
}
