//! Per-user configuration for the tix CLI.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const TIX_HOME_ENV: &str = "TIX_HOME";
pub const DEFAULT_TICKET_PREFIX: &str = "TIX";
pub const DEFAULT_ASSISTANT_EXECUTABLE: &str = "claude";
pub const DEFAULT_ASSISTANT_MODEL: &str = "sonnet";
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to replace config file at {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigValueError {
    #[error("unknown config key '{key}'. valid keys: {}", CONFIG_KEYS.join(", "))]
    UnknownKey { key: String },
    #[error("invalid value '{value}' for {key}: {message}")]
    InvalidValue {
        key: &'static str,
        value: String,
        message: String,
    },
}

pub const CONFIG_KEYS: [&str; 8] = [
    "userName",
    "notionDatabaseUrl",
    "notionDataSourceId",
    "ticketPrefix",
    "assistant.executable",
    "assistant.model",
    "assistant.jsonOutput",
    "sync.timeoutSecs",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TixConfig {
    /// Identity used to filter tickets by assignee.
    #[serde(default)]
    pub user_name: String,
    /// Database (view) URL; input for the structured-view strategy and discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notion_database_url: Option<String>,
    /// Resolved by discovery; input for the structured-query strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notion_data_source_id: Option<String>,
    #[serde(default = "default_ticket_prefix")]
    pub ticket_prefix: String,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for TixConfig {
    fn default() -> Self {
        Self {
            user_name: String::new(),
            notion_database_url: None,
            notion_data_source_id: None,
            ticket_prefix: default_ticket_prefix(),
            assistant: AssistantConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_executable")]
    pub executable: String,
    #[serde(default = "default_assistant_model")]
    pub model: String,
    /// Ask the assistant for `--output-format json`; output is then unwrapped
    /// from its `{"result": ...}` envelope.
    #[serde(default)]
    pub json_output: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            executable: default_assistant_executable(),
            model: default_assistant_model(),
            json_output: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_sync_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sync_timeout_secs(),
        }
    }
}

fn default_ticket_prefix() -> String {
    DEFAULT_TICKET_PREFIX.to_string()
}

fn default_assistant_executable() -> String {
    DEFAULT_ASSISTANT_EXECUTABLE.to_string()
}

fn default_assistant_model() -> String {
    DEFAULT_ASSISTANT_MODEL.to_string()
}

fn default_sync_timeout_secs() -> u64 {
    DEFAULT_SYNC_TIMEOUT_SECS
}

/// Root directory for tix state: `$TIX_HOME`, else `~/.tix`.
pub fn tix_home() -> PathBuf {
    if let Some(value) = env::var_os(TIX_HOME_ENV) {
        if !value.is_empty() {
            return PathBuf::from(value);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".tix"))
        .unwrap_or_else(|| PathBuf::from(".tix"))
}

pub fn default_config_path() -> PathBuf {
    tix_home().join("config.toml")
}

pub fn default_cache_path() -> PathBuf {
    tix_home().join("tickets.json")
}

pub fn parse_config(contents: &str) -> Result<TixConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<TixConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default_config(path: impl AsRef<Path>) -> Result<TixConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(TixConfig::default());
    }
    load_config(path_ref)
}

pub fn save_config(path: impl AsRef<Path>, config: &TixConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    let parent = path_ref.parent().map(Path::to_path_buf);
    if let Some(parent_dir) = parent.filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(&parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir,
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    // Written beside the target and renamed over it, so a failed save keeps
    // the previous file intact.
    let temp = path_ref.with_extension("toml.tmp");
    fs::write(&temp, body).map_err(|source| ConfigError::Write {
        path: temp.clone(),
        source,
    })?;
    if let Err(source) = fs::rename(&temp, path_ref) {
        let _ = fs::remove_file(&temp);
        return Err(ConfigError::Rename {
            path: path_ref.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Applies a `tix config set <key> <value>` update. An empty value clears
/// optional fields.
pub fn apply_config_value(
    config: &mut TixConfig,
    key: &str,
    value: &str,
) -> Result<(), ConfigValueError> {
    let value = value.trim();
    match key {
        "userName" => config.user_name = value.to_string(),
        "notionDatabaseUrl" => config.notion_database_url = optional(value),
        "notionDataSourceId" => config.notion_data_source_id = optional(value),
        "ticketPrefix" => {
            if value.is_empty() {
                return Err(ConfigValueError::InvalidValue {
                    key: "ticketPrefix",
                    value: value.to_string(),
                    message: "prefix must not be empty".to_string(),
                });
            }
            config.ticket_prefix = value.trim_end_matches('-').to_string();
        }
        "assistant.executable" => {
            if value.is_empty() {
                return Err(ConfigValueError::InvalidValue {
                    key: "assistant.executable",
                    value: value.to_string(),
                    message: "executable must not be empty".to_string(),
                });
            }
            config.assistant.executable = value.to_string();
        }
        "assistant.model" => config.assistant.model = value.to_string(),
        "assistant.jsonOutput" => {
            config.assistant.json_output =
                value
                    .parse::<bool>()
                    .map_err(|err| ConfigValueError::InvalidValue {
                        key: "assistant.jsonOutput",
                        value: value.to_string(),
                        message: err.to_string(),
                    })?;
        }
        "sync.timeoutSecs" => {
            config.sync.timeout_secs =
                value
                    .parse::<u64>()
                    .map_err(|err| ConfigValueError::InvalidValue {
                        key: "sync.timeoutSecs",
                        value: value.to_string(),
                        message: err.to_string(),
                    })?;
        }
        other => {
            return Err(ConfigValueError::UnknownKey {
                key: other.to_string(),
            })
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
