use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Active backend provider: "sdk" or "cli".
    #[serde(default = "default_backend_kind")]
    pub backend_kind: String,

    #[serde(default = "default_sdk_backend")]
    pub sdk: BackendProcessConfig,

    #[serde(default = "default_cli_backend")]
    pub cli: BackendProcessConfig,

    /// Auxiliary tool servers registered with each spawned session.
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub events_out: EventsOutConfig,
}

fn default_backend_kind() -> String {
    "sdk".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_kind: default_backend_kind(),
            sdk: default_sdk_backend(),
            cli: default_cli_backend(),
            tool_servers: Vec::new(),
            logging: LoggingConfig::default(),
            control: ControlConfig::default(),
            persistence: PersistenceConfig::default(),
            events_out: EventsOutConfig::default(),
        }
    }
}

/// Launch configuration for one backend provider process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendProcessConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_sdk_backend() -> BackendProcessConfig {
    BackendProcessConfig {
        command: "agentd".to_string(),
        args: vec!["--serve".to_string(), "--format".to_string(), "ndjson".to_string()],
    }
}

fn default_cli_backend() -> BackendProcessConfig {
    BackendProcessConfig {
        command: "agent".to_string(),
        args: vec!["--output-format".to_string(), "stream-json".to_string()],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "taskmux_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// How long a submitted prompt may wait for its completion before
    /// resolving with empty content.
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    /// Byte budget of each worker's output ring.
    #[serde(default = "default_capture_bytes")]
    pub capture_bytes: usize,

    /// A running task with no progress inside this window counts as stuck.
    #[serde(default = "default_stuck_timeout_ms")]
    pub stuck_timeout_ms: u64,
}

fn default_prompt_timeout_ms() -> u64 {
    300_000
}

fn default_capture_bytes() -> usize {
    256 * 1024
}

fn default_stuck_timeout_ms() -> u64 {
    120_000
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            prompt_timeout_ms: default_prompt_timeout_ms(),
            capture_bytes: default_capture_bytes(),
            stuck_timeout_ms: default_stuck_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory. Empty or unset means `<data dir>/tasks`.
    #[serde(default)]
    pub directory: Option<String>,

    /// Coalescing window for debounced saves.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    /// Upper bound for bounded history tail reads.
    #[serde(default = "default_history_read_max")]
    pub history_read_max: u64,
}

fn default_save_debounce_ms() -> u64 {
    500
}

fn default_history_read_max() -> u64 {
    64 * 1024
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: None,
            save_debounce_ms: default_save_debounce_ms(),
            history_read_max: default_history_read_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsOutConfig {
    pub enabled: bool,
    pub path: String,
    pub channel_capacity: usize,
    pub drop_when_full: bool,
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./task.events.jsonl".to_string(),
            channel_capacity: 2048,
            drop_when_full: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_from_empty_toml() {
        let cfg: AppConfig = toml::from_str("").expect("empty document parses");
        assert_eq!(cfg.backend_kind, "sdk");
        assert_eq!(cfg.control.prompt_timeout_ms, 300_000);
        assert_eq!(cfg.persistence.save_debounce_ms, 500);
        assert!(!cfg.events_out.enabled);
    }

    #[test]
    fn partial_toml_overrides_selected_fields() {
        let cfg: AppConfig = toml::from_str(
            r#"
backend_kind = "cli"

[control]
prompt_timeout_ms = 1000
"#,
        )
        .expect("partial document parses");
        assert_eq!(cfg.backend_kind, "cli");
        assert_eq!(cfg.control.prompt_timeout_ms, 1000);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.control.capture_bytes, 256 * 1024);
    }
}
