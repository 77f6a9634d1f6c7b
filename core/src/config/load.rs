use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default taskmux data directory: ~/.taskmux
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("TASKMUX_DATA_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".taskmux"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.taskmux/config.toml (highest)
    let data_dir = get_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg: AppConfig = if user_config.exists() {
        let s = std::fs::read_to_string(&user_config)?;
        toml::from_str::<AppConfig>(&s)?
    } else if local_config.exists() {
        let s = std::fs::read_to_string(local_config)?;
        toml::from_str::<AppConfig>(&s)?
    } else {
        AppConfig::default()
    };

    // Default the persistence directory into the data dir.
    let unset = cfg
        .persistence
        .directory
        .as_ref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(true);
    if unset {
        let tasks_dir = data_dir.join("tasks");
        std::fs::create_dir_all(&tasks_dir)?;
        cfg.persistence.directory = Some(tasks_dir.to_string_lossy().to_string());
    }

    if cfg.logging.directory.is_none()
        || cfg
            .logging
            .directory
            .as_ref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(false)
    {
        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)?;
        cfg.logging.directory = Some(logs_dir.to_string_lossy().to_string());
    }

    // Environment variable overrides (Priority 0: highest)
    if let Ok(v) = std::env::var("TASKMUX_BACKEND_KIND") {
        if !v.trim().is_empty() {
            cfg.backend_kind = v;
        }
    }
    if let Ok(v) = std::env::var("TASKMUX_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }

    Ok(cfg)
}
