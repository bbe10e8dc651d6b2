//! Data directory resolution and `config.toml` loading.
//!
//! Missing or malformed configuration never stops a run: the loader logs a
//! warning and falls back to [`GlobalConfig::default()`].

use std::path::{Path, PathBuf};

use datumflow_types::config::GlobalConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DATUMFLOW_DATA_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Resolve the data directory.
///
/// 1. `$DATUMFLOW_DATA_DIR`
/// 2. `~/.datumflow`
/// 3. `./.datumflow`
pub fn resolve_data_dir() -> PathBuf {
    data_dir_from(std::env::var(DATA_DIR_ENV).ok(), dirs::home_dir())
}

fn data_dir_from(env_override: Option<String>, home: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = env_override.filter(|d| !d.trim().is_empty()) {
        return PathBuf::from(dir);
    }
    match home {
        Some(home) => home.join(".datumflow"),
        None => PathBuf::from(".datumflow"),
    }
}

/// Load `{data_dir}/config.toml`, falling back to defaults.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config.toml found, using defaults");
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            GlobalConfig::default()
        }
    }
}
