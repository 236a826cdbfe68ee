//! Engine configuration loader.
//!
//! Reads `deepexec.toml` and deserializes it into [`EngineConfig`]. Falls back
//! to defaults when the file is missing or malformed, then clamps values that
//! would leave the engine unable to make progress.

use std::path::{Path, PathBuf};

use deepexec_types::config::EngineConfig;

/// File name looked up in the config directory.
pub const CONFIG_FILE_NAME: &str = "deepexec.toml";

/// Floor for `max_concurrent_operations`, `audit_retention_count`,
/// `max_context_depth` and `event_channel_capacity`.
const MIN_CAPACITY: usize = 1;

/// Default location: `{config_dir}/deepexec/deepexec.toml`, or
/// `./deepexec.toml` when the platform has no config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("deepexec").join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
/// - Otherwise returns the parsed config after [`normalize`].
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} found, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => normalize(config),
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Enforce minimums: at least one concurrent operation, one retained audit
/// entry, one level of context depth and a usable poll schedule.
pub fn normalize(mut config: EngineConfig) -> EngineConfig {
    config.max_concurrent_operations = config.max_concurrent_operations.max(MIN_CAPACITY);
    config.audit_retention_count = config.audit_retention_count.max(MIN_CAPACITY);
    config.event_channel_capacity = config.event_channel_capacity.max(MIN_CAPACITY);
    config.max_context_depth = config.max_context_depth.max(MIN_CAPACITY as u32);

    if !config.dependency_poll_factor.is_finite() || config.dependency_poll_factor < 1.0 {
        tracing::warn!(
            factor = config.dependency_poll_factor,
            "dependency_poll_factor below 1.0, using 1.0"
        );
        config.dependency_poll_factor = 1.0;
    }
    config.dependency_poll_initial_ms = config.dependency_poll_initial_ms.max(1);
    config.dependency_poll_max_ms = config
        .dependency_poll_max_ms
        .max(config.dependency_poll_initial_ms);
    config.loop_idle_interval_ms = config.loop_idle_interval_ms.max(1);
    config
}
