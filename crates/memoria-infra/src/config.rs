//! Deployment configuration loader.
//!
//! Reads `memoria.toml` and deserializes it into [`MemoryConfig`]. A missing
//! file means defaults; a malformed or invalid file is a fatal
//! [`ConfigError`] and the subsystem does not start.

use std::path::{Path, PathBuf};

use memoria_types::config::MemoryConfig;
use memoria_types::error::ConfigError;

/// Default config location: `~/.memoria/memoria.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memoria")
        .join("memoria.toml")
}

/// Parse and validate a configuration document.
pub fn parse_memory_config(content: &str) -> Result<MemoryConfig, ConfigError> {
    let config: MemoryConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    if config.dedup_threshold_overlaps_retrieval() {
        tracing::warn!(
            dedup_threshold = config.deduplication.threshold,
            retrieval_threshold = config.default_similarity_threshold,
            "Dedup threshold is not above the retrieval threshold; related facts may be merged"
        );
    }
    Ok(config)
}

/// Load configuration from `path`.
pub async fn load_memory_config(path: &Path) -> Result<MemoryConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            let config = MemoryConfig::default();
            config.validate()?;
            return Ok(config);
        }
        Err(err) => {
            return Err(ConfigError::Io(format!("{}: {err}", path.display())));
        }
    };

    parse_memory_config(&content)
}
