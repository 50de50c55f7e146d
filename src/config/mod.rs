pub mod schema;

pub use schema::CareloopConfig;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default careloop home directory (~/.careloop).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".careloop"))
        .unwrap_or_else(|| PathBuf::from(".careloop"))
}

/// Expand a path that may start with `~`.
pub fn resolve_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Load config from the given path, or return defaults.
pub fn load_config(path: &Path) -> Result<CareloopConfig> {
    if path.exists() {
        let contents =
            std::fs::read_to_string(path).context("Failed to read careloop config file")?;
        let config: CareloopConfig =
            toml::from_str(&contents).context("Failed to parse careloop config (TOML)")?;
        Ok(config)
    } else {
        Ok(CareloopConfig::default())
    }
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &CareloopConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroundingMode, GroundingPolicy};

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("careloop.toml")).unwrap();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.grounding_mode, GroundingMode::Quick);
        assert!(config.label_service().is_none());
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("careloop.toml");

        let mut config = CareloopConfig::default();
        config.max_iterations = 3;
        config.grounding_policy = GroundingPolicy::Reject;
        config.label_service_url = "http://labels.local".into();
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.max_iterations, 3);
        assert_eq!(loaded.grounding_policy, GroundingPolicy::Reject);
        assert_eq!(loaded.label_service(), Some("http://labels.local"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("careloop.toml");
        std::fs::write(&path, "max_iterations = 2\ngrounding_mode = \"off\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.max_iterations, 2);
        assert_eq!(config.grounding_mode, GroundingMode::Off);
        assert_eq!(config.stream_buffer, 32);
    }

    #[test]
    fn zero_run_timeout_disables_deadline() {
        let mut config = CareloopConfig::default();
        config.run_timeout_secs = 0;
        assert!(config.agent_options().run_timeout.is_none());
    }
}
