//! Project configuration file support for gavel.
//!
//! Loads configuration from `gavel.toml` in the working directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use gavel_provider::ProviderConfig;

/// Project-level configuration loaded from `gavel.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Global defaults applied to both roles
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Generator-specific configuration
    #[serde(default)]
    pub generator: RoleConfig,
    /// Judge-specific configuration
    #[serde(default)]
    pub judge: RoleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Path to the criteria file (default: ./criteria.toml)
    pub criteria_file: Option<PathBuf>,
}

/// Configuration for a specific role (generator or judge)
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// The config file name
pub const CONFIG_FILE_NAME: &str = "gavel.toml";

/// Env var consulted when no api_key is configured
const API_KEY_ENV: &str = "GAVEL_API_KEY";

impl ProjectConfig {
    /// Load configuration from the working directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(working_dir: &Path) -> Result<Option<Self>> {
        let config_path = working_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: ProjectConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    /// Effective provider settings for the generator role.
    /// Priority: [generator].field > global field > default
    pub fn generator_provider(&self) -> ProviderConfig {
        self.resolve_role(&self.generator)
    }

    /// Effective provider settings for the judge role.
    /// Priority: [judge].field > global field > default
    pub fn judge_provider(&self) -> ProviderConfig {
        self.resolve_role(&self.judge)
    }

    fn resolve_role(&self, role: &RoleConfig) -> ProviderConfig {
        let defaults = ProviderConfig::default();
        ProviderConfig {
            base_url: role
                .base_url
                .clone()
                .or_else(|| self.base_url.clone())
                .unwrap_or(defaults.base_url),
            api_key: role
                .api_key
                .clone()
                .or_else(|| self.api_key.clone())
                .or_else(|| std::env::var(API_KEY_ENV).ok())
                .unwrap_or(defaults.api_key),
            model: role
                .model
                .clone()
                .or_else(|| self.model.clone())
                .unwrap_or(defaults.model),
            timeout_secs: role
                .timeout_secs
                .or(self.timeout_secs)
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(ProjectConfig::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_role_overrides_global() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
model = "base-model"
api_key = "k"

[judge]
model = "judge-model"
"#,
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.generator_provider().model, "base-model");
        assert_eq!(config.judge_provider().model, "judge-model");
        assert_eq!(config.judge_provider().api_key, "k");
    }

    #[test]
    fn test_unknown_field_is_hard_error() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "mistyped = true\n").unwrap();
        assert!(ProjectConfig::load(dir.path()).is_err());
    }
}
