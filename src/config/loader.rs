//! Configuration Loader
//!
//! Layers a configuration file, an optional environment-specific overlay
//! (`cache.yaml` then `cache.<env>.yaml`), and `CACHET_*` environment
//! variables, in that order of increasing precedence. Nested keys use `__`
//! in variable names: `CACHET_STORES__REDIS__URL`.

use super::CacheConfig;
use crate::error::CacheResult;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Builder for [`CacheConfig`] from files and the environment
#[derive(Debug, Default)]
pub struct ConfigLoader {
    files: Vec<(PathBuf, bool)>,
    environment_overrides: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Required configuration file; format follows the extension
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), true));
        self
    }

    pub fn optional_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), false));
        self
    }

    /// Read variables from this map instead of the process environment
    pub fn environment_source(mut self, variables: HashMap<String, String>) -> Self {
        self.environment_overrides = Some(variables);
        self
    }

    /// Base file in `directory` plus the overlay for the detected environment
    pub fn for_directory(directory: impl AsRef<Path>) -> Self {
        let directory = directory.as_ref();
        let environment = detect_environment();
        Self::new()
            .file(directory.join("cache.yaml"))
            .optional_file(directory.join(format!("cache.{environment}.yaml")))
    }

    pub fn load(self) -> CacheResult<CacheConfig> {
        let mut builder = Config::builder();
        for (path, required) in &self.files {
            debug!(path = %path.display(), required, "Adding cache configuration file");
            builder = builder.add_source(File::from(path.as_path()).required(*required));
        }
        builder = builder.add_source(
            Environment::with_prefix("CACHET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.environment_overrides),
        );

        let config: CacheConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            default = %config.default,
            stores = config.stores.len(),
            stampede_guard = config.stampede_guard.enabled,
            "Cache configuration loaded"
        );
        Ok(config)
    }
}

impl CacheConfig {
    pub fn load_from_file(path: impl Into<PathBuf>) -> CacheResult<Self> {
        ConfigLoader::new().file(path).load()
    }
}

/// Current environment from `CACHET_ENV`, then `APP_ENV`
pub fn detect_environment() -> String {
    std::env::var("CACHET_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::fs;
    use tempfile::TempDir;

    const BASE: &str = r#"
default: local
prefix: app
stores:
  local:
    driver: memory
    max_capacity: 100
  cold:
    driver: file
    path: /tmp/cachet
    prefix: cold
stampede_guard:
  wait_timeout_ms: 250
"#;

    #[test]
    fn test_load_yaml_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.yaml");
        fs::write(&path, BASE).unwrap();

        let config = ConfigLoader::new()
            .file(&path)
            .environment_source(HashMap::new())
            .load()
            .unwrap();
        assert_eq!(config.default, "local");
        assert_eq!(config.prefix, "app");
        assert_eq!(config.stores["local"].max_capacity, Some(100));
        assert_eq!(config.stores["cold"].prefix.as_deref(), Some("cold"));
        assert_eq!(config.stampede_guard.wait_timeout_ms, 250);
        assert!(config.stampede_guard.enabled);
        assert_eq!(config.event_capacity, 1000);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.yaml");
        fs::write(&path, BASE).unwrap();

        let mut env = HashMap::new();
        env.insert("CACHET_DEFAULT".to_string(), "cold".to_string());
        env.insert(
            "CACHET_STAMPEDE_GUARD__ENABLED".to_string(),
            "false".to_string(),
        );

        let config = ConfigLoader::new()
            .file(&path)
            .environment_source(env)
            .load()
            .unwrap();
        assert_eq!(config.default, "cold");
        assert!(!config.stampede_guard.enabled);
    }

    #[test]
    fn test_environment_overlay_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cache.yaml"), BASE).unwrap();
        fs::write(dir.path().join("cache.staging.yaml"), "prefix: staging\n").unwrap();

        let config = ConfigLoader::new()
            .file(dir.path().join("cache.yaml"))
            .optional_file(dir.path().join("cache.staging.yaml"))
            .optional_file(dir.path().join("cache.absent.yaml"))
            .environment_source(HashMap::new())
            .load()
            .unwrap();
        assert_eq!(config.prefix, "staging");
        assert_eq!(config.default, "local");
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.yaml");
        fs::write(&path, "default: nowhere\n").unwrap();

        let err = ConfigLoader::new()
            .file(&path)
            .environment_source(HashMap::new())
            .load()
            .unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn test_missing_required_file() {
        let dir = TempDir::new().unwrap();
        let err = CacheConfig::load_from_file(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}
