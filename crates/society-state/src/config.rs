//! Runtime configuration.
//!
//! Read from a TOML file, then patched from `SOCIETY_*` environment
//! variables:
//!
//! ```toml
//! [storage]
//! backend = "sqlite"
//! path = "data/society.db"
//! namespace = "society"
//!
//! [flags]
//! remote_url = "https://example.com/flags.json"
//! timeout_secs = 10
//!
//! [flags.overrides]
//! analytics_dashboard = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use society_store::DEFAULT_NAMESPACE;
use tracing::{info, warn};
use url::Url;

use crate::error::{Result, StateError};
use crate::remote::DEFAULT_TIMEOUT_SECS;

pub const ENV_STORAGE_BACKEND: &str = "SOCIETY_STORAGE_BACKEND";
pub const ENV_STORAGE_PATH: &str = "SOCIETY_STORAGE_PATH";
pub const ENV_NAMESPACE: &str = "SOCIETY_NAMESPACE";
pub const ENV_FLAGS_URL: &str = "SOCIETY_FLAGS_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(StateError::Config(format!("unknown storage backend: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// SQLite database file. Ignored by the memory backend.
    pub path: PathBuf,
    /// Prefix of every persisted key.
    pub namespace: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: PathBuf::from("data/society.db"),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsConfig {
    /// Endpoint answering with a JSON object of flag values.
    pub remote_url: Option<String>,
    pub timeout_secs: u64,
    /// Values layered over the built-in defaults at startup.
    pub overrides: BTreeMap<String, bool>,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub storage: StorageConfig,
    pub flags: FlagsConfig,
}

impl StateConfig {
    /// Load `path` and apply environment overrides. A missing file yields
    /// the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                StateError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            let config = Self::from_toml_str(&content)?;
            info!(path = %path.display(), "configuration loaded");
            config
        } else {
            warn!(path = %path.display(), "configuration file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| StateError::Config(format!("failed to parse TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SOCIETY_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(backend) = lookup(ENV_STORAGE_BACKEND) {
            self.storage.backend = backend.parse()?;
        }
        if let Some(path) = lookup(ENV_STORAGE_PATH) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            self.storage.namespace = namespace;
        }
        if let Some(url) = lookup(ENV_FLAGS_URL) {
            self.flags.remote_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        self.validate()
    }

    /// Parsed remote flag endpoint, if one is configured.
    pub fn remote_url(&self) -> Result<Option<Url>> {
        self.flags
            .remote_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| StateError::Config(format!("invalid flags.remote_url {raw:?}: {e}")))
            })
            .transpose()
    }

    pub fn flag_timeout(&self) -> Duration {
        Duration::from_secs(self.flags.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.storage.namespace.trim().is_empty() {
            return Err(StateError::Config("storage.namespace must not be empty".into()));
        }
        if self.flags.timeout_secs == 0 {
            return Err(StateError::Config("flags.timeout_secs must be at least 1".into()));
        }
        self.remote_url().map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = StateConfig::from_toml_str("").unwrap();
        assert_eq!(config, StateConfig::default());
        assert_eq!(config.storage.namespace, "society");
        assert_eq!(config.flag_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn parses_every_section() {
        let config = StateConfig::from_toml_str(
            r#"
            [storage]
            backend = "memory"
            namespace = "tower-b"

            [flags]
            remote_url = "https://flags.example.com/flags.json"
            timeout_secs = 3

            [flags.overrides]
            analytics_dashboard = true
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.storage.namespace, "tower-b");
        assert_eq!(
            config.remote_url().unwrap().unwrap().host_str(),
            Some("flags.example.com")
        );
        assert_eq!(config.flags.overrides.get("analytics_dashboard"), Some(&true));
    }

    #[test]
    fn parse_errors_are_config_errors() {
        assert!(matches!(
            StateConfig::from_toml_str("[storage\nbackend ="),
            Err(StateError::Config(_))
        ));
        assert!(matches!(
            StateConfig::from_toml_str("[storage]\nbackend = \"redis\""),
            Err(StateError::Config(_))
        ));
        assert!(matches!(
            StateConfig::from_toml_str("[flags]\nremote_url = \"not a url\""),
            Err(StateError::Config(_))
        ));
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_STORAGE_BACKEND, "memory"),
            (ENV_STORAGE_PATH, "/tmp/other.db"),
            (ENV_NAMESPACE, "qa"),
            (ENV_FLAGS_URL, "http://127.0.0.1:9000/flags"),
        ]);
        let mut config = StateConfig::default();
        config
            .apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.storage.namespace, "qa");
        assert!(config.remote_url().unwrap().is_some());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StateConfig::load(dir.path().join("absent.toml")).unwrap();
        config.apply_overrides_from(|_| None).unwrap();
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
    }
}
