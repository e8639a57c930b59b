use std::env;

use serde::Deserialize;
use tracing::warn;

/// Top-level fc.toml configuration
#[derive(Debug, Deserialize, Default)]
pub struct FcConfig {
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_context")]
    pub context: String,
}

// ── Default value functions ──────────────────────────

fn default_data_dir() -> String {
    "./.flagcache".to_string()
}

fn default_prefix() -> String {
    flagcache_lib::persist::DEFAULT_PREFIX.to_string()
}

fn default_context() -> String {
    "default".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            prefix: default_prefix(),
            context: default_context(),
        }
    }
}

impl FcConfig {
    /// Load configuration from a TOML file, falling back to defaults if the file
    /// doesn't exist or cannot be parsed.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!(path, error = %e, "failed to parse config, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("FC_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Some(val) = lookup("FC_PREFIX") {
            self.storage.prefix = val;
        }
        if let Some(val) = lookup("FC_CONTEXT") {
            self.storage.context = val;
        }
    }
}
