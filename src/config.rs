//! cbridge Configuration
//!
//! Handles parsing and management of cbridge.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file searched for by [`FfiConfig::find_and_load`].
pub const CONFIG_FILE: &str = "cbridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching cbridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FfiConfig {
    /// Library search settings
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Struct layout settings
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FfiConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: FfiConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    /// Defaults apply when no file exists anywhere up to the root.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Library search settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderConfig {
    /// Directories tried before the platform defaults
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Also search the platform default directories
    #[serde(default = "default_true")]
    pub use_default_paths: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            use_default_paths: true,
        }
    }
}

/// Struct layout settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayoutConfig {
    /// Maximum member alignment; 0 keeps natural alignment
    #[serde(default)]
    pub pack: usize,
}

impl LayoutConfig {
    pub fn pack(&self) -> Option<usize> {
        (self.pack > 0).then_some(self.pack)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FfiConfig::default();
        assert!(config.loader.use_default_paths);
        assert!(config.loader.search_paths.is_empty());
        assert_eq!(config.layout.pack(), None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[loader]
search_paths = ["/opt/mylibs"]
use_default_paths = false

[layout]
pack = 1
"#;
        let config: FfiConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.loader.search_paths, vec![PathBuf::from("/opt/mylibs")]);
        assert!(!config.loader.use_default_paths);
        assert_eq!(config.layout.pack(), Some(1));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_find_and_load_walks_up() {
        let root = std::env::temp_dir().join(format!("cbridge-config-{}", std::process::id()));
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = FfiConfig::default();
        config.logging.level = "debug".to_string();
        config.save(&root.join(CONFIG_FILE)).unwrap();

        let found = FfiConfig::find_and_load(&nested).unwrap();
        assert_eq!(found, config);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FfiConfig::load(Path::new("/nonexistent/cbridge.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }
}
