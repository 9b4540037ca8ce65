use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Overrides the configured runtime home
pub const RUNTIME_HOME_ENV: &str = "DEPCAPTURE_RUNTIME_HOME";
/// Overrides the configured ambient search path (platform path-list syntax)
pub const SEARCH_PATH_ENV: &str = "DEPCAPTURE_SEARCH_PATH";

/// Default number of generations for a recursive capture
pub const DEFAULT_MAX_GENERATIONS: usize = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("max_generations must be at least 1")]
    ZeroGenerations,
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the host runtime's builtin units; never persisted
    pub runtime_home: Option<PathBuf>,
    /// Ambient search path of the host environment
    pub search_path: Vec<PathBuf>,
    pub capture: CaptureDefaults,
}

/// Defaults applied to captures that do not say otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDefaults {
    /// How long to keep the interceptor installed after `main` returns
    pub linger: Option<Duration>,
    pub max_generations: usize,
    pub include_entry_point: bool,
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            linger: None,
            max_generations: DEFAULT_MAX_GENERATIONS,
            include_entry_point: true,
        }
    }
}

/// TOML representation of the `[capture]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlCaptureConfig {
    pub linger_ms: Option<u64>,
    pub max_generations: Option<usize>,
    pub include_entry_point: Option<bool>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub runtime_home: Option<PathBuf>,
    pub search_path: Option<Vec<PathBuf>>,
    pub capture: Option<TomlCaptureConfig>,
}

impl Config {
    /// Load configuration from the data directory, merging with defaults
    /// and the environment overrides.
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is
    /// logged and ignored.
    pub fn load() -> Self {
        let config_file = config_path();
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        let config = match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %config_file.display(), error = %e, "Ignoring config file");
                Config::default()
            }
        };
        config.with_env_overrides()
    }

    /// Load a specific config file, without environment overrides
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let toml_config: TomlConfig = toml::from_str(contents)?;
        let mut config = Config::default();

        if let Some(home) = toml_config.runtime_home {
            config.runtime_home = Some(home);
        }
        if let Some(search_path) = toml_config.search_path {
            config.search_path = search_path;
        }
        if let Some(capture) = toml_config.capture {
            if let Some(linger_ms) = capture.linger_ms {
                config.capture.linger = (linger_ms > 0).then(|| Duration::from_millis(linger_ms));
            }
            if let Some(max_generations) = capture.max_generations {
                if max_generations == 0 {
                    return Err(ConfigError::ZeroGenerations);
                }
                config.capture.max_generations = max_generations;
            }
            if let Some(include) = capture.include_entry_point {
                config.capture.include_entry_point = include;
            }
        }
        Ok(config)
    }

    /// Apply `DEPCAPTURE_RUNTIME_HOME` and `DEPCAPTURE_SEARCH_PATH`
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var_os(RUNTIME_HOME_ENV),
            std::env::var_os(SEARCH_PATH_ENV),
        )
    }

    /// An empty runtime home is ignored. A search path that is present
    /// replaces the configured one even when it lists nothing.
    fn with_overrides(mut self, runtime_home: Option<OsString>, search_path: Option<OsString>) -> Self {
        if let Some(home) = runtime_home.filter(|v| !v.is_empty()) {
            self.runtime_home = Some(PathBuf::from(home));
        }
        if let Some(paths) = search_path {
            self.search_path = std::env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        self
    }

    pub fn with_search_path(mut self, search_path: Vec<PathBuf>) -> Self {
        self.search_path = search_path;
        self
    }

    pub fn with_runtime_home(mut self, runtime_home: PathBuf) -> Self {
        self.runtime_home = Some(runtime_home);
        self
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::debug!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::debug!(error = %e, "Failed to write default config");
        }
    }
}
