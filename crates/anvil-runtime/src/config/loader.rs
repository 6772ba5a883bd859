//! Configuration loader using figment.
//!
//! This module provides a layered configuration loading system:
//!
//! - **Multiple sources**: TOML files, environment variables, programmatic
//!   overrides
//! - **Layered configuration**: Later sources override earlier ones
//! - **Profile support**: Development vs production configurations
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`anvil.{profile}.toml`)
//! 3. Main config file (`anvil.toml` / `config.toml`)
//! 4. Environment variables (`ANVIL_*`)
//! 5. Programmatic overrides
//!
//! # Environment Variable Mapping
//!
//! Environment variables use the `ANVIL_` prefix with `__` as separator:
//!
//! - `ANVIL_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `ANVIL_ENGINE__PARALLELISM=16` → `engine.parallelism = 16`
//! - `ANVIL_RATE_LIMIT__PER_USER=5` → `rate_limit.per_user = 5`
//!
//! # Example
//!
//! ```rust,ignore
//! use anvil_runtime::config::ConfigLoader;
//!
//! // Simple loading from the current directory
//! let config = ConfigLoader::new().load()?;
//!
//! // Load with a specific profile
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(feature = "toml-config")]
use figment::providers::{Format, Toml};
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::schema::AnvilConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Creates a profile from `ANVIL_PROFILE` or defaults to Development.
    pub fn from_env() -> Self {
        std::env::var("ANVIL_PROFILE")
            .map(|p| match p.to_lowercase().as_str() {
                "production" | "prod" => Self::Production,
                "development" | "dev" => Self::Development,
                other => Self::Custom(other.to_string()),
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    /// Base figment instance for programmatic overrides.
    figment: Figment,
    /// Configuration profile.
    profile: Profile,
    /// Search paths for configuration files.
    search_paths: Vec<PathBuf>,
    /// Whether to load environment variables.
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        let p = profile.into();
        self.profile = match p.to_lowercase().as_str() {
            "production" | "prod" => Profile::Production,
            "development" | "dev" => Profile::Development,
            _ => Profile::Custom(p),
        };
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to the search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: AnvilConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<AnvilConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: AnvilConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;

        if config.engine.parallelism == 0 {
            return Err(ConfigError::Invalid(
                "engine.parallelism must be at least 1".to_string(),
            ));
        }
        if config.engine.queue_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "engine.queue_multiplier must be at least 1".to_string(),
            ));
        }

        debug!(
            profile = %profile,
            parallelism = config.engine.parallelism,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Builds the figment instance with all sources.
    fn build_figment(mut self) -> ConfigResult<Figment> {
        // Start with defaults
        let mut figment = Figment::from(Serialized::defaults(AnvilConfig::default()));

        // Load config files
        if let Some(path) = self.config_file.take() {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, &path)?;
            } else {
                return Err(ConfigError::FileNotFound(path));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        // Load environment variables
        if self.load_env {
            trace!("Loading environment variables with ANVIL_ prefix");
            figment = figment.merge(
                Env::prefixed("ANVIL_")
                    .split("__")
                    .map(|key| key.as_str().replace("__", ".").into()),
            );
        }

        // Programmatic overrides win over everything
        figment = figment.merge(self.figment);

        Ok(figment)
    }

    /// Merges a single config file into the figment, dispatching on file
    /// extension. Only extensions enabled via feature flags are accepted.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    /// Resolves the effective list of search paths.
    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            std::env::current_dir().into_iter().collect()
        } else {
            self.search_paths.clone()
        }
    }

    /// Searches for and loads configuration files from the search paths.
    ///
    /// Tries a profile-specific variant first (e.g. `anvil.production.toml`),
    /// then the base file; stops at the first base file found.
    #[cfg_attr(not(feature = "toml-config"), allow(unused_mut))]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        #[cfg(feature = "toml-config")]
        {
            let search_paths = self.resolve_search_paths();
            for search_path in &search_paths {
                for base_name in ["anvil.toml", "config.toml"] {
                    let (stem, ext) = base_name.split_once('.').expect("base name has extension");

                    // Profile-specific: e.g. anvil.production.toml
                    let profile_name = format!("{}.{}.{}", stem, self.profile.as_str(), ext);
                    let profile_path = search_path.join(&profile_name);
                    if profile_path.exists() {
                        debug!(path = %profile_path.display(), "Loading profile-specific config");
                        figment = figment.merge(Toml::file(&profile_path));
                    }

                    let base_path = search_path.join(base_name);
                    if base_path.exists() {
                        info!(path = %base_path.display(), "Loading configuration file");
                        return figment.merge(Toml::file(&base_path));
                    }
                }
            }
        }

        warn!("No configuration file found, using defaults");
        figment
    }
}

/// Loads configuration from default locations.
pub fn load_config() -> ConfigResult<AnvilConfig> {
    ConfigLoader::new().with_current_dir().load()
}

/// Loads configuration from a specific file.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<AnvilConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================
