//! Configuration loading.
//!
//! Builds a [`DeployConfig`] from an explicit environment bag, an optional
//! `.env` file and an optional `stackup.yaml` settings file. The `.env` file
//! is read without touching the process environment; values already present
//! in the bag win over values from the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result, StackupError};

use super::spec::{DeployConfig, REQUIRED_ENV_VARS, Secret, Secrets, StackSettings, Stage};

/// Default settings file names to search for.
pub const DEFAULT_SETTINGS_FILES: &[&str] = &["stackup.yaml", "stackup.yml"];

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env` and settings files.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Loads stack settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load_settings_file(&self, path: impl AsRef<Path>) -> Result<StackSettings> {
        let path = self.resolve(path.as_ref());
        info!("Loading settings from: {}", path.display());

        if !path.exists() {
            return Err(StackupError::Config(ConfigError::FileNotFound { path }));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            StackupError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        Self::parse_settings_yaml(&content, Some(&path))
    }

    /// Parses stack settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_settings_yaml(content: &str, source: Option<&Path>) -> Result<StackSettings> {
        debug!("Parsing YAML settings");

        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(StackSettings::default());
        }

        serde_yaml::from_str(content).map_err(|e| {
            StackupError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })
    }

    /// Reads a `.env` file into a map without modifying the process
    /// environment. A missing file yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn read_dotenv(&self, path: Option<&Path>) -> Result<HashMap<String, String>> {
        let env_path = path.map_or_else(
            || self.resolve(Path::new(".env")),
            |p| self.resolve(p),
        );

        if !env_path.exists() {
            debug!(".env file not found at: {}", env_path.display());
            return Ok(HashMap::new());
        }

        info!("Loading environment from: {}", env_path.display());
        let parse_error = |e: dotenvy::Error| {
            StackupError::Config(ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })
        };

        let mut values = HashMap::new();
        for item in dotenvy::from_path_iter(&env_path).map_err(parse_error)? {
            let (key, value) = item.map_err(parse_error)?;
            values.insert(key, value);
        }
        Ok(values)
    }

    /// Builds the run configuration.
    ///
    /// All required variables are checked before anything else so that the
    /// operator sees every missing name at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingConfiguration`] listing every absent
    /// variable, or [`ConfigError::InvalidStage`] for a bad stage name.
    pub fn build(
        &self,
        stage: &str,
        env: &HashMap<String, String>,
        settings: StackSettings,
    ) -> Result<DeployConfig> {
        let missing = missing_required(env);
        if !missing.is_empty() {
            return Err(StackupError::Config(ConfigError::MissingConfiguration {
                names: missing,
            }));
        }

        let stage = Stage::new(stage)?;
        let value = |key: &str| env.get(key).cloned().unwrap_or_default();

        let secrets = Secrets {
            hcloud_token: Secret::new(value("HCLOUD_TOKEN")),
            domain_name: value("DOMAIN_NAME"),
            cloudflare_api_token: Secret::new(value("CLOUDFLARE_API_TOKEN")),
            cloudflare_zone_token: Secret::new(value("CLOUDFLARE_ZONE_TOKEN")),
            cloudflare_account_id: value("CLOUDFLARE_DEFAULT_ACCOUNT_ID"),
            cloudflare_zone_id: value("CLOUDFLARE_ZONE_ID"),
        };

        debug!("Built configuration for stage {stage}");
        Ok(DeployConfig {
            stage,
            secrets,
            settings,
        })
    }
}

/// Merges the process environment over values read from a `.env` file.
#[must_use]
pub fn environment_bag(
    process: impl IntoIterator<Item = (String, String)>,
    dotenv: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut bag = dotenv;
    bag.extend(process);
    bag
}

/// Returns the required variable names that are absent or empty, in
/// declaration order.
#[must_use]
pub fn missing_required(env: &HashMap<String, String>) -> Vec<String> {
    REQUIRED_ENV_VARS
        .iter()
        .filter(|key| env.get(**key).is_none_or(|v| v.trim().is_empty()))
        .map(|key| (*key).to_string())
        .collect()
}

/// Looks for a settings file in `start_dir` and its parents.
#[must_use]
pub fn find_settings_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref().to_path_buf();

    loop {
        for filename in DEFAULT_SETTINGS_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found settings file: {}", candidate.display());
                return Some(candidate);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}
