//! Configuration validation.
//!
//! Names from the settings file end up in docker command lines and cloud
//! resource names, so they are restricted to conservative character sets
//! before any descriptor is built.

use std::collections::HashSet;
use tracing::debug;

use crate::error::{ConfigError, Result, StackupError};

use super::spec::DeployConfig;

/// Validator for run configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all problems found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a run configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_server(config, &mut result);
        Self::validate_ssh(config, &mut result);
        Self::validate_containers(config, &mut result);
        Self::validate_orchestrator(config, &mut result);

        if let Some(first_error) = result.errors.first() {
            return Err(StackupError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    fn validate_project(config: &DeployConfig, result: &mut ValidationResult) {
        if !is_valid_name(&config.settings.project) {
            result.error(
                "project",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.settings.project
                ),
            );
        }

        let domain = &config.secrets.domain_name;
        if domain.contains(char::is_whitespace)
            || domain.starts_with('.')
            || domain.ends_with('.')
            || !domain.contains('.')
        {
            result.error(
                "DOMAIN_NAME",
                format!("'{domain}' is not a valid domain name"),
            );
        }
    }

    fn validate_server(config: &DeployConfig, result: &mut ValidationResult) {
        let server = &config.settings.server;

        if server.server_type.trim().is_empty() {
            result.error("server.server_type", "Server type cannot be empty");
        }
        if server.image.trim().is_empty() {
            result.error("server.image", "Server image cannot be empty");
        }
        if server.firewall_ports.contains(&0) {
            result.error("server.firewall_ports", "Port 0 cannot be opened");
        }
        if !server.firewall_ports.contains(&config.settings.ssh.port) {
            result.warnings.push(format!(
                "Firewall does not open the SSH port {}; remote resources will be unreachable",
                config.settings.ssh.port
            ));
        }
        if server.poll_interval_secs == 0 {
            result.error("server.poll_interval_secs", "Poll interval must be at least 1 second");
        }
    }

    fn validate_ssh(config: &DeployConfig, result: &mut ValidationResult) {
        let ssh = &config.settings.ssh;

        if ssh.connect_attempts == 0 {
            result.error("ssh.connect_attempts", "At least one connection attempt is required");
        }
        if ssh.initial_backoff_secs > ssh.max_backoff_secs {
            result.error(
                "ssh.initial_backoff_secs",
                format!(
                    "Initial backoff ({}s) exceeds maximum backoff ({}s)",
                    ssh.initial_backoff_secs, ssh.max_backoff_secs
                ),
            );
        }
        if !is_valid_unix_user(&ssh.user) {
            result.error("ssh.user", format!("'{}' is not a valid user name", ssh.user));
        }
        if ssh.key_path.as_os_str().is_empty() {
            result.error("ssh.key_path", "Key path cannot be empty");
        }
    }

    fn validate_containers(config: &DeployConfig, result: &mut ValidationResult) {
        let app = &config.settings.app;
        let proxy = &config.settings.proxy;

        let names = [
            ("app.container_name", &app.container_name),
            ("app.network", &app.network),
            ("app.volume", &app.volume),
            ("proxy.container_name", &proxy.container_name),
            ("proxy.data_volume", &proxy.data_volume),
            ("proxy.config_volume", &proxy.config_volume),
        ];
        let mut seen = HashSet::new();
        for (field, name) in names {
            if !is_valid_docker_name(name) {
                result.error(field, format!("'{name}' is not a valid docker object name"));
            }
            if field.ends_with("container_name") && !seen.insert(name.as_str()) {
                result.error(field, format!("Container name '{name}' is used twice"));
            }
        }

        for (field, image) in [("app.image_name", &app.image_name), ("proxy.image_name", &proxy.image_name)] {
            if !is_valid_image_name(image) {
                result.error(field, format!("'{image}' is not a valid image name"));
            }
        }

        if app.port == 0 {
            result.error("app.port", "Application port cannot be 0");
        }
        if proxy.ports.contains(&0) {
            result.error("proxy.ports", "Port 0 cannot be published");
        }
        if proxy.ports.contains(&2019) {
            result.warnings.push(String::from(
                "Proxy publishes the admin API port 2019 on the host",
            ));
        }

        for (field, path) in [
            ("app.volume_path", &app.volume_path),
            ("proxy.config_path", &proxy.config_path),
        ] {
            if !path.starts_with('/') {
                result.error(field, format!("'{path}' must be an absolute path"));
            }
        }
    }

    fn validate_orchestrator(config: &DeployConfig, result: &mut ValidationResult) {
        let max_parallel = config.settings.orchestrator.max_parallel;
        if max_parallel == 0 {
            result.error("orchestrator.max_parallel", "max_parallel must be at least 1");
        } else if max_parallel > 1 {
            result.warnings.push(format!(
                "max_parallel = {max_parallel}: log lines of independent resources will interleave"
            ));
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a lowercase alphanumeric name with inner hyphens.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Docker object names: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
pub(crate) fn is_valid_docker_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Image references: lowercase path components, optional registry port and tag.
fn is_valid_image_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(['/', ':', '.', '-'])
        && name.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '/' | ':' | '.' | '-' | '_')
        })
}

fn is_valid_unix_user(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
}
