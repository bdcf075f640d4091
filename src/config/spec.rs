//! Run configuration types.
//!
//! A [`DeployConfig`] is built exactly once per run from the environment bag
//! and the optional `stackup.yaml` settings file, then passed by reference to
//! every component. Nothing below `main` reads process state directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Environment variables that must be present (and non-empty) for any run.
pub const REQUIRED_ENV_VARS: &[&str] = &[
    "HCLOUD_TOKEN",
    "DOMAIN_NAME",
    "CLOUDFLARE_API_TOKEN",
    "CLOUDFLARE_ZONE_TOKEN",
    "CLOUDFLARE_DEFAULT_ACCOUNT_ID",
    "CLOUDFLARE_ZONE_ID",
];

/// Stage whose resources are retained and which owns the bare domain.
pub const PRODUCTION_STAGE: &str = "production";

/// Shared development stage.
pub const DEV_STAGE: &str = "dev";

/// The complete configuration of one deployment run.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Deployment stage chosen for this run.
    pub stage: Stage,
    /// Credentials and account identifiers.
    pub secrets: Secrets,
    /// Non-secret stack settings.
    pub settings: StackSettings,
}

/// A named deployment environment (e.g. `production`, `dev`, `pr-42`).
///
/// Stage names end up inside DNS names, so they must be valid DNS labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Stage(String);

/// What should happen to a stage's resources when it is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Keep resources when the stage is removed.
    Retain,
    /// Delete resources when the stage is removed.
    Remove,
}

/// A secret value that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

/// Credentials and identifiers read from the environment.
#[derive(Debug, Clone)]
pub struct Secrets {
    /// Hetzner Cloud API token.
    pub hcloud_token: Secret,
    /// Base domain name (e.g. `example.com`).
    pub domain_name: String,
    /// Cloudflare API token used for DNS records and the ACME DNS challenge.
    pub cloudflare_api_token: Secret,
    /// Cloudflare zone token used by the ACME DNS challenge.
    pub cloudflare_zone_token: Secret,
    /// Cloudflare account id.
    pub cloudflare_account_id: String,
    /// Cloudflare zone id of the base domain.
    pub cloudflare_zone_id: String,
}

/// Non-secret settings, loaded from `stackup.yaml` when present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StackSettings {
    /// Project name, used as a prefix for cloud resource names.
    pub project: String,
    /// Virtual server settings.
    pub server: ServerSettings,
    /// Remote shell settings.
    pub ssh: SshSettings,
    /// Application container settings.
    pub app: AppSettings,
    /// Reverse proxy container settings.
    pub proxy: ProxySettings,
    /// DNS record settings.
    pub dns: DnsSettings,
    /// Scheduler settings.
    pub orchestrator: OrchestratorSettings,
}

/// Virtual server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    /// Server type (e.g. `cax11`).
    pub server_type: String,
    /// OS image (e.g. `debian-12`).
    pub image: String,
    /// Optional location (e.g. `fsn1`).
    pub location: Option<String>,
    /// Inbound TCP ports opened by the firewall.
    pub firewall_ports: Vec<u16>,
    /// Maximum time to wait for the server to report `running`.
    pub ready_timeout_secs: u64,
    /// Interval between server status polls.
    pub poll_interval_secs: u64,
}

/// Remote shell settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshSettings {
    /// Login user on the server.
    pub user: String,
    /// SSH port.
    pub port: u16,
    /// Local path of the generated private key.
    pub key_path: PathBuf,
    /// Connection attempts before a host is declared unreachable.
    pub connect_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff_secs: u64,
    /// Upper bound for the delay between attempts.
    pub max_backoff_secs: u64,
    /// Per-attempt TCP connect timeout.
    pub connect_timeout_secs: u64,
}

/// Application container settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppSettings {
    /// Image tag built on the server.
    pub image_name: String,
    /// Local build context directory.
    pub context: PathBuf,
    /// Dockerfile path; defaults to `<context>/Dockerfile`.
    pub dockerfile: Option<PathBuf>,
    /// Target build platform.
    pub platform: String,
    /// Container name, also its address on the private network.
    pub container_name: String,
    /// Port the application listens on.
    pub port: u16,
    /// Private container network name.
    pub network: String,
    /// Volume holding the build output.
    pub volume: String,
    /// Mount point of the volume inside the container.
    pub volume_path: String,
}

/// Reverse proxy container settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxySettings {
    /// Image tag built on the server.
    pub image_name: String,
    /// Local build context directory.
    pub context: PathBuf,
    /// Dockerfile path; defaults to `<context>/Dockerfile`.
    pub dockerfile: Option<PathBuf>,
    /// Container name.
    pub container_name: String,
    /// Remote path of the rendered proxy configuration.
    pub config_path: String,
    /// Volume for certificates and proxy data.
    pub data_volume: String,
    /// Volume for proxy runtime configuration.
    pub config_volume: String,
    /// Ports published on the host (`host:container` with the same number).
    pub ports: Vec<u16>,
}

/// DNS record settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DnsSettings {
    /// Whether the record is proxied through Cloudflare.
    pub proxied: bool,
    /// Record TTL (`1` means automatic).
    pub ttl: u32,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Maximum number of resources executing at once.
    pub max_parallel: usize,
}

impl Stage {
    /// Creates a stage after checking that it is a valid DNS label.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidStage`] if the name is empty, longer
    /// than 63 characters, contains anything but lowercase alphanumerics and
    /// hyphens, or starts/ends with a hyphen.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let invalid = |reason: &str| ConfigError::InvalidStage {
            stage: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("stage name cannot be empty"));
        }
        if name.len() > 63 {
            return Err(invalid("stage name must be at most 63 characters"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid(
                "only lowercase letters, digits and hyphens are allowed",
            ));
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(invalid("stage name cannot start or end with a hyphen"));
        }

        Ok(Self(name))
    }

    /// Returns the stage name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the production stage.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.0 == PRODUCTION_STAGE
    }

    /// Returns the removal policy of this stage.
    #[must_use]
    pub fn removal_policy(&self) -> RemovalPolicy {
        if self.is_production() {
            RemovalPolicy::Retain
        } else {
            RemovalPolicy::Remove
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => f.write_str("retain"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

impl Secret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value. Only call this at the point of use.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl DeployConfig {
    /// Returns the name prefix for cloud resources of this run.
    #[must_use]
    pub fn resource_prefix(&self) -> String {
        format!("{}-{}", self.settings.project, self.stage)
    }
}

impl AppSettings {
    /// Returns the effective Dockerfile path.
    #[must_use]
    pub fn dockerfile_path(&self) -> PathBuf {
        self.dockerfile
            .clone()
            .unwrap_or_else(|| self.context.join("Dockerfile"))
    }
}

impl ProxySettings {
    /// Returns the effective Dockerfile path.
    #[must_use]
    pub fn dockerfile_path(&self) -> PathBuf {
        self.dockerfile
            .clone()
            .unwrap_or_else(|| self.context.join("Dockerfile"))
    }
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            project: String::from("nuxt-hetzner"),
            server: ServerSettings::default(),
            ssh: SshSettings::default(),
            app: AppSettings::default(),
            proxy: ProxySettings::default(),
            dns: DnsSettings::default(),
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            server_type: String::from("cax11"),
            image: String::from("debian-12"),
            location: None,
            firewall_ports: vec![22, 443],
            ready_timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: String::from("root"),
            port: 22,
            key_path: PathBuf::from("deploy_key"),
            connect_attempts: 10,
            initial_backoff_secs: 2,
            max_backoff_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            image_name: String::from("nuxt-hetzner/nuxt"),
            context: PathBuf::from("./nuxt"),
            dockerfile: None,
            platform: String::from("linux/arm64"),
            container_name: String::from("nuxt_app_container"),
            port: 3000,
            network: String::from("nuxt_app_network_private"),
            volume: String::from("nuxt_app_volume"),
            volume_path: String::from("/usr/src/app/.output"),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            image_name: String::from("nuxt-hetzner/caddy"),
            context: PathBuf::from("./caddy"),
            dockerfile: None,
            container_name: String::from("caddy_container"),
            config_path: String::from("/root/Caddyfile"),
            data_volume: String::from("caddy_data_volume"),
            config_volume: String::from("caddy_config_volume"),
            ports: vec![80, 443, 2019, 8080],
        }
    }
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            proxied: true,
            ttl: 1,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { max_parallel: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_accepts_dns_labels() {
        for name in ["production", "dev", "pr-42", "feature-x1"] {
            assert!(Stage::new(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn test_stage_rejects_invalid_names() {
        for name in ["", "Prod", "pr_42", "-dev", "dev-", "a.b"] {
            assert!(Stage::new(name).is_err(), "{name:?} should be rejected");
        }
        assert!(Stage::new("a".repeat(64)).is_err());
    }

    #[test]
    fn test_removal_policy_follows_stage() {
        let production = Stage::new("production").unwrap();
        let preview = Stage::new("pr-7").unwrap();
        assert_eq!(production.removal_policy(), RemovalPolicy::Retain);
        assert_eq!(preview.removal_policy(), RemovalPolicy::Remove);
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("super-secret-token");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "super-secret-token");
    }

    #[test]
    fn test_dockerfile_defaults_to_context() {
        let app = AppSettings::default();
        assert_eq!(app.dockerfile_path(), PathBuf::from("./nuxt/Dockerfile"));
    }
}
