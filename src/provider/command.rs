//! Remote shell commands and rendered configuration files.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::remote::RemoteExecutor;
use crate::render::{DnsChallenge, ProxyRoute, render_caddyfile};
use crate::resource::{Outputs, ResourceKind};

use super::{ProviderAdapter, ResourceContext};

/// Runs one command on the remote host; a non-zero exit fails the resource.
///
/// Idle-poll commands such as
/// `until systemctl is-active --quiet docker; do sleep 5; done` simply block
/// until the condition holds.
#[derive(Debug, Clone)]
pub struct RemoteCommandAdapter {
    executor: Arc<RemoteExecutor>,
}

impl RemoteCommandAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(executor: Arc<RemoteExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ProviderAdapter for RemoteCommandAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RemoteCommand
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let command: String = ctx.input("command")?;
        let connection = ctx.connection()?;

        info!("Running '{command}' on {connection}");
        let output = self.executor.execute_checked(connection, &command).await?;

        Ok(Outputs::new()
            .with("stdout", output.stdout.trim().to_string())
            .with("exit_code", output.exit_code))
    }
}

#[derive(Debug, Deserialize)]
struct ProxyConfigInputs {
    path: String,
    domain: String,
    upstream_host: String,
    upstream_port: u16,
    #[serde(default)]
    zone_token_env: Option<String>,
    #[serde(default)]
    api_token_env: Option<String>,
}

/// Renders the reverse proxy configuration and uploads it.
#[derive(Debug, Clone)]
pub struct ProxyConfigAdapter {
    executor: Arc<RemoteExecutor>,
}

impl ProxyConfigAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(executor: Arc<RemoteExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ProviderAdapter for ProxyConfigAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ProxyConfig
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let inputs: ProxyConfigInputs = ctx.inputs_as()?;
        let connection = ctx.connection()?;

        let defaults = DnsChallenge::default();
        let tls = DnsChallenge {
            zone_token_env: inputs.zone_token_env.unwrap_or(defaults.zone_token_env),
            api_token_env: inputs.api_token_env.unwrap_or(defaults.api_token_env),
        };
        let routes = [ProxyRoute {
            domain: inputs.domain.clone(),
            upstream_host: inputs.upstream_host,
            upstream_port: inputs.upstream_port,
        }];
        let document = render_caddyfile(&routes, &tls);

        info!("Writing proxy configuration for {} to {connection}:{}", inputs.domain, inputs.path);
        self.executor
            .upload(connection, &inputs.path, document.as_bytes(), 0o644)
            .await?;

        Ok(Outputs::new()
            .with("path", inputs.path)
            .with("domain", inputs.domain)
            .with("sha256", hex::encode(Sha256::digest(document.as_bytes()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::{RecordingTransport, connection, executor};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    fn inputs(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_remote_command_failure_is_an_error() {
        let transport = Arc::new(RecordingTransport::new().respond("systemctl", 3, ""));
        let adapter = RemoteCommandAdapter::new(executor(transport.clone()));
        let conn = connection();
        let inputs = inputs(json!({ "command": "until systemctl is-active --quiet docker; do sleep 5; done" }));
        let ctx = ResourceContext::new("docker-ready", &inputs, Some(&conn));

        assert!(adapter.create(&ctx).await.is_err());
        assert_eq!(transport.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_command_requires_connection() {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = RemoteCommandAdapter::new(executor(transport.clone()));
        let inputs = inputs(json!({ "command": "true" }));
        let ctx = ResourceContext::new("docker-ready", &inputs, None);

        assert!(adapter.create(&ctx).await.is_err());
        assert!(transport.commands().is_empty());
    }

    #[tokio::test]
    async fn test_proxy_config_is_uploaded_over_stdin() {
        let transport = Arc::new(RecordingTransport::new());
        let adapter = ProxyConfigAdapter::new(executor(transport.clone()));
        let conn = connection();
        let inputs = inputs(json!({
            "path": "/root/Caddyfile",
            "domain": "dev.example.com",
            "upstream_host": "nuxt_app_container",
            "upstream_port": 3000
        }));
        let ctx = ResourceContext::new("proxy-config", &inputs, Some(&conn));

        let outputs = adapter.create(&ctx).await.unwrap();
        assert_eq!(outputs.get_str("path"), Some("/root/Caddyfile"));

        let commands = transport.commands();
        assert_eq!(commands.len(), 1);
        assert!(!commands[0].contains("reverse_proxy"));

        let uploaded = String::from_utf8(transport.stdin_of("cat >").unwrap()).unwrap();
        assert!(uploaded.starts_with(":80, :443 {"));
        assert!(uploaded.contains("https://dev.example.com {"));
        assert!(uploaded.contains("reverse_proxy nuxt_app_container:3000"));
    }
}
