//! Hetzner Cloud resource adapters.
//!
//! Every adapter looks its object up by name before creating it, so a rerun
//! adopts what an earlier run left behind instead of failing on a name
//! conflict.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{ProviderError, Result};
use crate::provider::{ProviderAdapter, ResourceContext};
use crate::resource::{Outputs, ResourceKind};

use super::client::HcloudClient;
use super::types::{
    CreateFirewallRequest, CreateServerRequest, CreateSshKeyRequest, FirewallRule, Server,
    ServerStatus,
};

const PROVIDER: &str = "hcloud";

#[derive(Debug, Deserialize)]
struct SshKeyInputs {
    name: String,
    public_key: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FirewallInputs {
    name: String,
    rules: Vec<FirewallRule>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ServerInputs {
    name: String,
    server_type: String,
    image: String,
    #[serde(default)]
    location: Option<String>,
    ssh_key_id: u64,
    #[serde(default)]
    user_data: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentInputs {
    firewall_id: u64,
    server_id: u64,
}

/// Registers the deployment's public key.
#[derive(Debug, Clone)]
pub struct SshKeyAdapter {
    client: Arc<HcloudClient>,
}

impl SshKeyAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(client: Arc<HcloudClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for SshKeyAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SshKey
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let inputs: SshKeyInputs = ctx.inputs_as()?;

        let key = match self.client.find_ssh_key(&inputs.name).await? {
            Some(existing) if same_key(&existing.public_key, &inputs.public_key) => {
                debug!("Adopting existing SSH key {} ({})", existing.name, existing.id);
                existing
            }
            Some(existing) => {
                return Err(ProviderError::invalid_input(
                    ctx.id,
                    format!(
                        "SSH key name '{}' is already registered with a different key",
                        existing.name
                    ),
                )
                .into());
            }
            None => {
                self.client
                    .create_ssh_key(&CreateSshKeyRequest {
                        name: inputs.name,
                        public_key: inputs.public_key,
                        labels: inputs.labels,
                    })
                    .await?
            }
        };

        Ok(Outputs::new()
            .with("id", key.id)
            .with("name", key.name)
            .with("fingerprint", key.fingerprint))
    }
}

/// Compares key type and material, ignoring the comment.
fn same_key(a: &str, b: &str) -> bool {
    key_material(a) == key_material(b)
}

fn key_material(key: &str) -> Vec<&str> {
    key.split_whitespace().take(2).collect()
}

/// Creates the server firewall.
#[derive(Debug, Clone)]
pub struct FirewallAdapter {
    client: Arc<HcloudClient>,
}

impl FirewallAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(client: Arc<HcloudClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for FirewallAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Firewall
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let inputs: FirewallInputs = ctx.inputs_as()?;

        let firewall = match self.client.find_firewall(&inputs.name).await? {
            Some(existing) => {
                if existing.rules != inputs.rules {
                    info!("Updating rules of firewall {}", existing.name);
                    self.client
                        .set_firewall_rules(existing.id, &inputs.rules)
                        .await?;
                }
                existing
            }
            None => {
                self.client
                    .create_firewall(&CreateFirewallRequest {
                        name: inputs.name,
                        rules: inputs.rules,
                        labels: inputs.labels,
                    })
                    .await?
            }
        };

        Ok(Outputs::new()
            .with("id", firewall.id)
            .with("name", firewall.name))
    }
}

/// Creates the virtual server and waits until it runs.
#[derive(Debug, Clone)]
pub struct ServerAdapter {
    client: Arc<HcloudClient>,
    ready_timeout: Duration,
    poll_interval: Duration,
}

impl ServerAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(client: Arc<HcloudClient>, ready_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            client,
            ready_timeout,
            poll_interval,
        }
    }
}

fn server_outputs(server: &Server) -> std::result::Result<Outputs, ProviderError> {
    let ipv4 = server
        .ipv4_address()
        .ok_or_else(|| ProviderError::InvalidResponse {
            provider: PROVIDER,
            message: format!("server {} has no public IPv4 address", server.name),
        })?;

    Ok(Outputs::new()
        .with("id", server.id)
        .with("name", server.name.clone())
        .with("ipv4_address", ipv4)
        .with("status", server.status.to_string()))
}

#[async_trait]
impl ProviderAdapter for ServerAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Server
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let inputs: ServerInputs = ctx.inputs_as()?;

        let server = if let Some(existing) = self.client.find_server(&inputs.name).await? {
            debug!("Adopting existing server {} ({})", existing.name, existing.id);
            existing
        } else {
            info!("Creating server {} ({}, {})", inputs.name, inputs.server_type, inputs.image);
            self.client
                .create_server(&CreateServerRequest {
                    name: inputs.name,
                    server_type: inputs.server_type,
                    image: inputs.image,
                    location: inputs.location,
                    ssh_keys: vec![inputs.ssh_key_id],
                    user_data: inputs.user_data,
                    labels: inputs.labels,
                    start_after_create: true,
                })
                .await?
        };

        Ok(server_outputs(&server)?)
    }

    async fn await_ready(&self, ctx: &ResourceContext<'_>, outputs: &Outputs) -> Result<()> {
        let id = outputs
            .get("id")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ProviderError::MissingOutput {
                resource: ctx.id.to_string(),
                output: String::from("id"),
            })?;

        let start = Instant::now();
        loop {
            let server = self.client.get_server(id).await?;
            if server.status == ServerStatus::Running {
                info!("Server {} is running", server.name);
                return Ok(());
            }

            if start.elapsed() >= self.ready_timeout {
                return Err(ProviderError::NotReady {
                    resource: ctx.id.to_string(),
                    message: format!(
                        "status still '{}' after {}s",
                        server.status,
                        self.ready_timeout.as_secs()
                    ),
                }
                .into());
            }

            debug!("Server {} is {}, waiting", server.name, server.status);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Applies the firewall to the server.
#[derive(Debug, Clone)]
pub struct FirewallAttachmentAdapter {
    client: Arc<HcloudClient>,
}

impl FirewallAttachmentAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(client: Arc<HcloudClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for FirewallAttachmentAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::FirewallAttachment
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let inputs: AttachmentInputs = ctx.inputs_as()?;
        self.client
            .apply_firewall_to_server(inputs.firewall_id, inputs.server_id)
            .await?;

        Ok(Outputs::new()
            .with("firewall_id", inputs.firewall_id)
            .with("server_id", inputs.server_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::provider::ApiClient;
    use serde_json::{Value, json};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Arc<HcloudClient> {
        let api = ApiClient::new("hcloud", server.uri(), Secret::new("token"))
            .unwrap()
            .with_retry_delay(Duration::ZERO);
        Arc::new(HcloudClient::from_api(api))
    }

    fn inputs(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn server_json(status: &str) -> Value {
        json!({
            "id": 42,
            "name": "shop-dev-server",
            "status": status,
            "public_net": { "ipv4": { "ip": "203.0.113.7" }, "ipv6": { "ip": "2001:db8::/64" } }
        })
    }

    #[tokio::test]
    async fn test_ssh_key_created_when_absent() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ssh_keys"))
            .and(query_param("name", "shop-dev"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ssh_keys": [] })))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/ssh_keys"))
            .and(body_partial_json(json!({ "name": "shop-dev", "public_key": "ssh-ed25519 AAAA deploy" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "ssh_key": { "id": 7, "name": "shop-dev", "fingerprint": "aa:bb", "public_key": "ssh-ed25519 AAAA deploy" }
            })))
            .expect(1)
            .mount(&mock)
            .await;

        let inputs = inputs(json!({ "name": "shop-dev", "public_key": "ssh-ed25519 AAAA deploy" }));
        let ctx = ResourceContext::new("ssh-key-remote", &inputs, None);
        let outputs = SshKeyAdapter::new(client(&mock)).create(&ctx).await.unwrap();

        assert_eq!(outputs.get("id"), Some(&json!(7)));
        assert_eq!(outputs.get_str("fingerprint"), Some("aa:bb"));
    }

    #[tokio::test]
    async fn test_ssh_key_adopted_when_same_material() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ssh_keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ssh_keys": [{ "id": 7, "name": "shop-dev", "fingerprint": "aa:bb", "public_key": "ssh-ed25519 AAAA old-comment" }]
            })))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock)
            .await;

        let inputs = inputs(json!({ "name": "shop-dev", "public_key": "ssh-ed25519 AAAA deploy" }));
        let ctx = ResourceContext::new("ssh-key-remote", &inputs, None);
        let outputs = SshKeyAdapter::new(client(&mock)).create(&ctx).await.unwrap();
        assert_eq!(outputs.get("id"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_ssh_key_name_conflict_fails() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ssh_keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ssh_keys": [{ "id": 7, "name": "shop-dev", "public_key": "ssh-ed25519 BBBB other" }]
            })))
            .mount(&mock)
            .await;

        let inputs = inputs(json!({ "name": "shop-dev", "public_key": "ssh-ed25519 AAAA deploy" }));
        let ctx = ResourceContext::new("ssh-key-remote", &inputs, None);
        assert!(SshKeyAdapter::new(client(&mock)).create(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_server_created_and_polled_until_running() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "servers": [] })))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .and(body_partial_json(json!({ "name": "shop-dev-server", "ssh_keys": [7], "start_after_create": true })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "server": server_json("initializing"),
                "action": {},
                "root_password": null
            })))
            .expect(1)
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/servers/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "server": server_json("starting") })))
            .up_to_n_times(2)
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/servers/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "server": server_json("running") })))
            .mount(&mock)
            .await;

        let inputs = inputs(json!({
            "name": "shop-dev-server",
            "server_type": "cax11",
            "image": "debian-12",
            "ssh_key_id": 7,
            "user_data": "#!/bin/bash\n"
        }));
        let ctx = ResourceContext::new("server", &inputs, None);
        let adapter = ServerAdapter::new(client(&mock), Duration::from_secs(30), Duration::ZERO);

        let outputs = adapter.create(&ctx).await.unwrap();
        assert_eq!(outputs.get_str("ipv4_address"), Some("203.0.113.7"));
        assert_eq!(outputs.get("id"), Some(&json!(42)));

        adapter.await_ready(&ctx, &outputs).await.expect("becomes running");
    }

    #[tokio::test]
    async fn test_server_not_ready_after_timeout() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "server": server_json("off") })))
            .mount(&mock)
            .await;

        let inputs = BTreeMap::new();
        let ctx = ResourceContext::new("server", &inputs, None);
        let adapter = ServerAdapter::new(client(&mock), Duration::ZERO, Duration::from_millis(5));
        let outputs = Outputs::new().with("id", 42);

        let err = adapter.await_ready(&ctx, &outputs).await.expect_err("never running");
        assert!(err.to_string().contains("did not become ready"));
    }

    #[tokio::test]
    async fn test_firewall_rules_updated_on_adopt() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/firewalls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "firewalls": [{ "id": 3, "name": "shop-dev-firewall", "rules": [] }]
            })))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/firewalls/3/actions/set_rules"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "actions": [] })))
            .expect(1)
            .mount(&mock)
            .await;

        let inputs = inputs(json!({
            "name": "shop-dev-firewall",
            "rules": [{ "direction": "in", "protocol": "tcp", "port": "22", "source_ips": ["0.0.0.0/0", "::/0"] }]
        }));
        let ctx = ResourceContext::new("firewall", &inputs, None);
        let outputs = FirewallAdapter::new(client(&mock)).create(&ctx).await.unwrap();
        assert_eq!(outputs.get("id"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_attachment_already_applied_is_success() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/firewalls/3/actions/apply_to_resources"))
            .and(body_partial_json(json!({ "apply_to": [{ "type": "server", "server": { "id": 42 } }] })))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": { "code": "firewall_already_applied", "message": "firewall already applied" }
            })))
            .expect(1)
            .mount(&mock)
            .await;

        let inputs = inputs(json!({ "firewall_id": 3, "server_id": 42 }));
        let ctx = ResourceContext::new("firewall-attachment", &inputs, None);
        let outputs = FirewallAttachmentAdapter::new(client(&mock))
            .create(&ctx)
            .await
            .expect("already applied is fine");
        assert_eq!(outputs.get("server_id"), Some(&json!(42)));
    }

    #[test]
    fn test_same_key_ignores_comment() {
        assert!(same_key("ssh-ed25519 AAAA a@b", "ssh-ed25519 AAAA"));
        assert!(!same_key("ssh-ed25519 AAAA", "ssh-ed25519 BBBB"));
    }
}
