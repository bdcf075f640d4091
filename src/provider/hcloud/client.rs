//! Hetzner Cloud API client.

use serde::de::IgnoredAny;
use serde_json::json;
use tracing::debug;

use crate::config::Secret;
use crate::error::{ProviderError, Result, StackupError};
use crate::provider::ApiClient;

use super::types::{
    CreateFirewallRequest, CreateServerRequest, CreateSshKeyRequest, Firewall,
    FirewallEnvelope, FirewallList, FirewallRule, Server, ServerEnvelope, ServerList, SshKey,
    SshKeyEnvelope, SshKeyList,
};

/// Hetzner Cloud API base URL.
pub const HCLOUD_API_BASE: &str = "https://api.hetzner.cloud/v1";

/// Backend name used in errors.
const PROVIDER: &str = "hcloud";

/// Error code returned when a firewall is already applied to a resource.
const ALREADY_APPLIED: &str = "firewall_already_applied";

/// Hetzner Cloud API client.
#[derive(Debug, Clone)]
pub struct HcloudClient {
    api: ApiClient,
}

impl HcloudClient {
    /// Creates a client for the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: Secret) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(PROVIDER, HCLOUD_API_BASE, token)?,
        })
    }

    /// Wraps a preconfigured API client.
    #[must_use]
    pub const fn from_api(api: ApiClient) -> Self {
        Self { api }
    }

    /// Finds an SSH key by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn find_ssh_key(&self, name: &str) -> Result<Option<SshKey>> {
        let list: SshKeyList = self.api.get("/ssh_keys", &[("name", name)]).await?;
        Ok(list.ssh_keys.into_iter().next())
    }

    /// Registers an SSH key.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn create_ssh_key(&self, request: &CreateSshKeyRequest) -> Result<SshKey> {
        debug!("Creating SSH key {}", request.name);
        let envelope: SshKeyEnvelope = self.api.post("/ssh_keys", request).await?;
        Ok(envelope.ssh_key)
    }

    /// Finds a firewall by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn find_firewall(&self, name: &str) -> Result<Option<Firewall>> {
        let list: FirewallList = self.api.get("/firewalls", &[("name", name)]).await?;
        Ok(list.firewalls.into_iter().next())
    }

    /// Creates a firewall.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn create_firewall(&self, request: &CreateFirewallRequest) -> Result<Firewall> {
        debug!("Creating firewall {}", request.name);
        let envelope: FirewallEnvelope = self.api.post("/firewalls", request).await?;
        Ok(envelope.firewall)
    }

    /// Replaces the rules of a firewall.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn set_firewall_rules(&self, firewall_id: u64, rules: &[FirewallRule]) -> Result<()> {
        debug!("Replacing rules of firewall {firewall_id}");
        let _: IgnoredAny = self
            .api
            .post(
                &format!("/firewalls/{firewall_id}/actions/set_rules"),
                &json!({ "rules": rules }),
            )
            .await?;
        Ok(())
    }

    /// Applies a firewall to a server. Already applied counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn apply_firewall_to_server(&self, firewall_id: u64, server_id: u64) -> Result<()> {
        debug!("Applying firewall {firewall_id} to server {server_id}");
        let body = json!({
            "apply_to": [{ "type": "server", "server": { "id": server_id } }]
        });
        let result: Result<IgnoredAny> = self
            .api
            .post(&format!("/firewalls/{firewall_id}/actions/apply_to_resources"), &body)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(StackupError::Provider(ProviderError::Api { message, .. }))
                if message.starts_with(ALREADY_APPLIED) =>
            {
                debug!("Firewall {firewall_id} already applied to server {server_id}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Finds a server by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn find_server(&self, name: &str) -> Result<Option<Server>> {
        let list: ServerList = self.api.get("/servers", &[("name", name)]).await?;
        Ok(list.servers.into_iter().next())
    }

    /// Creates a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn create_server(&self, request: &CreateServerRequest) -> Result<Server> {
        debug!("Creating server {} ({})", request.name, request.server_type);
        let envelope: ServerEnvelope = self.api.post("/servers", request).await?;
        Ok(envelope.server)
    }

    /// Gets a server by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn get_server(&self, id: u64) -> Result<Server> {
        let envelope: ServerEnvelope = self.api.get(&format!("/servers/{id}"), &[]).await?;
        Ok(envelope.server)
    }
}
