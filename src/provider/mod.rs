//! Provider adapters.
//!
//! One adapter per [`ResourceKind`]. An adapter turns a descriptor's resolved
//! inputs into a real object and reports its outputs. Adapters do not know
//! about the graph: ordering, reference resolution and failure propagation
//! belong to the orchestrator.

pub mod cloudflare;
pub mod command;
pub mod docker;
pub mod hcloud;
mod http;
pub mod keypair;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DeployConfig;
use crate::error::{ProviderError, RemoteError, Result};
use crate::remote::{DEFAULT_PORT, DEFAULT_USER, RemoteConnection, RemoteExecutor};
use crate::resource::{Outputs, ResourceKind};

pub use http::ApiClient;

/// Everything an adapter may look at while creating one resource.
#[derive(Debug, Clone, Copy)]
pub struct ResourceContext<'a> {
    /// Resource id.
    pub id: &'a str,
    /// Inputs with every reference replaced by its value.
    pub inputs: &'a BTreeMap<String, Value>,
    /// Connection for remote-domain resources.
    pub connection: Option<&'a RemoteConnection>,
}

impl<'a> ResourceContext<'a> {
    /// Creates a context.
    #[must_use]
    pub const fn new(
        id: &'a str,
        inputs: &'a BTreeMap<String, Value>,
        connection: Option<&'a RemoteConnection>,
    ) -> Self {
        Self {
            id,
            inputs,
            connection,
        }
    }

    /// Deserializes a required input.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidInput`] if the input is absent or has
    /// the wrong shape.
    pub fn input<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.optional_input(name)?.ok_or_else(|| {
            ProviderError::invalid_input(self.id, format!("missing input '{name}'")).into()
        })
    }

    /// Deserializes an optional input; `null` counts as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidInput`] if the input has the wrong shape.
    pub fn optional_input<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.inputs.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                ProviderError::invalid_input(self.id, format!("input '{name}': {e}")).into()
            }),
        }
    }

    /// Deserializes all inputs into one struct. Unknown inputs are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidInput`] if the inputs do not match.
    pub fn inputs_as<T: DeserializeOwned>(&self) -> Result<T> {
        let map: serde_json::Map<String, Value> = self
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(map))
            .map_err(|e| ProviderError::invalid_input(self.id, e.to_string()).into())
    }

    /// Returns the remote connection.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConnection`] for a local-domain context.
    pub fn connection(&self) -> Result<&'a RemoteConnection> {
        self.connection.ok_or_else(|| {
            RemoteError::InvalidConnection {
                resource: self.id.to_string(),
                message: String::from("resource has no remote connection"),
            }
            .into()
        })
    }
}

/// Creates one kind of resource.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The kind this adapter handles.
    fn kind(&self) -> ResourceKind;

    /// Creates the resource, or adopts an identical existing one, and
    /// returns its outputs.
    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs>;

    /// Waits until a created resource is usable.
    async fn await_ready(&self, ctx: &ResourceContext<'_>, outputs: &Outputs) -> Result<()> {
        let _ = (ctx, outputs);
        Ok(())
    }
}

/// Adapters keyed by the kind they handle.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ResourceKind, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.adapters.keys().collect();
        kinds.sort();
        f.debug_struct("AdapterRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous one for its kind.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Builder form of [`AdapterRegistry::register`].
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Returns the adapter for a kind.
    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Returns true if an adapter is registered for `kind`.
    #[must_use]
    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Builds the registry used for real deployments.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created.
    pub fn production(config: &DeployConfig, executor: Arc<RemoteExecutor>) -> Result<Self> {
        let settings = &config.settings;
        let hcloud = Arc::new(hcloud::HcloudClient::new(config.secrets.hcloud_token.clone())?);
        let dns = Arc::new(cloudflare::CloudflareClient::new(
            config.secrets.cloudflare_api_token.clone(),
        )?);

        let secret_env = HashMap::from([
            (
                String::from(crate::render::API_TOKEN_ENV),
                config.secrets.cloudflare_api_token.clone(),
            ),
            (
                String::from(crate::render::ZONE_TOKEN_ENV),
                config.secrets.cloudflare_zone_token.clone(),
            ),
        ]);

        Ok(Self::new()
            .with(Arc::new(keypair::KeyPairAdapter::new()))
            .with(Arc::new(hcloud::SshKeyAdapter::new(Arc::clone(&hcloud))))
            .with(Arc::new(hcloud::FirewallAdapter::new(Arc::clone(&hcloud))))
            .with(Arc::new(hcloud::ServerAdapter::new(
                Arc::clone(&hcloud),
                Duration::from_secs(settings.server.ready_timeout_secs),
                Duration::from_secs(settings.server.poll_interval_secs),
            )))
            .with(Arc::new(hcloud::FirewallAttachmentAdapter::new(hcloud)))
            .with(Arc::new(cloudflare::DnsRecordAdapter::new(dns)))
            .with(Arc::new(command::RemoteCommandAdapter::new(Arc::clone(&executor))))
            .with(Arc::new(command::ProxyConfigAdapter::new(Arc::clone(&executor))))
            .with(Arc::new(docker::NetworkAdapter::new(Arc::clone(&executor))))
            .with(Arc::new(docker::VolumeAdapter::new(Arc::clone(&executor))))
            .with(Arc::new(docker::ImageAdapter::new(Arc::clone(&executor))))
            .with(Arc::new(docker::ContainerAdapter::new(
                executor,
                secret_env,
                Duration::from_secs(settings.server.ready_timeout_secs),
                Duration::from_secs(settings.server.poll_interval_secs),
            ))))
    }
}

/// Builds the connection of a remote-domain resource from its resolved
/// `host`, `user`, `port` and `private_key_path` inputs.
///
/// # Errors
///
/// Returns [`RemoteError::InvalidConnection`] if `host` or
/// `private_key_path` is missing, or a value has the wrong type.
pub fn connection_from_inputs(
    resource: &str,
    inputs: &BTreeMap<String, Value>,
) -> std::result::Result<RemoteConnection, RemoteError> {
    let invalid = |message: String| RemoteError::InvalidConnection {
        resource: resource.to_string(),
        message,
    };
    let string = |name: &str| -> std::result::Result<Option<String>, RemoteError> {
        match inputs.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
            Some(other) => Err(invalid(format!("'{name}' must be a non-empty string, got {other}"))),
        }
    };

    let host = string("host")?.ok_or_else(|| invalid(String::from("missing 'host'")))?;
    let key = string("private_key_path")?
        .ok_or_else(|| invalid(String::from("missing 'private_key_path'")))?;
    let user = string("user")?.unwrap_or_else(|| DEFAULT_USER.to_string());
    let port = match inputs.get("port") {
        None | Some(Value::Null) => DEFAULT_PORT,
        Some(value) => value
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid(format!("'port' must be a port number, got {value}")))?,
    };

    Ok(RemoteConnection {
        host,
        user,
        port,
        identity_file: PathBuf::from(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn inputs(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_connection_defaults() {
        let inputs = inputs(json!({
            "host": "203.0.113.7",
            "private_key_path": "/keys/deploy_key",
        }));
        let conn = connection_from_inputs("docker-ready", &inputs).expect("valid");
        assert_eq!(conn.key(), "root@203.0.113.7:22");
        assert_eq!(conn.identity_file, PathBuf::from("/keys/deploy_key"));
    }

    #[test]
    fn test_connection_rejects_bad_inputs() {
        let missing_host = inputs(json!({ "private_key_path": "/k" }));
        assert!(connection_from_inputs("x", &missing_host).is_err());

        let bad_port = inputs(json!({ "host": "h", "private_key_path": "/k", "port": 70000 }));
        assert!(connection_from_inputs("x", &bad_port).is_err());

        let bad_user = inputs(json!({ "host": "h", "private_key_path": "/k", "user": 7 }));
        assert!(connection_from_inputs("x", &bad_user).is_err());
    }

    #[derive(Debug, Deserialize)]
    struct VolumeInputs {
        name: String,
        #[serde(default)]
        driver: Option<String>,
    }

    #[test]
    fn test_typed_inputs() {
        let inputs = inputs(json!({ "name": "data", "host": "h", "port": 22 }));
        let ctx = ResourceContext::new("app-volume", &inputs, None);

        let typed: VolumeInputs = ctx.inputs_as().expect("matches");
        assert_eq!(typed.name, "data");
        assert!(typed.driver.is_none());

        let port: u16 = ctx.input("port").expect("present");
        assert_eq!(port, 22);
        assert!(ctx.input::<String>("missing").is_err());
        assert!(ctx.input::<u16>("name").is_err());
        assert!(ctx.connection().is_err());
    }
}
