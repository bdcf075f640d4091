//! Resource descriptors.
//!
//! A descriptor states *what* should exist, never *how* it is created. Its
//! inputs are either literal values or references to an output of another
//! resource, which is resolved only after that resource has been created.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ProviderError;

use super::outputs::Outputs;

/// The category of a resource; selects the provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// A local SSH keypair.
    KeyPair,
    /// A public key registered with the cloud provider.
    SshKey,
    /// A cloud firewall.
    Firewall,
    /// A virtual server.
    Server,
    /// The binding of a firewall to a server.
    FirewallAttachment,
    /// A DNS record.
    DnsRecord,
    /// An arbitrary command run on a remote host.
    RemoteCommand,
    /// A rendered proxy configuration file on a remote host.
    ProxyConfig,
    /// A container network.
    Network,
    /// A container volume.
    Volume,
    /// A container image built on a remote host.
    Image,
    /// A running container.
    Container,
}

/// Where a resource's adapter acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionDomain {
    /// The orchestrator's own machine, or a cloud API reached from it.
    #[default]
    Local,
    /// A remote host reached over SSH.
    Remote,
}

/// A pointer to a named output of another resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// Id of the producing resource.
    pub resource: String,
    /// Output name.
    pub output: String,
}

/// A descriptor input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum InputValue {
    /// A value known before the run starts.
    Literal(Value),
    /// A value produced by another resource.
    Reference(OutputRef),
}

/// A declarative description of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Unique id within the descriptor set.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Named inputs.
    pub inputs: BTreeMap<String, InputValue>,
    /// Ordering-only dependencies.
    pub explicit_dependencies: BTreeSet<String>,
    /// Where the adapter acts.
    pub execution_domain: ExecutionDomain,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::KeyPair,
        Self::SshKey,
        Self::Firewall,
        Self::Server,
        Self::FirewallAttachment,
        Self::DnsRecord,
        Self::RemoteCommand,
        Self::ProxyConfig,
        Self::Network,
        Self::Volume,
        Self::Image,
        Self::Container,
    ];

    /// Returns the kebab-case tag of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeyPair => "key-pair",
            Self::SshKey => "ssh-key",
            Self::Firewall => "firewall",
            Self::Server => "server",
            Self::FirewallAttachment => "firewall-attachment",
            Self::DnsRecord => "dns-record",
            Self::RemoteCommand => "remote-command",
            Self::ProxyConfig => "proxy-config",
            Self::Network => "network",
            Self::Volume => "volume",
            Self::Image => "image",
            Self::Container => "container",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ExecutionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.output)
    }
}

impl ResourceDescriptor {
    /// Creates a local-domain descriptor with no inputs.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs: BTreeMap::new(),
            explicit_dependencies: BTreeSet::new(),
            execution_domain: ExecutionDomain::Local,
        }
    }

    /// Adds a literal input.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs
            .insert(name.into(), InputValue::Literal(value.into()));
        self
    }

    /// Adds an input resolved from another resource's output.
    #[must_use]
    pub fn with_reference(
        mut self,
        name: impl Into<String>,
        resource: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.inputs.insert(
            name.into(),
            InputValue::Reference(OutputRef {
                resource: resource.into(),
                output: output.into(),
            }),
        );
        self
    }

    /// Adds an ordering-only dependency.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.explicit_dependencies.insert(id.into());
        self
    }

    /// Marks the descriptor as acting on a remote host.
    #[must_use]
    pub const fn remote(mut self) -> Self {
        self.execution_domain = ExecutionDomain::Remote;
        self
    }

    /// Returns the ids referenced through inputs.
    #[must_use]
    pub fn referenced_resources(&self) -> BTreeSet<&str> {
        self.inputs
            .values()
            .filter_map(|input| match input {
                InputValue::Reference(r) => Some(r.resource.as_str()),
                InputValue::Literal(_) => None,
            })
            .collect()
    }

    /// Returns every resource this one depends on: referenced resources
    /// plus explicit dependencies.
    #[must_use]
    pub fn dependency_ids(&self) -> BTreeSet<&str> {
        let mut ids = self.referenced_resources();
        ids.extend(self.explicit_dependencies.iter().map(String::as_str));
        ids
    }

    /// Replaces every reference with the output it points to.
    ///
    /// `lookup` returns the outputs of a completed resource.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingOutput`] if a referenced resource has
    /// no outputs or lacks the named output.
    pub fn resolve_inputs<'a>(
        &self,
        lookup: impl Fn(&str) -> Option<&'a Outputs>,
    ) -> Result<BTreeMap<String, Value>, ProviderError> {
        let mut resolved = BTreeMap::new();
        for (name, input) in &self.inputs {
            let value = match input {
                InputValue::Literal(value) => value.clone(),
                InputValue::Reference(r) => lookup(&r.resource)
                    .and_then(|outputs| outputs.get(&r.output))
                    .cloned()
                    .ok_or_else(|| ProviderError::MissingOutput {
                        resource: r.resource.clone(),
                        output: r.output.clone(),
                    })?,
            };
            resolved.insert(name.clone(), value);
        }
        Ok(resolved)
    }

    /// Computes a stable SHA-256 fingerprint of the descriptor.
    ///
    /// Inputs and dependencies are kept in ordered maps, so the fingerprint
    /// does not depend on construction order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dependency_ids_merge_references_and_explicit() {
        let descriptor = ResourceDescriptor::new("app-container", ResourceKind::Container)
            .with_reference("network", "app-network", "name")
            .with_reference("image", "app-image", "image_name")
            .with_input("port", 3000)
            .depends_on("app-volume")
            .depends_on("app-network");

        let ids: Vec<_> = descriptor.dependency_ids().into_iter().collect();
        assert_eq!(ids, vec!["app-image", "app-network", "app-volume"]);
    }

    #[test]
    fn test_resolve_inputs_substitutes_outputs() {
        let descriptor = ResourceDescriptor::new("dns-record", ResourceKind::DnsRecord)
            .with_reference("content", "server", "ipv4_address")
            .with_input("type", "A");

        let server: Outputs = [("ipv4_address", json!("203.0.113.7"))].into_iter().collect();
        let resolved = descriptor
            .resolve_inputs(|id| (id == "server").then_some(&server))
            .expect("resolves");

        assert_eq!(resolved["content"], json!("203.0.113.7"));
        assert_eq!(resolved["type"], json!("A"));
    }

    #[test]
    fn test_resolve_inputs_reports_missing_output() {
        let descriptor = ResourceDescriptor::new("dns-record", ResourceKind::DnsRecord)
            .with_reference("content", "server", "ipv4_address");
        let server = Outputs::new();

        let err = descriptor
            .resolve_inputs(|_| Some(&server))
            .expect_err("output is missing");
        assert!(matches!(
            err,
            ProviderError::MissingOutput { ref resource, ref output }
                if resource == "server" && output == "ipv4_address"
        ));
    }

    #[test]
    fn test_fingerprint_ignores_construction_order() {
        let a = ResourceDescriptor::new("x", ResourceKind::Volume)
            .with_input("name", "data")
            .with_input("driver", "local")
            .depends_on("docker-ready");
        let b = ResourceDescriptor::new("x", ResourceKind::Volume)
            .depends_on("docker-ready")
            .with_input("driver", "local")
            .with_input("name", "data");
        let c = b.clone().with_input("name", "other");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_kind_tags_match_serde() {
        for kind in ResourceKind::ALL {
            let tag = serde_json::to_value(kind).expect("serializes");
            assert_eq!(tag, json!(kind.as_str()));
        }
    }
}
