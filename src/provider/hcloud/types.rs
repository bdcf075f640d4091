//! Hetzner Cloud API types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A public key registered with the project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshKey {
    /// Numeric id.
    pub id: u64,
    /// Unique name.
    pub name: String,
    /// MD5 fingerprint as reported by the API.
    #[serde(default)]
    pub fingerprint: String,
    /// OpenSSH public key.
    #[serde(default)]
    pub public_key: String,
}

/// A firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallRule {
    /// `in` or `out`.
    pub direction: String,
    /// `tcp`, `udp`, `icmp`, `esp` or `gre`.
    pub protocol: String,
    /// Port or range, for tcp and udp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Allowed source networks for inbound rules.
    #[serde(default)]
    pub source_ips: Vec<String>,
}

/// A cloud firewall.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Firewall {
    /// Numeric id.
    pub id: u64,
    /// Unique name.
    pub name: String,
    /// Rules.
    #[serde(default)]
    pub rules: Vec<FirewallRule>,
}

/// Server lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Booting for the first time.
    Initializing,
    /// Starting up.
    Starting,
    /// Up and running.
    Running,
    /// Shutting down.
    Stopping,
    /// Powered off.
    Off,
    /// Being deleted.
    Deleting,
    /// Being migrated.
    Migrating,
    /// Being rebuilt.
    Rebuilding,
    /// Any status this client does not know.
    #[serde(other)]
    Unknown,
}

/// A virtual server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    /// Numeric id.
    pub id: u64,
    /// Unique name.
    pub name: String,
    /// Current status.
    pub status: ServerStatus,
    /// Public network configuration.
    #[serde(default)]
    pub public_net: PublicNet,
}

/// Public addresses of a server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicNet {
    /// Primary IPv4 address, if any.
    #[serde(default)]
    pub ipv4: Option<IpAddress>,
    /// Primary IPv6 network, if any.
    #[serde(default)]
    pub ipv6: Option<IpAddress>,
}

/// An address entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpAddress {
    /// Address or network in text form.
    pub ip: String,
}

/// Request body for `POST /ssh_keys`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSshKeyRequest {
    /// Key name.
    pub name: String,
    /// OpenSSH public key.
    pub public_key: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
}

/// Request body for `POST /firewalls`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateFirewallRequest {
    /// Firewall name.
    pub name: String,
    /// Rules.
    pub rules: Vec<FirewallRule>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
}

/// Request body for `POST /servers`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateServerRequest {
    /// Server name.
    pub name: String,
    /// Server type name.
    pub server_type: String,
    /// Image name.
    pub image: String,
    /// Location name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Ids of keys installed for root.
    pub ssh_keys: Vec<u64>,
    /// Cloud-init user data.
    pub user_data: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Start the server right away.
    pub start_after_create: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct SshKeyList {
    pub ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SshKeyEnvelope {
    pub ssh_key: SshKey,
}

#[derive(Debug, Deserialize)]
pub(super) struct FirewallList {
    pub firewalls: Vec<Firewall>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FirewallEnvelope {
    pub firewall: Firewall,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerList {
    pub servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerEnvelope {
    pub server: Server,
}

impl Server {
    /// Returns the primary IPv4 address.
    #[must_use]
    pub fn ipv4_address(&self) -> Option<&str> {
        self.public_net.ipv4.as_ref().map(|ip| ip.ip.as_str())
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Off => "off",
            Self::Deleting => "deleting",
            Self::Migrating => "migrating",
            Self::Rebuilding => "rebuilding",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}
