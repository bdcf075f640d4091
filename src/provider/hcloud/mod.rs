//! Hetzner Cloud adapters: SSH key, firewall, server and firewall attachment.

mod adapters;
mod client;
mod types;

pub use adapters::{FirewallAdapter, FirewallAttachmentAdapter, ServerAdapter, SshKeyAdapter};
pub use client::{HCLOUD_API_BASE, HcloudClient};
pub use types::{
    CreateFirewallRequest, CreateServerRequest, CreateSshKeyRequest, Firewall, FirewallRule,
    IpAddress, PublicNet, Server, ServerStatus, SshKey,
};
