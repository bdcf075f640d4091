//! The descriptor set of one deployment.
//!
//! A server with a firewall and a DNS record, an application container and
//! a Caddy container in front of it, all wired together through deferred
//! references so the graph builder can derive the creation order.

use serde_json::{Value, json};
use std::path::Path;

use crate::config::DeployConfig;
use crate::render::{API_TOKEN_ENV, ZONE_TOKEN_ENV, derive_domain};
use crate::resource::{ResourceDescriptor, ResourceKind};

/// Resource ids used by the stack.
pub mod ids {
    /// Local keypair.
    pub const SSH_KEY_LOCAL: &str = "ssh-key-local";
    /// Public key registered with the cloud provider.
    pub const SSH_KEY_REMOTE: &str = "ssh-key-remote";
    /// Server firewall.
    pub const FIREWALL: &str = "firewall";
    /// The server.
    pub const SERVER: &str = "server";
    /// Firewall binding.
    pub const FIREWALL_ATTACHMENT: &str = "firewall-attachment";
    /// A record for the stage domain.
    pub const DNS_RECORD: &str = "dns-record";
    /// Wait for the Docker daemon.
    pub const DOCKER_READY: &str = "docker-ready";
    /// Application image.
    pub const APP_IMAGE: &str = "app-image";
    /// Private network shared by both containers.
    pub const APP_NETWORK: &str = "app-network";
    /// Application volume.
    pub const APP_VOLUME: &str = "app-volume";
    /// Application container.
    pub const APP_CONTAINER: &str = "app-container";
    /// Caddy data volume.
    pub const PROXY_DATA_VOLUME: &str = "proxy-data-volume";
    /// Caddy config volume.
    pub const PROXY_CONFIG_VOLUME: &str = "proxy-config-volume";
    /// Caddy image.
    pub const PROXY_IMAGE: &str = "proxy-image";
    /// Caddyfile on the server.
    pub const PROXY_CONFIG: &str = "proxy-config";
    /// Caddy container.
    pub const PROXY_CONTAINER: &str = "proxy-container";
}

/// Polls until the Docker daemon installed by cloud-init is active.
pub const DOCKER_READY_COMMAND: &str =
    "until systemctl is-active --quiet docker; do sleep 5; done";

/// Cloud-init script run on first boot.
pub const SERVER_USER_DATA: &str = "#!/bin/bash
apt-get update
apt-get install -y docker.io apparmor
systemctl enable --now docker
usermod -aG docker debian";

/// Builds every descriptor of the stack for `config`.
#[must_use]
pub fn descriptors(config: &DeployConfig) -> Vec<ResourceDescriptor> {
    let settings = &config.settings;
    let prefix = config.resource_prefix();
    let labels = labels(config);
    let domain = derive_domain(&config.stage, &config.secrets.domain_name);

    let firewall_rules: Vec<Value> = settings
        .server
        .firewall_ports
        .iter()
        .map(|port| {
            json!({
                "direction": "in",
                "protocol": "tcp",
                "port": port.to_string(),
                "source_ips": ["0.0.0.0/0", "::/0"],
            })
        })
        .collect();

    let mut stack = vec![
        ResourceDescriptor::new(ids::SSH_KEY_LOCAL, ResourceKind::KeyPair)
            .with_input("path", path_value(&settings.ssh.key_path))
            .with_input("comment", prefix.clone()),
        ResourceDescriptor::new(ids::SSH_KEY_REMOTE, ResourceKind::SshKey)
            .with_input("name", format!("{prefix}-key"))
            .with_reference("public_key", ids::SSH_KEY_LOCAL, "public_key_openssh")
            .with_input("labels", labels.clone()),
        ResourceDescriptor::new(ids::FIREWALL, ResourceKind::Firewall)
            .with_input("name", format!("{prefix}-firewall"))
            .with_input("rules", firewall_rules)
            .with_input("labels", labels.clone()),
        ResourceDescriptor::new(ids::SERVER, ResourceKind::Server)
            .with_input("name", format!("{prefix}-server"))
            .with_input("server_type", settings.server.server_type.clone())
            .with_input("image", settings.server.image.clone())
            .with_input("location", settings.server.location.clone())
            .with_reference("ssh_key_id", ids::SSH_KEY_REMOTE, "id")
            .with_input("user_data", SERVER_USER_DATA)
            .with_input("labels", labels),
        ResourceDescriptor::new(ids::FIREWALL_ATTACHMENT, ResourceKind::FirewallAttachment)
            .with_reference("firewall_id", ids::FIREWALL, "id")
            .with_reference("server_id", ids::SERVER, "id"),
        ResourceDescriptor::new(ids::DNS_RECORD, ResourceKind::DnsRecord)
            .with_input("zone_id", config.secrets.cloudflare_zone_id.clone())
            .with_input("name", domain.clone())
            .with_input("type", "A")
            .with_reference("content", ids::SERVER, "ipv4_address")
            .with_input("proxied", settings.dns.proxied)
            .with_input("ttl", settings.dns.ttl),
        remote(config, ids::DOCKER_READY, ResourceKind::RemoteCommand)
            .with_input("command", DOCKER_READY_COMMAND),
    ];

    // Application.
    stack.extend([
        remote(config, ids::APP_IMAGE, ResourceKind::Image)
            .with_input("image_name", settings.app.image_name.clone())
            .with_input("context", path_value(&settings.app.context))
            .with_input("dockerfile", path_value(&settings.app.dockerfile_path()))
            .with_input("platform", settings.app.platform.clone())
            .depends_on(ids::DOCKER_READY),
        remote(config, ids::APP_NETWORK, ResourceKind::Network)
            .with_input("name", settings.app.network.clone())
            .depends_on(ids::DOCKER_READY),
        remote(config, ids::APP_VOLUME, ResourceKind::Volume)
            .with_input("name", settings.app.volume.clone())
            .depends_on(ids::DOCKER_READY),
        remote(config, ids::APP_CONTAINER, ResourceKind::Container)
            .with_input("name", settings.app.container_name.clone())
            .with_reference("image", ids::APP_IMAGE, "image_name")
            .with_reference("network", ids::APP_NETWORK, "name")
            .with_input(
                "volumes",
                json!([{ "source": settings.app.volume, "target": settings.app.volume_path }]),
            )
            .with_input(
                "ports",
                json!([{ "internal": settings.app.port, "external": settings.app.port }]),
            )
            .with_input("restart", "always")
            .with_input(
                "healthcheck",
                json!({
                    "test": ["CMD", "curl", "-f", format!("http://localhost:{}", settings.app.port)],
                    "interval": "30s",
                    "timeout": "5s",
                    "retries": 5,
                    "start_period": "30s",
                }),
            )
            .depends_on(ids::APP_VOLUME),
    ]);

    // Reverse proxy.
    let proxy = &settings.proxy;
    let ports: Vec<Value> = proxy
        .ports
        .iter()
        .map(|port| json!({ "internal": port, "external": port }))
        .collect();
    stack.extend([
        remote(config, ids::PROXY_DATA_VOLUME, ResourceKind::Volume)
            .with_input("name", proxy.data_volume.clone())
            .depends_on(ids::DOCKER_READY),
        remote(config, ids::PROXY_CONFIG_VOLUME, ResourceKind::Volume)
            .with_input("name", proxy.config_volume.clone())
            .depends_on(ids::DOCKER_READY),
        remote(config, ids::PROXY_IMAGE, ResourceKind::Image)
            .with_input("image_name", proxy.image_name.clone())
            .with_input("context", path_value(&proxy.context))
            .with_input("dockerfile", path_value(&proxy.dockerfile_path()))
            .with_input("platform", settings.app.platform.clone())
            .depends_on(ids::DOCKER_READY),
        remote(config, ids::PROXY_CONFIG, ResourceKind::ProxyConfig)
            .with_input("path", proxy.config_path.clone())
            .with_input("domain", domain)
            .with_input("upstream_host", settings.app.container_name.clone())
            .with_input("upstream_port", settings.app.port)
            .with_input("zone_token_env", ZONE_TOKEN_ENV)
            .with_input("api_token_env", API_TOKEN_ENV),
        remote(config, ids::PROXY_CONTAINER, ResourceKind::Container)
            .with_input("name", proxy.container_name.clone())
            .with_reference("image", ids::PROXY_IMAGE, "image_name")
            .with_reference("network", ids::APP_NETWORK, "name")
            .with_input("ports", ports)
            .with_input(
                "volumes",
                json!([
                    { "source": proxy.config_path, "target": "/etc/caddy/Caddyfile" },
                    { "source": proxy.data_volume, "target": "/data" },
                    { "source": proxy.config_volume, "target": "/config" },
                ]),
            )
            .with_input("secret_env", vec![API_TOKEN_ENV, ZONE_TOKEN_ENV])
            .with_input("restart", "always")
            .depends_on(ids::PROXY_CONFIG)
            .depends_on(ids::PROXY_DATA_VOLUME)
            .depends_on(ids::PROXY_CONFIG_VOLUME),
    ]);

    stack
}

/// A remote-domain descriptor connected to the stack's server.
fn remote(config: &DeployConfig, id: &str, kind: ResourceKind) -> ResourceDescriptor {
    ResourceDescriptor::new(id, kind)
        .remote()
        .with_reference("host", ids::SERVER, "ipv4_address")
        .with_reference("private_key_path", ids::SSH_KEY_LOCAL, "private_key_path")
        .with_input("user", config.settings.ssh.user.clone())
        .with_input("port", config.settings.ssh.port)
}

fn labels(config: &DeployConfig) -> Value {
    [
        ("project", config.settings.project.as_str()),
        ("stage", config.stage.as_str()),
        ("managed-by", "stackup"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), Value::from(value)))
    .collect::<serde_json::Map<_, _>>()
    .into()
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Secret, Secrets, Stage, StackSettings};
    use crate::planner::DependencyGraph;
    use crate::resource::InputValue;

    fn config(stage: &str) -> DeployConfig {
        DeployConfig {
            stage: Stage::new(stage).unwrap(),
            secrets: Secrets {
                hcloud_token: Secret::new("hc"),
                domain_name: String::from("example.com"),
                cloudflare_api_token: Secret::new("api"),
                cloudflare_zone_token: Secret::new("zone"),
                cloudflare_account_id: String::from("acct"),
                cloudflare_zone_id: String::from("zone-id"),
            },
            settings: StackSettings::default(),
        }
    }

    fn position(graph: &DependencyGraph, id: &str) -> usize {
        graph.order().iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_stack_forms_a_valid_graph() {
        let graph = DependencyGraph::build(descriptors(&config("dev"))).unwrap();
        assert_eq!(graph.len(), 16);

        let before = |a: &str, b: &str| assert!(position(&graph, a) < position(&graph, b), "{a} before {b}");
        before(ids::SSH_KEY_LOCAL, ids::SSH_KEY_REMOTE);
        before(ids::SSH_KEY_REMOTE, ids::SERVER);
        before(ids::SERVER, ids::DNS_RECORD);
        before(ids::SERVER, ids::FIREWALL_ATTACHMENT);
        before(ids::FIREWALL, ids::FIREWALL_ATTACHMENT);
        before(ids::DOCKER_READY, ids::APP_IMAGE);
        before(ids::APP_NETWORK, ids::APP_CONTAINER);
        before(ids::APP_IMAGE, ids::APP_CONTAINER);
        before(ids::PROXY_CONFIG, ids::PROXY_CONTAINER);
        before(ids::APP_NETWORK, ids::PROXY_CONTAINER);
    }

    #[test]
    fn test_remote_resources_carry_connection_inputs() {
        for descriptor in descriptors(&config("dev")) {
            if descriptor.execution_domain != crate::resource::ExecutionDomain::Remote {
                continue;
            }
            assert!(matches!(descriptor.inputs.get("host"), Some(InputValue::Reference(r)) if r.resource == ids::SERVER));
            assert!(descriptor.inputs.contains_key("private_key_path"));
        }
    }

    #[test]
    fn test_domain_follows_stage() {
        let find = |stage: &str| {
            descriptors(&config(stage))
                .into_iter()
                .find(|d| d.id == ids::DNS_RECORD)
                .and_then(|d| d.inputs.get("name").cloned())
        };
        assert_eq!(find("production"), Some(InputValue::Literal(json!("example.com"))));
        assert_eq!(find("dev"), Some(InputValue::Literal(json!("dev.example.com"))));
        assert_eq!(find("pr-7"), Some(InputValue::Literal(json!("pr-7.dev.example.com"))));
    }

    #[test]
    fn test_secrets_never_enter_descriptors() {
        let serialized = serde_json::to_string(&descriptors(&config("dev"))).unwrap();
        assert!(!serialized.contains("\"api\""));
        assert!(!serialized.contains("\"zone\""));
        assert!(serialized.contains(API_TOKEN_ENV));
    }

    #[test]
    fn test_firewall_rules_from_settings() {
        let firewall = descriptors(&config("dev"))
            .into_iter()
            .find(|d| d.id == ids::FIREWALL)
            .unwrap();
        let Some(InputValue::Literal(rules)) = firewall.inputs.get("rules") else {
            panic!("rules must be literal");
        };
        let ports: Vec<_> = rules.as_array().unwrap().iter().map(|r| r["port"].clone()).collect();
        assert_eq!(ports, [json!("22"), json!("443")]);
    }
}
