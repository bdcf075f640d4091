//! Per-stage domain names and the reverse proxy configuration document.

use std::fmt::Write as _;

use crate::config::{DEV_STAGE, Stage};

/// Environment variable the proxy reads its Cloudflare zone token from.
pub const ZONE_TOKEN_ENV: &str = "CF_ZONE_TOKEN";

/// Environment variable the proxy reads its Cloudflare API token from.
pub const API_TOKEN_ENV: &str = "CF_API_TOKEN";

/// One routed site served by the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// Public domain name.
    pub domain: String,
    /// Upstream host, usually a container name on the private network.
    pub upstream_host: String,
    /// Upstream port.
    pub upstream_port: u16,
}

/// DNS challenge settings for certificate issuance.
///
/// Only the names of the environment variables holding the credentials are
/// rendered; the proxy resolves them at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChallenge {
    /// Variable holding the zone token.
    pub zone_token_env: String,
    /// Variable holding the API token.
    pub api_token_env: String,
}

impl Default for DnsChallenge {
    fn default() -> Self {
        Self {
            zone_token_env: ZONE_TOKEN_ENV.to_string(),
            api_token_env: API_TOKEN_ENV.to_string(),
        }
    }
}

/// Derives the public domain of a stage.
///
/// `production` serves the base domain, `dev` serves `dev.<base>` and every
/// other stage serves `<stage>.dev.<base>`.
#[must_use]
pub fn derive_domain(stage: &Stage, base: &str) -> String {
    if stage.is_production() {
        base.to_string()
    } else if stage.as_str() == DEV_STAGE {
        format!("{DEV_STAGE}.{base}")
    } else {
        format!("{stage}.{DEV_STAGE}.{base}")
    }
}

/// Renders a Caddyfile.
///
/// The document always starts with a single catch-all block answering
/// `404` on `:80` and `:443`, followed by one block per route.
#[must_use]
pub fn render_caddyfile(routes: &[ProxyRoute], tls: &DnsChallenge) -> String {
    let mut out = String::from(":80, :443 {\n\trespond \"Not Found\" 404\n}\n");

    for route in routes {
        // Writing to a String cannot fail.
        let _ = write!(
            out,
            "\nhttps://{domain} {{\n\
             \treverse_proxy {host}:{port}\n\
             \n\
             \ttls {{\n\
             \t\tdns cloudflare {{\n\
             \t\t\tzone_token {{env.{zone}}}\n\
             \t\t\tapi_token {{env.{api}}}\n\
             \t\t}}\n\
             \t}}\n\
             }}\n",
            domain = route.domain,
            host = route.upstream_host,
            port = route.upstream_port,
            zone = tls.zone_token_env,
            api = tls.api_token_env,
        );
    }

    out
}
