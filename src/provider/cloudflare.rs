//! Cloudflare DNS records.
//!
//! Records are upserted: an existing record with the same name and type is
//! updated in place, otherwise a new one is created.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Secret;
use crate::error::{ProviderError, Result, StackupError};
use crate::resource::{Outputs, ResourceKind};

use super::{ApiClient, ProviderAdapter, ResourceContext};

/// Cloudflare API base URL.
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

const PROVIDER: &str = "cloudflare";

/// A DNS record as stored by Cloudflare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsRecord {
    /// Record id.
    #[serde(default, skip_serializing)]
    pub id: String,
    /// Record type (`A`, `AAAA`, `CNAME`, ...).
    #[serde(rename = "type")]
    pub record_type: String,
    /// Fully qualified name.
    pub name: String,
    /// Record content, e.g. an address.
    pub content: String,
    /// TTL in seconds; `1` means automatic.
    pub ttl: u32,
    /// Whether traffic is proxied through Cloudflare.
    #[serde(default)]
    pub proxied: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    message: String,
}

/// Cloudflare DNS API client.
#[derive(Debug, Clone)]
pub struct CloudflareClient {
    api: ApiClient,
}

impl CloudflareClient {
    /// Creates a client for the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_token: Secret) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(PROVIDER, CLOUDFLARE_API_BASE, api_token)?,
        })
    }

    /// Wraps a preconfigured API client.
    #[must_use]
    pub const fn from_api(api: ApiClient) -> Self {
        Self { api }
    }

    /// Finds a record by type and name.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn find_record(&self, zone_id: &str, record_type: &str, name: &str) -> Result<Option<DnsRecord>> {
        let response: ApiResponse<Vec<DnsRecord>> = self
            .api
            .get(
                &format!("/zones/{zone_id}/dns_records"),
                &[("type", record_type), ("name", name)],
            )
            .await?;
        Ok(unwrap_response(response)?.into_iter().next())
    }

    /// Creates a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn create_record(&self, zone_id: &str, record: &DnsRecord) -> Result<DnsRecord> {
        debug!("Creating {} record {}", record.record_type, record.name);
        let response: ApiResponse<DnsRecord> = self
            .api
            .post(&format!("/zones/{zone_id}/dns_records"), record)
            .await?;
        unwrap_response(response)
    }

    /// Overwrites a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn update_record(&self, zone_id: &str, record_id: &str, record: &DnsRecord) -> Result<DnsRecord> {
        debug!("Updating {} record {}", record.record_type, record.name);
        let response: ApiResponse<DnsRecord> = self
            .api
            .put(&format!("/zones/{zone_id}/dns_records/{record_id}"), record)
            .await?;
        unwrap_response(response)
    }
}

fn unwrap_response<T>(response: ApiResponse<T>) -> Result<T> {
    if !response.success {
        let message = response
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(StackupError::Provider(ProviderError::Api {
            provider: PROVIDER,
            status: 200,
            message: if message.is_empty() {
                String::from("Unknown error")
            } else {
                message
            },
        }));
    }

    response.result.ok_or_else(|| {
        StackupError::Provider(ProviderError::InvalidResponse {
            provider: PROVIDER,
            message: String::from("No result in response"),
        })
    })
}

#[derive(Debug, Deserialize)]
struct DnsRecordInputs {
    zone_id: String,
    name: String,
    #[serde(rename = "type", default = "default_record_type")]
    record_type: String,
    content: String,
    #[serde(default)]
    proxied: bool,
    #[serde(default = "default_ttl")]
    ttl: u32,
}

fn default_record_type() -> String {
    String::from("A")
}

const fn default_ttl() -> u32 {
    1
}

/// Points a name at the server.
#[derive(Debug, Clone)]
pub struct DnsRecordAdapter {
    client: std::sync::Arc<CloudflareClient>,
}

impl DnsRecordAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(client: std::sync::Arc<CloudflareClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for DnsRecordAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::DnsRecord
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let inputs: DnsRecordInputs = ctx.inputs_as()?;
        let desired = DnsRecord {
            id: String::new(),
            record_type: inputs.record_type,
            name: inputs.name,
            content: inputs.content,
            ttl: inputs.ttl,
            proxied: inputs.proxied,
        };

        let existing = self
            .client
            .find_record(&inputs.zone_id, &desired.record_type, &desired.name)
            .await?;

        let record = match existing {
            Some(current)
                if current.content == desired.content
                    && current.proxied == desired.proxied
                    && current.ttl == desired.ttl =>
            {
                debug!("DNS record {} is up to date", current.name);
                current
            }
            Some(current) => {
                info!("Updating DNS record {} -> {}", desired.name, desired.content);
                self.client
                    .update_record(&inputs.zone_id, &current.id, &desired)
                    .await?
            }
            None => {
                info!("Creating DNS record {} -> {}", desired.name, desired.content);
                self.client.create_record(&inputs.zone_id, &desired).await?
            }
        };

        Ok(Outputs::new()
            .with("id", record.id)
            .with("name", record.name)
            .with("content", record.content)
            .with("proxied", record.proxied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> DnsRecordAdapter {
        let api = ApiClient::new(PROVIDER, server.uri(), Secret::new("cf-token"))
            .unwrap()
            .with_retry_delay(Duration::ZERO);
        DnsRecordAdapter::new(Arc::new(CloudflareClient::from_api(api)))
    }

    fn record_inputs() -> BTreeMap<String, Value> {
        serde_json::from_value(json!({
            "zone_id": "zone-1",
            "name": "dev.example.com",
            "type": "A",
            "content": "203.0.113.7",
            "proxied": true,
            "ttl": 1
        }))
        .unwrap()
    }

    fn record(id: &str, content: &str) -> Value {
        json!({
            "id": id,
            "type": "A",
            "name": "dev.example.com",
            "content": content,
            "ttl": 1,
            "proxied": true
        })
    }

    #[tokio::test]
    async fn test_record_created_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .and(query_param("type", "A"))
            .and(query_param("name", "dev.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "errors": [], "result": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .and(body_partial_json(json!({ "type": "A", "content": "203.0.113.7", "proxied": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "errors": [], "result": record("rec-1", "203.0.113.7")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let inputs = record_inputs();
        let ctx = ResourceContext::new("dns-record", &inputs, None);
        let outputs = adapter(&server).create(&ctx).await.unwrap();
        assert_eq!(outputs.get_str("id"), Some("rec-1"));
        assert_eq!(outputs.get_str("content"), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_stale_record_is_updated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "errors": [], "result": [record("rec-1", "198.51.100.1")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/zones/zone-1/dns_records/rec-1"))
            .and(body_partial_json(json!({ "content": "203.0.113.7" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "errors": [], "result": record("rec-1", "203.0.113.7")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let inputs = record_inputs();
        let ctx = ResourceContext::new("dns-record", &inputs, None);
        let outputs = adapter(&server).create(&ctx).await.unwrap();
        assert_eq!(outputs.get_str("content"), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "errors": [{ "code": 10000, "message": "Authentication error" }], "result": null
            })))
            .mount(&server)
            .await;

        let inputs = record_inputs();
        let ctx = ResourceContext::new("dns-record", &inputs, None);
        let err = adapter(&server).create(&ctx).await.expect_err("auth error");
        assert!(err.to_string().contains("Authentication error"));
    }
}
