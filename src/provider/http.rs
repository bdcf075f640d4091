//! JSON-over-HTTPS client shared by the cloud API adapters.

use reqwest::{Client, Method, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::Secret;
use crate::error::{ProviderError, Result, StackupError};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Bearer-token REST client with retry of transient failures.
///
/// Only GET and PUT are retried. A POST that timed out or hit a 5xx may
/// still have created the object, so it is sent once.
#[derive(Debug, Clone)]
pub struct ApiClient {
    provider: &'static str,
    client: Client,
    base_url: String,
    token: Secret,
    retry_delay: Duration,
}

impl ApiClient {
    /// Creates a client for `provider` rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(provider: &'static str, base_url: impl Into<String>, token: Secret) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::Network {
                provider,
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            provider,
            client,
            base_url: base_url.into(),
            token,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Points the client at another base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the base delay between retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Returns the backend name used in errors.
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }

    /// Sends a GET request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after retries or the response
    /// cannot be decoded.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.execute(Method::GET, path, query, None).await
    }

    /// Sends a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::get`].
    pub async fn post<T: DeserializeOwned, B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<T> {
        let body = self.encode(body)?;
        self.execute(Method::POST, path, &[], Some(body)).await
    }

    /// Sends a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::get`].
    pub async fn put<T: DeserializeOwned, B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<T> {
        let body = self.encode(body)?;
        self.execute(Method::PUT, path, &[], Some(body)).await
    }

    fn encode<B: Serialize>(&self, body: &B) -> Result<Value> {
        serde_json::to_value(body).map_err(|e| {
            StackupError::Provider(ProviderError::InvalidResponse {
                provider: self.provider,
                message: format!("Failed to encode request: {e}"),
            })
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T> {
        let mut last_error = None;
        let attempts = if is_idempotent(&method) { MAX_RETRIES } else { 1 };

        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("{} retry attempt {attempt} of {attempts}", self.provider);
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self
                .execute_once::<T>(method.clone(), path, query, body.as_ref())
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            StackupError::Provider(ProviderError::Network {
                provider: self.provider,
                message: String::from("Max retries exceeded"),
            })
        }))
    }

    async fn execute_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, &url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token.expose()));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            StackupError::Provider(ProviderError::Network {
                provider: self.provider,
                message: format!("Request failed: {e}"),
            })
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StackupError::Provider(ProviderError::Api {
                provider: self.provider,
                status: status.as_u16(),
                message: error_message(&body),
            }));
        }

        response.json::<T>().await.map_err(|e| {
            StackupError::Provider(ProviderError::InvalidResponse {
                provider: self.provider,
                message: format!("Failed to parse response: {e}"),
            })
        })
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::PUT | Method::DELETE)
}

/// Extracts a readable message from an error body.
///
/// Understands `{"error": {"code", "message"}}` and
/// `{"errors": [{"code", "message"}]}`; anything else is returned verbatim.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    let describe = |e: &Value| {
        let message = e.get("message").and_then(Value::as_str).unwrap_or_default();
        match e.get("code") {
            Some(Value::String(code)) => format!("{code}: {message}"),
            Some(Value::Number(code)) => format!("{code}: {message}"),
            _ => message.to_string(),
        }
    };

    if let Some(error) = value.get("error").filter(|e| e.is_object()) {
        return describe(error);
    }
    if let Some(errors) = value.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            return errors.iter().map(describe).collect::<Vec<_>>().join("; ");
        }
    }
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new("test", server.uri(), Secret::new("token-123"))
            .unwrap()
            .with_retry_delay(Duration::ZERO)
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":{"code":"uniqueness_error","message":"name is already used"}}"#),
            "uniqueness_error: name is already used"
        );
        assert_eq!(
            error_message(r#"{"success":false,"errors":[{"code":81057,"message":"record exists"}]}"#),
            "81057: record exists"
        );
        assert_eq!(error_message("bad gateway"), "bad gateway");
    }

    #[tokio::test]
    async fn test_get_sends_bearer_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things"))
            .and(query_param("name", "web"))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let value: Value = client(&server).get("/things", &[("name", "web")]).await.unwrap();
        assert_eq!(value, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things"))
            .respond_with(ResponseTemplate::new(503))
            .expect(u64::from(MAX_RETRIES))
            .mount(&server)
            .await;

        let err = client(&server)
            .get::<Value>("/things", &[])
            .await
            .expect_err("always unavailable");
        assert!(matches!(
            err,
            StackupError::Provider(ProviderError::Api { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_post_is_sent_once_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .post::<Value, _>("/servers", &json!({ "name": "web" }))
            .await
            .expect_err("bad gateway");
        assert!(matches!(
            err,
            StackupError::Provider(ProviderError::Api { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/things/1"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(json!({ "error": { "code": "invalid_input", "message": "nope" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .put::<Value, _>("/things/1", &json!({ "a": 1 }))
            .await
            .expect_err("rejected");
        match err {
            StackupError::Provider(ProviderError::Api { status, message, .. }) => {
                assert_eq!(status, 422);
                assert_eq!(message, "invalid_input: nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
