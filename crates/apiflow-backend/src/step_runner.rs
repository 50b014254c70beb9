//! HTTP step runner
//!
//! The flow executor hands each materialized request to a [`StepRunner`].
//! The trait is the seam between the flow core and the network: tests use an
//! in-memory implementation, production uses [`HttpStepRunner`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use crate::BackendError;
use apiflow_protocol::models::{MaterializedRequest, StepResponse};

/// Executes one materialized flow step against the network
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Perform the request, honoring the optional per-step timeout
    async fn execute(
        &self,
        request: &MaterializedRequest,
        timeout: Option<Duration>,
    ) -> Result<StepResponse, BackendError>;
}

/// Production step runner backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpStepRunner {
    http: reqwest::Client,
    default_timeout: Duration,
}

impl HttpStepRunner {
    /// Create a runner with the given default per-step timeout
    pub fn new(default_timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;
        Ok(Self {
            http,
            default_timeout,
        })
    }

    fn build_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, BackendError> {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| BackendError::InvalidHeader(format!("{}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| BackendError::InvalidHeader(format!("{}: {}", key, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

impl Default for HttpStepRunner {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            default_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl StepRunner for HttpStepRunner {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(
        &self,
        request: &MaterializedRequest,
        timeout: Option<Duration>,
    ) -> Result<StepResponse, BackendError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| BackendError::InvalidMethod(request.method.clone()))?;

        let headers = Self::build_header_map(&request.headers)?;
        let timeout = timeout.unwrap_or(self.default_timeout);

        let mut builder = self
            .http
            .request(method, &request.url)
            .headers(headers)
            .timeout(timeout);

        // String bodies go out as-is so templated text payloads survive;
        // everything else is JSON.
        if let Some(body) = &request.body {
            builder = match body {
                Value::String(text) => builder.body(text.clone()),
                other => builder.json(other),
            };
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            BackendError::from_reqwest(e, started.elapsed().as_millis() as u64)
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        // Prefer structured bodies; fall back to the raw text.
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        debug!(status, elapsed_ms, "step request finished");

        Ok(StepResponse {
            status,
            headers,
            body,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: &str, url: &str) -> MaterializedRequest {
        MaterializedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn executes_get_and_parses_json_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body(r#"{"pong": true}"#)
            .create_async()
            .await;

        let runner = HttpStepRunner::default();
        let response = runner
            .execute(&request("GET", &format!("{}/ping", server.url())), None)
            .await
            .expect("execute step");

        assert_eq!(response.status, 200);
        assert!(response.is_success());
        assert_eq!(response.body, json!({"pong": true}));
    }

    #[tokio::test]
    async fn non_json_body_falls_back_to_string() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/plain")
            .with_status(200)
            .with_body("plain text")
            .create_async()
            .await;

        let runner = HttpStepRunner::default();
        let response = runner
            .execute(&request("GET", &format!("{}/plain", server.url())), None)
            .await
            .expect("execute step");

        assert_eq!(response.body, Value::String("plain text".to_string()));
    }

    #[tokio::test]
    async fn posts_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/echo")
            .match_header("content-type", "application/json")
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let runner = HttpStepRunner::default();
        let mut req = request("POST", &format!("{}/echo", server.url()));
        req.body = Some(json!({"a": 1}));

        let response = runner.execute(&req, None).await.expect("execute step");
        assert_eq!(response.status, 201);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let runner = HttpStepRunner::default();
        let result = runner
            .execute(&request("NOT A METHOD", "http://localhost/"), None)
            .await;
        assert!(matches!(result, Err(BackendError::InvalidMethod(_))));
    }
}
