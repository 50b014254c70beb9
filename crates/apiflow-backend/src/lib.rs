//! Remote backend client for the ApiFlow Workbench
//!
//! The workbench proxies all resource CRUD (projects, folders, endpoints,
//! environments) to a fixed remote backend over HTTPS.
//!
//! # Features
//! - Bearer-token authenticated CRUD for every backend resource
//! - An HTTP [`StepRunner`] used by the flow executor to perform flow steps
//! - Workbench profile management with disk persistence

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use reqwest::header::{self, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use url::Url;

use apiflow_protocol::models::{
    Endpoint, EndpointDraft, Environment, EnvironmentDraft, Folder, FolderDraft, Project,
    ProjectDraft,
};

pub mod profile;
pub mod step_runner;

pub use profile::*;
pub use step_runner::*;

/// Errors surfaced by the backend client and the step runner
#[derive(Debug, Error)]
pub enum BackendError {
    /// The configured base URL or a joined path is not a valid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A header name or value could not be constructed
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The HTTP method string is not a valid method
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Transport-level failure (connect, TLS, body read)
    #[error("request failed: {0}")]
    Http(String),

    /// The request exceeded its deadline
    #[error("request timed out after {elapsed_ms} ms")]
    Timeout {
        /// Time spent before giving up
        elapsed_ms: u64,
    },

    /// The backend answered with an unexpected status
    #[error("backend returned status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Sanitized response excerpt
        message: String,
    },
}

impl BackendError {
    fn from_reqwest(err: reqwest::Error, elapsed_ms: u64) -> Self {
        if err.is_timeout() {
            BackendError::Timeout { elapsed_ms }
        } else {
            BackendError::Http(sanitize_error_message(&err.to_string()))
        }
    }
}

/// Configuration for the backend client
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the remote backend (e.g. "https://api.apiflow.dev/v1")
    pub base_url: String,
    /// Bearer token for authentication
    pub api_token: SecretString,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_token: SecretString::from(""),
            timeout_seconds: get_default_timeout(),
        }
    }
}

/// Default backend base URL, overridable via `APIFLOW_BACKEND_URL`
fn default_backend_url() -> String {
    std::env::var("APIFLOW_BACKEND_URL")
        .unwrap_or_else(|_| "https://api.apiflow.dev/v1".to_string())
}

/// Get the default timeout from environment variable or use the default value
fn get_default_timeout() -> u64 {
    std::env::var("APIFLOW_BACKEND_TIMEOUT_SECONDS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(30)
}

/// Authenticated client for the fixed remote backend
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: Url,
    api_token: SecretString,
    http: reqwest::Client,
}

impl BackendClient {
    /// Create a new client
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;

        info!(
            "Creating backend client for {}",
            base_url.domain().unwrap_or("unknown")
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;

        Ok(Self {
            base_url,
            api_token: config.api_token,
            http,
        })
    }

    /// Build request headers
    fn build_headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();

        let token_val =
            HeaderValue::from_str(&format!("Bearer {}", self.api_token.expose_secret()))
                .map_err(|e| BackendError::InvalidHeader(format!("token: {}", e)))?;
        headers.insert(header::AUTHORIZATION, token_val);

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        Ok(headers)
    }

    /// Join a resource path onto the base URL.
    ///
    /// `Url::join` replaces the last path segment when the base lacks a
    /// trailing slash ("v1".join("projects") = "projects"), so the slash is
    /// ensured manually.
    fn join(&self, path: &str) -> Result<Url, BackendError> {
        let mut url_str = self.base_url.to_string();
        if !url_str.ends_with('/') {
            url_str.push('/');
        }
        url_str.push_str(path.trim_start_matches('/'));
        Url::parse(&url_str).map_err(|e| BackendError::InvalidUrl(format!("{}: {}", url_str, e)))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Backend error ({}): {}", status, body);
        Err(BackendError::UnexpectedStatus {
            status: status.as_u16(),
            message: sanitize_error_message(&body),
        })
    }

    #[instrument(skip(self))]
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = self.join(path)?;
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .headers(self.build_headers()?)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, 0))?;
        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))
    }

    #[instrument(skip(self, payload))]
    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &B,
    ) -> Result<T, BackendError> {
        let url = self.join(path)?;
        debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .headers(self.build_headers()?)
            .json(payload)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, 0))?;
        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))
    }

    #[instrument(skip(self, payload))]
    async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &B,
    ) -> Result<T, BackendError> {
        let url = self.join(path)?;
        debug!("PUT {}", url);
        let response = self
            .http
            .put(url)
            .headers(self.build_headers()?)
            .json(payload)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, 0))?;
        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        let url = self.join(path)?;
        debug!("DELETE {}", url);
        let response = self
            .http
            .delete(url)
            .headers(self.build_headers()?)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, 0))?;
        Self::check_status(response).await.map(|_| ())
    }

    /// List all projects
    pub async fn list_projects(&self) -> Result<Vec<Project>, BackendError> {
        self.get_json("projects").await
    }

    /// Create a project
    pub async fn create_project(&self, draft: &ProjectDraft) -> Result<Project, BackendError> {
        self.post_json("projects", draft).await
    }

    /// Replace a project
    pub async fn update_project(
        &self,
        id: &str,
        draft: &ProjectDraft,
    ) -> Result<Project, BackendError> {
        self.put_json(&format!("projects/{}", id), draft).await
    }

    /// Delete a project
    pub async fn delete_project(&self, id: &str) -> Result<(), BackendError> {
        self.delete(&format!("projects/{}", id)).await
    }

    /// List all folders
    pub async fn list_folders(&self) -> Result<Vec<Folder>, BackendError> {
        self.get_json("folders").await
    }

    /// Create a folder
    pub async fn create_folder(&self, draft: &FolderDraft) -> Result<Folder, BackendError> {
        self.post_json("folders", draft).await
    }

    /// Replace a folder
    pub async fn update_folder(
        &self,
        id: &str,
        draft: &FolderDraft,
    ) -> Result<Folder, BackendError> {
        self.put_json(&format!("folders/{}", id), draft).await
    }

    /// Delete a folder
    pub async fn delete_folder(&self, id: &str) -> Result<(), BackendError> {
        self.delete(&format!("folders/{}", id)).await
    }

    /// List all endpoints
    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>, BackendError> {
        self.get_json("endpoints").await
    }

    /// Fetch a single endpoint by id
    pub async fn get_endpoint(&self, id: &str) -> Result<Endpoint, BackendError> {
        self.get_json(&format!("endpoints/{}", id)).await
    }

    /// Create an endpoint
    pub async fn create_endpoint(&self, draft: &EndpointDraft) -> Result<Endpoint, BackendError> {
        self.post_json("endpoints", draft).await
    }

    /// Replace an endpoint
    pub async fn update_endpoint(
        &self,
        id: &str,
        draft: &EndpointDraft,
    ) -> Result<Endpoint, BackendError> {
        self.put_json(&format!("endpoints/{}", id), draft).await
    }

    /// Delete an endpoint
    pub async fn delete_endpoint(&self, id: &str) -> Result<(), BackendError> {
        self.delete(&format!("endpoints/{}", id)).await
    }

    /// List all environments
    pub async fn list_environments(&self) -> Result<Vec<Environment>, BackendError> {
        self.get_json("environments").await
    }

    /// Fetch a single environment by id
    pub async fn get_environment(&self, id: &str) -> Result<Environment, BackendError> {
        self.get_json(&format!("environments/{}", id)).await
    }

    /// Create an environment
    pub async fn create_environment(
        &self,
        draft: &EnvironmentDraft,
    ) -> Result<Environment, BackendError> {
        self.post_json("environments", draft).await
    }

    /// Replace an environment
    pub async fn update_environment(
        &self,
        id: &str,
        draft: &EnvironmentDraft,
    ) -> Result<Environment, BackendError> {
        self.put_json(&format!("environments/{}", id), draft).await
    }

    /// Delete an environment
    pub async fn delete_environment(&self, id: &str) -> Result<(), BackendError> {
        self.delete(&format!("environments/{}", id)).await
    }
}

/// Sanitize error messages to prevent credential disclosure
fn sanitize_error_message(message: &str) -> String {
    let patterns = [
        (r"sk-[a-zA-Z0-9]{20,}", "sk-***"),
        (r"gh[pousr]_[A-Za-z0-9_]{36,}", "ghp_***"),
        (r"(?i)bearer\s+[a-zA-Z0-9._-]+", "Bearer ***"),
        (r"[a-zA-Z0-9_-]{40,}", "***REDACTED***"),
    ];

    let mut sanitized = message.to_string();

    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            sanitized = re.replace_all(&sanitized, replacement).to_string();
        }
    }

    if sanitized.len() > 256 {
        format!("{}... [truncated]", &sanitized[..256])
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_client(base_url: &str) -> BackendClient {
        BackendClient::new(BackendConfig {
            base_url: base_url.to_string(),
            api_token: SecretString::from("test-token"),
            timeout_seconds: 5,
        })
        .expect("valid test config")
    }

    #[test]
    fn join_preserves_base_path() {
        let client = test_client("https://api.example.com/v1");
        let url = client.join("projects").map(|u| u.to_string());
        assert_eq!(url.ok().as_deref(), Some("https://api.example.com/v1/projects"));

        let client = test_client("https://api.example.com/v1/");
        let url = client.join("projects").map(|u| u.to_string());
        assert_eq!(url.ok().as_deref(), Some("https://api.example.com/v1/projects"));
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = BackendClient::new(BackendConfig {
            base_url: "not a url".to_string(),
            api_token: SecretString::from(""),
            timeout_seconds: 5,
        });
        assert!(matches!(result, Err(BackendError::InvalidUrl(_))));
    }

    #[test]
    fn sanitizes_bearer_tokens() {
        let msg = sanitize_error_message("auth failed: Bearer abc123.def456");
        assert!(!msg.contains("abc123"));
        assert!(msg.contains("Bearer ***"));
    }

    #[tokio::test]
    async fn lists_projects_from_backend() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/projects")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(
                json!([{
                    "id": "p1",
                    "name": "Demo",
                    "created_at": "2026-01-01T00:00:00Z",
                    "updated_at": "2026-01-01T00:00:00Z"
                }])
                .to_string(),
            )
            .create_async()
            .await;

        let client = test_client(&server.url());
        let projects = client.list_projects().await.expect("list projects");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "Demo");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_endpoint_roundtrip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/endpoints")
            .with_status(201)
            .with_body(
                json!({
                    "id": "e1",
                    "project_id": "p1",
                    "name": "Ping",
                    "method": "GET",
                    "url": "https://example.com/ping"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = test_client(&server.url());
        let draft = EndpointDraft {
            project_id: "p1".to_string(),
            folder_id: None,
            name: "Ping".to_string(),
            method: "GET".to_string(),
            url: "https://example.com/ping".to_string(),
            headers: None,
            body: None,
            timeout_ms: None,
        };
        let endpoint = client.create_endpoint(&draft).await.expect("create endpoint");
        assert_eq!(endpoint.id, "e1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn surfaces_backend_errors_sanitized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects")
            .with_status(403)
            .with_body("forbidden for Bearer super.secret.token")
            .create_async()
            .await;

        let client = test_client(&server.url());
        let err = client.list_projects().await.err();
        match err {
            Some(BackendError::UnexpectedStatus { status, message }) => {
                assert_eq!(status, 403);
                assert!(!message.contains("super.secret.token"));
            }
            other => panic!("expected UnexpectedStatus, got {:?}", other),
        }
    }
}
