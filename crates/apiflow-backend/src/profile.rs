//! Workbench profile management
//!
//! Provides:
//! - Profile configuration (backend URL, token source, timeouts)
//! - Seed values for the session `env` and `config` scopes
//! - Persistent storage in the platform data directory

use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::{BackendConfig, BackendError};

/// Errors that can occur during profile operations
#[derive(Debug, Error)]
pub enum ProfileError {
    /// IO operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The token environment variable is missing or empty
    #[error("API token not found in environment variable {0}")]
    MissingToken(String),
}

/// Persistent workbench configuration
///
/// Stored as `workbench.json` in the platform data directory. The API token
/// itself never touches disk; the profile only names the environment variable
/// that holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbenchProfile {
    /// Base URL of the remote backend
    pub backend_url: String,
    /// Environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub api_token_env: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Seed values for the session `env` scope
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Seed values for the session `config` scope
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Directory scanned for on-disk flow definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_dir: Option<PathBuf>,
}

fn default_token_env() -> String {
    "APIFLOW_API_TOKEN".to_string()
}

fn default_timeout_s() -> u64 {
    30
}

impl Default for WorkbenchProfile {
    fn default() -> Self {
        Self {
            backend_url: "https://api.apiflow.dev/v1".to_string(),
            api_token_env: default_token_env(),
            timeout_s: default_timeout_s(),
            environment: HashMap::new(),
            config: HashMap::new(),
            flow_dir: None,
        }
    }
}

impl WorkbenchProfile {
    /// Resolve the bearer token from the configured environment variable
    pub fn resolve_token(&self) -> Result<SecretString, ProfileError> {
        match std::env::var(&self.api_token_env) {
            Ok(token) if !token.is_empty() => Ok(SecretString::from(token)),
            _ => Err(ProfileError::MissingToken(self.api_token_env.clone())),
        }
    }

    /// Build a backend client config from this profile
    pub fn backend_config(&self) -> Result<BackendConfig, ProfileError> {
        Ok(BackendConfig {
            base_url: self.backend_url.clone(),
            api_token: self.resolve_token()?,
            timeout_seconds: self.timeout_s,
        })
    }

    /// Build a backend client directly from this profile
    pub fn build_client(&self) -> Result<crate::BackendClient, anyhow::Error> {
        let config = self.backend_config()?;
        crate::BackendClient::new(config).map_err(|e: BackendError| e.into())
    }
}

/// Trait for profile persistence
pub trait ProfileStore: Send + Sync {
    /// Get the path to the profile file
    fn profile_path(&self) -> PathBuf;

    /// Load the profile from disk, falling back to defaults when absent
    fn load_profile(&self) -> Result<WorkbenchProfile, ProfileError> {
        let p = self.profile_path();
        if !p.exists() {
            debug!(path = %p.display(), "Profile file does not exist, using defaults");
            return Ok(WorkbenchProfile::default());
        }
        let data = fs::read_to_string(p)?;
        let profile: WorkbenchProfile = serde_json::from_str(&data)?;
        info!(backend = %profile.backend_url, "Loaded workbench profile");
        Ok(profile)
    }

    /// Save the profile to disk
    fn save_profile(&self, profile: &WorkbenchProfile) -> Result<(), ProfileError> {
        let p = self.profile_path();
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(profile)?;
        fs::write(p, data)?;
        info!(backend = %profile.backend_url, "Saved workbench profile");
        Ok(())
    }
}

/// Default implementation using the standard data directory
#[derive(Debug, Clone, Default)]
pub struct DefaultProfileStore;

impl ProfileStore for DefaultProfileStore {
    fn profile_path(&self) -> PathBuf {
        let mut base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        base.push("apiflow-workbench");
        base.push("workbench.json");
        base
    }
}

/// File-backed store rooted at an explicit path, for tests and overrides
#[derive(Debug, Clone)]
pub struct FileProfileStore {
    path: PathBuf,
}

impl FileProfileStore {
    /// Create a store reading and writing the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProfileStore for FileProfileStore {
    fn profile_path(&self) -> PathBuf {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_profile_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileProfileStore::new(dir.path().join("workbench.json"));

        let profile = store.load_profile().expect("load profile");
        assert_eq!(profile.backend_url, "https://api.apiflow.dev/v1");
        assert_eq!(profile.api_token_env, "APIFLOW_API_TOKEN");
    }

    #[test]
    fn profile_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileProfileStore::new(dir.path().join("workbench.json"));

        let mut profile = WorkbenchProfile {
            backend_url: "https://backend.test/v2".to_string(),
            ..Default::default()
        };
        profile
            .environment
            .insert("base_url".to_string(), "https://api.test".to_string());
        profile
            .config
            .insert("retries".to_string(), json!(0));

        store.save_profile(&profile).expect("save profile");
        let loaded = store.load_profile().expect("load profile");
        assert_eq!(loaded.backend_url, "https://backend.test/v2");
        assert_eq!(loaded.environment.get("base_url").map(String::as_str), Some("https://api.test"));
        assert_eq!(loaded.config.get("retries"), Some(&json!(0)));
    }

    #[test]
    fn resolve_token_reports_missing_var() {
        let profile = WorkbenchProfile {
            api_token_env: "APIFLOW_TEST_TOKEN_DOES_NOT_EXIST".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            profile.resolve_token(),
            Err(ProfileError::MissingToken(_))
        ));
    }
}
