use apiflow_protocol::models::FlowDefinition;
use serde::de::Error;
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Errors that can occur during flow definition loading
#[derive(Debug, ThisError)]
pub enum LoaderError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path traversal detected
    #[error("Path traversal detected: file '{0}' is outside allowed directory")]
    PathTraversal(PathBuf),

    /// Failed to parse JSON
    #[error("Failed to parse JSON in {path}: {source}")]
    ParseJson {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML in {path}: {source}")]
    ParseToml {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// Failed to parse YAML
    #[error("Failed to parse YAML in {path}: {source}")]
    ParseYaml {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: serde_yaml::Error,
    },

    /// Path canonicalization failed
    #[error("Failed to canonicalize path {path}: {source}")]
    Canonicalization {
        /// The path that failed
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// The definition parsed but is structurally unusable
    #[error("Invalid flow definition in {path}: {reason}")]
    InvalidDefinition {
        /// File path
        path: PathBuf,
        /// What is wrong
        reason: String,
    },
}

/// Loader for file-based flow definitions
///
/// Scans a directory for `.json`, `.yaml`, `.yml`, and `.toml` files, each
/// holding one [`FlowDefinition`]. Files that fail to parse are skipped with
/// a warning so one broken definition cannot hide the rest.
#[derive(Debug, Clone)]
pub struct FlowLoader {
    root_path: PathBuf,
}

impl FlowLoader {
    /// Create a new loader for the given directory
    pub fn new(root_path: impl AsRef<Path>) -> Self {
        Self {
            root_path: root_path.as_ref().to_path_buf(),
        }
    }

    /// Load all flow definitions from the root directory
    pub fn load(&self) -> Result<Vec<FlowDefinition>, LoaderError> {
        let mut definitions = Vec::new();
        info!("Scanning flow definitions from: {}", self.root_path.display());

        for entry in WalkDir::new(&self.root_path)
            .follow_links(false)
            .max_depth(5)
            .into_iter()
            .filter_entry(|e| !should_ignore_dir_entry(e))
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() {
                if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "toml" | "yaml" | "yml") {
                        match self.load_flow_file(path) {
                            Ok(flow) => definitions.push(flow),
                            Err(e) => {
                                warn!("Failed to load flow file {}: {}", path.display(), e)
                            }
                        }
                    }
                }
            }
        }

        info!("Loaded {} flow definitions", definitions.len());
        Ok(definitions)
    }

    fn load_flow_file(&self, path: &Path) -> Result<FlowDefinition, LoaderError> {
        // The file must live under the configured root (no traversal via
        // symlinks or relative segments).
        let canonical_path = path
            .canonicalize()
            .map_err(|e| LoaderError::Canonicalization {
                path: path.to_path_buf(),
                source: e,
            })?;
        let canonical_root =
            self.root_path
                .canonicalize()
                .map_err(|e| LoaderError::Canonicalization {
                    path: self.root_path.clone(),
                    source: e,
                })?;

        if !canonical_path.starts_with(&canonical_root) {
            return Err(LoaderError::PathTraversal(path.to_path_buf()));
        }

        parse_flow_file(&canonical_path)
    }
}

/// Parse a single flow definition file, dispatching on its extension
pub fn parse_flow_file(path: &Path) -> Result<FlowDefinition, LoaderError> {
    let content = std::fs::read_to_string(path)?;

    let flow: FlowDefinition = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| LoaderError::ParseJson {
            path: path.to_path_buf(),
            source: e,
        })?,
        Some("toml") => toml::from_str(&content).map_err(|e| LoaderError::ParseToml {
            path: path.to_path_buf(),
            source: e,
        })?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| LoaderError::ParseYaml {
                path: path.to_path_buf(),
                source: e,
            })?
        }
        _ => {
            return Err(LoaderError::ParseYaml {
                path: path.to_path_buf(),
                source: serde_yaml::Error::custom(
                    "Unsupported file extension, expected .json, .toml, .yaml, or .yml",
                ),
            })
        }
    };

    if flow.id.is_empty() {
        return Err(LoaderError::InvalidDefinition {
            path: path.to_path_buf(),
            reason: "flow id is empty".to_string(),
        });
    }

    Ok(flow)
}

fn should_ignore_dir_entry(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }

    let name = entry.file_name().to_string_lossy();
    matches!(
        name.as_ref(),
        ".git" | "node_modules" | "dist" | "build" | "target" | "__pycache__"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_json_and_yaml_definitions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        fs::write(
            root.join("smoke.json"),
            r#"{
                "id": "smoke",
                "name": "Smoke",
                "steps": [
                    { "id": "s1", "name": "ping", "method": "GET", "url": "https://api.test/ping" }
                ]
            }"#,
        )
        .expect("write json");

        fs::write(
            root.join("login.yaml"),
            r#"
id: login
name: Login
steps:
  - id: s1
    name: auth
    method: POST
    url: "{{env.base_url}}/login"
config:
  stop_on_error: true
"#,
        )
        .expect("write yaml");

        let loader = FlowLoader::new(root);
        let mut flows = loader.load().expect("load flows");
        flows.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].id, "login");
        assert_eq!(flows[1].id, "smoke");
        assert_eq!(flows[0].steps[0].url.as_deref(), Some("{{env.base_url}}/login"));
    }

    #[test]
    fn skips_vendored_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        fs::write(
            root.join("valid.json"),
            r#"{ "id": "valid", "name": "Valid", "steps": [ { "id": "s1", "name": "s1", "method": "GET", "url": "https://x" } ] }"#,
        )
        .expect("write valid");

        fs::create_dir_all(root.join("node_modules/somepkg")).expect("mkdir node_modules");
        fs::write(
            root.join("node_modules/somepkg/should_not_load.json"),
            r#"{ "id": "nope", "name": "Nope", "steps": [] }"#,
        )
        .expect("write ignored");

        let loader = FlowLoader::new(root);
        let flows = loader.load().expect("load flows");

        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].id, "valid");
    }

    #[test]
    fn broken_files_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        fs::write(root.join("broken.json"), "{ not json").expect("write broken");
        fs::write(
            root.join("ok.json"),
            r#"{ "id": "ok", "name": "Ok", "steps": [ { "id": "s1", "name": "s1", "method": "GET", "url": "https://x" } ] }"#,
        )
        .expect("write ok");

        let loader = FlowLoader::new(root);
        let flows = loader.load().expect("load flows");
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].id, "ok");
    }

    #[test]
    fn empty_flow_id_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let path = root.join("anon.json");
        fs::write(
            &path,
            r#"{ "id": "", "name": "Anon", "steps": [ { "id": "s1", "name": "s1", "method": "GET", "url": "https://x" } ] }"#,
        )
        .expect("write anon");

        let loader = FlowLoader::new(root);
        let result = loader.load_flow_file(&path);
        assert!(matches!(result, Err(LoaderError::InvalidDefinition { .. })));
    }
}
