//! Configuration for the markitdown conversion client.
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` substitution, then
//! overridden by `MARKITDOWN_*` environment variables and validated.

use markitdown_core::{MarkitdownError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod env_substitution;

pub use env_substitution::substitute_env_vars;

/// Path prefix under which the backend relays markitdown traffic.
pub const MARKITDOWN_PREFIX: &str = "/api/markitdown";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkitdownConfig {
    /// Base URL of the backend relay, e.g. `http://localhost:3000`
    pub backend_url: String,

    /// SSE subscription URL. Derived from `backend_url` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sse_url: Option<String>,

    /// Per-call deadline in milliseconds
    pub request_timeout_ms: u64,

    /// How long callers wait for the handshake to complete
    pub handshake_timeout_ms: u64,

    pub protocol_version: String,

    pub client_info: ClientIdentity,

    /// Extra headers sent with the SSE subscription and every POST
    pub headers: HashMap<String, String>,

    /// Capacity of the event buffer between the SSE reader and the dispatcher
    pub event_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "learnify".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for MarkitdownConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            sse_url: None,
            request_timeout_ms: default_request_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            protocol_version: default_protocol_version(),
            client_info: ClientIdentity::default(),
            headers: HashMap::new(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl MarkitdownConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MarkitdownError::ConfigError(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut raw: Value = if yaml.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| MarkitdownError::ConfigError(format!("Failed to parse YAML: {}", e)))?
        };

        if raw.is_null() {
            raw = Value::Object(Default::default());
        }
        substitute_env_vars(&mut raw)?;

        let mut config: MarkitdownConfig = serde_json::from_value(raw)
            .map_err(|e| MarkitdownError::ConfigError(format!("Invalid configuration: {}", e)))?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults plus
    /// environment overrides.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            debug!("Loading markitdown configuration from {:?}", path);
            Self::from_yaml(path)
        } else {
            debug!("No configuration at {:?}, using defaults", path);
            let mut config = Self::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("MARKITDOWN_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Ok(url) = env::var("MARKITDOWN_SSE_URL") {
            self.sse_url = Some(url);
        }
    }

    fn validate(&self) -> Result<()> {
        if !is_http_url(&self.backend_url) {
            return Err(MarkitdownError::ConfigError(format!(
                "backend_url must start with http:// or https://, got '{}'",
                self.backend_url
            )));
        }
        if let Some(sse_url) = &self.sse_url {
            if !is_http_url(sse_url) {
                return Err(MarkitdownError::ConfigError(format!(
                    "sse_url must start with http:// or https://, got '{}'",
                    sse_url
                )));
            }
        }
        if self.request_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(MarkitdownError::ConfigError("Timeouts must be greater than zero".into()));
        }
        if self.event_buffer == 0 {
            return Err(MarkitdownError::ConfigError("event_buffer must be greater than zero".into()));
        }
        if self.protocol_version.is_empty() {
            return Err(MarkitdownError::ConfigError("protocol_version cannot be empty".into()));
        }
        Ok(())
    }

    pub fn sse_url(&self) -> String {
        match &self.sse_url {
            Some(url) => url.clone(),
            None => format!("{}{}/sse", self.backend_url.trim_end_matches('/'), MARKITDOWN_PREFIX),
        }
    }

    /// URL that requests for the session at `endpoint` are POSTed to.
    pub fn post_url(&self, endpoint: &str) -> String {
        format!("{}{}{}", self.backend_url.trim_end_matches('/'), MARKITDOWN_PREFIX, endpoint)
    }

    pub fn default_config_path() -> PathBuf {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home_dir).join(".learnify").join("markitdown.yaml")
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn default_backend_url() -> String { "http://localhost:3000".to_string() }
fn default_request_timeout() -> u64 { 30_000 }
fn default_handshake_timeout() -> u64 { 10_000 }
fn default_protocol_version() -> String { "2024-11-05".to_string() }
fn default_event_buffer() -> usize { 100 }
