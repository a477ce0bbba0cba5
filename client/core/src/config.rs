//! Client configuration.
//!
//! Settings layer in a fixed order: built-in defaults, then an optional
//! TOML file, then `CHATKIT_*` environment variables. Surfaces apply
//! their own flags on top of whatever this module loads. Invalid values
//! in the file or environment are logged and skipped rather than
//! aborting startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Temperature ceiling accepted by the completion endpoint.
pub const MAX_TEMPERATURE: f32 = 2.0;

/// A provider service and a model within it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct ProviderTarget {
    /// Provider service name as the endpoint knows it.
    pub service: String,
    /// Model identifier within the service.
    pub model: String,
}

impl ProviderTarget {
    /// Create a provider target.
    pub fn new(service: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            model: model.into(),
        }
    }

    /// `service/model` label shown on delivered messages and in logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}", self.service, self.model)
    }
}

/// Everything the client needs to issue completion requests.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Completions endpoint URL.
    pub endpoint: String,
    /// Provider used for the first attempt of every exchange.
    pub primary: ProviderTarget,
    /// Standby provider engaged only after a rate limit.
    pub secondary: Option<ProviderTarget>,
    /// Sampling temperature, clamped to `0.0..=MAX_TEMPERATURE`.
    pub temperature: f32,
    /// Deadline for one attempt, measured from request issuance and
    /// covering both response wait and body streaming.
    pub request_timeout: Duration,
    /// Whether to request the chunked record stream. When false the
    /// client waits for a single response object.
    pub streaming: bool,
    /// Bound of the consumer update channel.
    pub channel_capacity: usize,
    /// Session id storage file. `None` falls back to the XDG data dir.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/chat/completions".to_string(),
            primary: ProviderTarget::new("openai", "gpt-4o-mini"),
            secondary: None,
            temperature: 0.7,
            request_timeout: Duration::from_secs(120),
            streaming: true,
            channel_capacity: 64,
            session_file: None,
        }
    }
}

/// Errors from explicit config file loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The file was not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk schema. Every field is optional; absent fields keep the
/// layered value.
#[derive(Debug, Default, Deserialize)]
struct ClientToml {
    endpoint: Option<String>,
    service: Option<String>,
    model: Option<String>,
    fallback_service: Option<String>,
    fallback_model: Option<String>,
    temperature: Option<f32>,
    request_timeout_secs: Option<u64>,
    streaming: Option<bool>,
    channel_capacity: Option<usize>,
    session_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Load defaults, the default config file when present, and the
    /// environment, in that order.
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Some(path) = default_config_path() {
            if path.exists() {
                match Self::load_from_path(&path) {
                    Ok(loaded) => config = loaded,
                    Err(err) => warn!(error = %err, "Ignoring unreadable config file"),
                }
            }
        }
        config.apply_env();
        config
    }

    /// Load defaults, the given file (which must exist and parse), and
    /// the environment.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ClientToml = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env();
        Ok(config)
    }

    /// Build from defaults plus environment only.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_file(&mut self, file: ClientToml) {
        if let Some(endpoint) = file.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(service) = file.service {
            self.primary.service = service;
        }
        if let Some(model) = file.model {
            self.primary.model = model;
        }
        self.set_secondary(file.fallback_service, file.fallback_model);
        if let Some(temperature) = file.temperature {
            self.temperature = clamp_temperature(temperature);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(streaming) = file.streaming {
            self.streaming = streaming;
        }
        if let Some(capacity) = file.channel_capacity {
            self.channel_capacity = capacity.max(1);
        }
        if file.session_file.is_some() {
            self.session_file = file.session_file;
        }
    }

    /// Apply `CHATKIT_*` environment overrides in place.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("CHATKIT_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(service) = std::env::var("CHATKIT_SERVICE") {
            self.primary.service = service;
        }
        if let Ok(model) = std::env::var("CHATKIT_MODEL") {
            self.primary.model = model;
        }
        self.set_secondary(
            std::env::var("CHATKIT_FALLBACK_SERVICE").ok(),
            std::env::var("CHATKIT_FALLBACK_MODEL").ok(),
        );
        if let Some(temperature) = std::env::var("CHATKIT_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.temperature = clamp_temperature(temperature);
        }
        if let Some(secs) = std::env::var("CHATKIT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(streaming) = std::env::var("CHATKIT_STREAMING") {
            self.streaming = streaming == "1" || streaming.eq_ignore_ascii_case("true");
        }
        if let Ok(path) = std::env::var("CHATKIT_SESSION_FILE") {
            self.session_file = Some(PathBuf::from(path));
        }
    }

    /// Set the standby provider when both halves are present. One half
    /// without the other is logged and dropped; a dangling service or
    /// model cannot be dispatched.
    pub fn set_secondary(&mut self, service: Option<String>, model: Option<String>) {
        match (service, model) {
            (Some(service), Some(model)) => {
                self.secondary = Some(ProviderTarget::new(service, model));
            }
            (Some(service), None) => {
                warn!(service = %service, "Fallback service given without a model, ignored");
            }
            (None, Some(model)) => {
                warn!(model = %model, "Fallback model given without a service, ignored");
            }
            (None, None) => {}
        }
    }

    /// Set the endpoint URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the primary provider.
    #[must_use]
    pub fn with_primary(mut self, primary: ProviderTarget) -> Self {
        self.primary = primary;
        self
    }

    /// Set the standby provider.
    #[must_use]
    pub fn with_secondary(mut self, secondary: ProviderTarget) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Set the sampling temperature, clamped to the accepted range.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = clamp_temperature(temperature);
        self
    }

    /// Set the per-attempt deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable or disable the chunked record stream.
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Set the session id storage file.
    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Resolve the session storage path: the explicit override, or the
    /// XDG data dir fallback.
    #[must_use]
    pub fn session_path(&self) -> Option<PathBuf> {
        self.session_file
            .clone()
            .or_else(crate::session::SessionStore::default_path)
    }
}

/// Default config file location under the XDG config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chatkit").join("config.toml"))
}

fn clamp_temperature(temperature: f32) -> f32 {
    if !temperature.is_finite() {
        warn!(temperature = temperature, "Non-finite temperature, using 0.0");
        return 0.0;
    }
    temperature.clamp(0.0, MAX_TEMPERATURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.streaming);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.primary.label(), "openai/gpt-4o-mini");
        assert!(config.secondary.is_none());
    }

    #[test]
    fn test_temperature_clamped() {
        assert_eq!(ClientConfig::default().with_temperature(3.5).temperature, 2.0);
        assert_eq!(
            ClientConfig::default().with_temperature(-0.1).temperature,
            0.0
        );
        assert_eq!(
            ClientConfig::default()
                .with_temperature(f32::NAN)
                .temperature,
            0.0
        );
    }

    #[test]
    fn test_file_layer() {
        let file: ClientToml = toml::from_str(
            r#"
            endpoint = "http://example.test/v1/chat"
            service = "mistral"
            model = "mistral-small"
            fallback_service = "ollama"
            fallback_model = "llama3.2"
            temperature = 0.2
            request_timeout_secs = 30
            streaming = false
            "#,
        )
        .unwrap();
        let mut config = ClientConfig::default();
        config.apply_file(file);

        assert_eq!(config.endpoint, "http://example.test/v1/chat");
        assert_eq!(config.primary.label(), "mistral/mistral-small");
        assert_eq!(
            config.secondary,
            Some(ProviderTarget::new("ollama", "llama3.2"))
        );
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(!config.streaming);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file: ClientToml = toml::from_str(r#"model = "gpt-4o""#).unwrap();
        let mut config = ClientConfig::default();
        config.apply_file(file);

        assert_eq!(config.primary.service, "openai");
        assert_eq!(config.primary.model, "gpt-4o");
        assert_eq!(config.endpoint, ClientConfig::default().endpoint);
    }

    #[test]
    fn test_dangling_fallback_half_ignored() {
        let mut config = ClientConfig::default();
        config.set_secondary(Some("ollama".to_string()), None);
        assert!(config.secondary.is_none());

        config.set_secondary(None, Some("llama3.2".to_string()));
        assert!(config.secondary.is_none());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "service = \"mistral\"\nmodel = \"tiny\"\n").unwrap();

        let config = ClientConfig::load_from_path(&path).unwrap();
        assert_eq!(config.primary.service, "mistral");

        let missing = ClientConfig::load_from_path(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        std::fs::write(&path, "model = [not, toml").unwrap();
        let malformed = ClientConfig::load_from_path(&path);
        assert!(matches!(malformed, Err(ConfigError::Parse { .. })));
    }
}
