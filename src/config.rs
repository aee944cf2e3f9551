//! Configuration parsing and validation for textgate.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Inference backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the OpenAI-compatible API (e.g., "http://127.0.0.1:8800/v1")
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Model identifier sent with every completion request
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound on the whole backend call, streaming included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on establishing the backend connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8800/v1".to_string()
}

fn default_model() -> String {
    "gemma-3-12b-it".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Inbound authentication configuration.
///
/// A missing key does not fail config loading; it makes every request fail
/// with a server error instead (the guard fails closed).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Shared secret callers must present in the X-Api-Key header
    pub api_key: Option<ApiKey>,
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The inner `SecretString` ensures the key value is:
/// - Zeroized in memory when dropped
/// - Never exposed via Debug or Display
/// - Only accessible via `.expose_secret()` (grep-auditable)
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Convention env var consulted when `[auth] api_key` is absent.
pub const CONVENTION_KEY_VAR: &str = "TEXTGATE_API_KEY";

/// How the inbound API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was taken from the convention env var (holds var name)
    Convention(String),
    /// No key available; every request will be rejected
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.url.is_empty() {
            return Err(ConfigError::Validation("Backend URL is empty".to_string()));
        }

        if self.backend.model.is_empty() {
            return Err(ConfigError::Validation(
                "Backend model identifier is empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set: {message}")]
    EnvVar { var: String, message: String },
}

/// Raw auth config deserialized directly from TOML.
/// api_key is `Option<String>` so it may contain `${VAR}` references not yet expanded.
#[derive(Default, Deserialize)]
pub struct RawAuthConfig {
    api_key: Option<String>,
}

/// Raw configuration deserialized directly from TOML.
/// The auth api_key value may contain `${VAR}` references not yet expanded.
#[derive(Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    backend: BackendConfig,
    #[serde(default)]
    auth: RawAuthConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// The closure-based design makes this testable without touching global env state.
/// Supports multiple `${VAR}` in one string.
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            message: format!("Environment variable '{}' is not set", var_name),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references in a string using real environment variables.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, |name| std::env::var(name).ok())
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For the inbound key:
    /// - If `api_key` contains `${VAR}`: expand from environment, source = `EnvExpanded`
    /// - If `api_key` is a literal string: wrap directly, source = `Literal`
    /// - If `api_key` is absent: try the convention env var (`TEXTGATE_API_KEY`),
    ///   source = `Convention(var_name)` or `KeySource::None`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, KeySource), ConfigError> {
        let (api_key, source) = match raw.auth.api_key {
            Some(ref raw_key) if raw_key.contains("${") => {
                let expanded = expand_env_vars(raw_key)?;
                (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
            }
            Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
            None => match std::env::var(CONVENTION_KEY_VAR) {
                Ok(value) => (
                    Some(ApiKey::from(value)),
                    KeySource::Convention(CONVENTION_KEY_VAR.to_string()),
                ),
                Err(_) => (None, KeySource::None),
            },
        };

        let config = Config {
            server: raw.server,
            backend: raw.backend,
            auth: AuthConfig { api_key },
            logging: raw.logging,
        };

        Ok((config, source))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// This is the env-var-aware entry point. It:
    /// 1. Reads the file
    /// 2. Parses as `RawConfig` (api_key as plain String)
    /// 3. Expands `${VAR}` references and applies the convention lookup
    /// 4. Validates the resulting config
    ///
    /// Returns the config and how the key was resolved.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<(Self, KeySource), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, source) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"
        "#;

        let config = Config::parse_str(toml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert!(config.auth.api_key.is_none());
        assert_eq!(config.backend.url, "http://127.0.0.1:8800/v1");
        assert_eq!(config.backend.timeout_secs, 120);
        assert_eq!(config.backend.connect_timeout_secs, 10);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:8000"

            [backend]
            url = "http://gpu-box:8800/v1"
            model = "test-model"
            timeout_secs = 60
            connect_timeout_secs = 5

            [auth]
            api_key = "shared-secret"

            [logging]
            level = "debug"
        "#;

        let config = Config::parse_str(toml).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8000");
        assert_eq!(config.backend.url, "http://gpu-box:8800/v1");
        assert_eq!(config.backend.model, "test-model");
        assert_eq!(config.backend.timeout_secs, 60);
        assert_eq!(config.logging.level, "debug");
        assert!(config.auth.api_key.is_some());
    }

    #[test]
    fn test_empty_backend_url_rejected() {
        let toml = r#"
            [backend]
            url = ""
        "#;

        assert!(Config::parse_str(toml).is_err());
    }

    #[test]
    fn test_empty_model_rejected() {
        let toml = r#"
            [backend]
            model = ""
        "#;

        assert!(Config::parse_str(toml).is_err());
    }

    #[test]
    fn test_api_key_debug_redaction() {
        let key = ApiKey::from("super-secret-value");
        let debug_output = format!("{:?}", key);
        assert_eq!(debug_output, "[REDACTED]");
        assert!(!debug_output.contains("super-secret"));
    }

    #[test]
    fn test_api_key_display_redaction() {
        let key = ApiKey::from("super-secret-value");
        let display_output = format!("{}", key);
        assert_eq!(display_output, "[REDACTED]");
        assert!(!display_output.contains("super-secret"));
    }

    #[test]
    fn test_api_key_serialize_redaction() {
        let key = ApiKey::from("real-secret-value");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
        assert!(!json.contains("real-secret"));
    }

    #[test]
    fn test_api_key_expose_secret() {
        let key = ApiKey::from("the-actual-value");
        assert_eq!(key.expose_secret(), "the-actual-value");
    }

    #[test]
    fn test_auth_config_debug_redaction() {
        let config = AuthConfig {
            api_key: Some(ApiKey::from("sk-1234secret")),
        };
        let debug_output = format!("{:?}", config);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("sk-1234secret"),
            "Debug output must not contain actual key"
        );
    }

    #[test]
    fn test_api_key_toml_deserialization() {
        let toml = r#"
            [auth]
            api_key = "sk-1234secret"
        "#;

        let config = Config::parse_str(toml).unwrap();
        assert_eq!(
            config.auth.api_key.as_ref().unwrap().expose_secret(),
            "sk-1234secret"
        );
        let debug = format!("{:?}", config.auth);
        assert!(!debug.contains("sk-1234secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    // ── File loading tests ──

    #[test]
    fn test_from_file_with_env_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                [server]
                listen = "127.0.0.1:9100"

                [auth]
                api_key = "file-secret"
            "#,
        )
        .unwrap();

        let (config, source) = Config::from_file_with_env(&path).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9100");
        assert_eq!(source, KeySource::Literal);
        assert_eq!(
            config.auth.api_key.as_ref().unwrap().expose_secret(),
            "file-secret"
        );
    }

    #[test]
    fn test_from_file_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    // ── Expansion tests (using expand_env_vars_with, no global env state) ──

    #[test]
    fn test_expand_single_var() {
        let lookup = |name: &str| match name {
            "MY_KEY" => Some("resolved-key".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${MY_KEY}", lookup).unwrap();
        assert_eq!(result, "resolved-key");
    }

    #[test]
    fn test_expand_multiple_vars() {
        let lookup = |name: &str| match name {
            "SCHEME" => Some("https".to_string()),
            "HOST" => Some("example.com".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${SCHEME}://${HOST}/v1", lookup).unwrap();
        assert_eq!(result, "https://example.com/v1");
    }

    #[test]
    fn test_expand_no_vars_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("literal-value", lookup).unwrap();
        assert_eq!(result, "literal-value");
    }

    #[test]
    fn test_expand_mixed_literal_and_var() {
        let lookup = |name: &str| match name {
            "KEY" => Some("resolved".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("prefix-${KEY}-suffix", lookup).unwrap();
        assert_eq!(result, "prefix-resolved-suffix");
    }

    #[test]
    fn test_expand_missing_var_fails() {
        let lookup = |_: &str| None;
        let result = expand_env_vars_with("${MISSING}", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("MISSING"), "Error should name the variable");
    }

    #[test]
    fn test_expand_unclosed_brace_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("${UNCLOSED", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string().to_lowercase();
        assert!(
            err.contains("unclosed"),
            "Error should mention unclosed brace"
        );
    }

    #[test]
    fn test_expand_empty_var_name_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("${}", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string().to_lowercase();
        assert!(
            err.contains("empty"),
            "Error should mention empty variable name"
        );
    }

    #[test]
    fn test_expand_dollar_without_brace_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("$NOT_A_VAR", lookup).unwrap();
        assert_eq!(result, "$NOT_A_VAR");
    }

    // ── from_raw integration tests ──

    /// Helper to construct a minimal RawConfig with the given raw key value.
    fn make_raw_config(api_key: Option<String>) -> RawConfig {
        RawConfig {
            auth: RawAuthConfig { api_key },
            ..RawConfig::default()
        }
    }

    #[test]
    fn test_from_raw_literal_key() {
        let raw = make_raw_config(Some("literal-key-value".to_string()));
        let (config, source) = Config::from_raw(raw).unwrap();

        assert_eq!(source, KeySource::Literal);
        assert_eq!(
            config.auth.api_key.as_ref().unwrap().expose_secret(),
            "literal-key-value"
        );
    }

    #[test]
    fn test_from_raw_env_expanded_key() {
        // Use a unique env var name to avoid parallel test interference
        let var_name = "TEXTGATE_TEST_EXPAND_KEY";
        let var_value = "expanded-token-abc123";
        std::env::set_var(var_name, var_value);

        let raw = make_raw_config(Some(format!("${{{}}}", var_name)));
        let (config, source) = Config::from_raw(raw).unwrap();

        assert_eq!(source, KeySource::EnvExpanded);
        assert_eq!(
            config.auth.api_key.as_ref().unwrap().expose_secret(),
            var_value
        );

        std::env::remove_var(var_name);
    }

    // Convention lookup and its absence share one global env var, so both
    // cases live in a single test to avoid parallel interference.
    #[test]
    fn test_from_raw_convention_key_and_no_key() {
        std::env::set_var(CONVENTION_KEY_VAR, "convention-token-xyz789");
        let (config, source) = Config::from_raw(make_raw_config(None)).unwrap();
        assert_eq!(source, KeySource::Convention(CONVENTION_KEY_VAR.to_string()));
        assert_eq!(
            config.auth.api_key.as_ref().unwrap().expose_secret(),
            "convention-token-xyz789"
        );

        std::env::remove_var(CONVENTION_KEY_VAR);
        let (config, source) = Config::from_raw(make_raw_config(None)).unwrap();
        assert_eq!(source, KeySource::None);
        assert!(config.auth.api_key.is_none());
    }

    #[test]
    fn test_from_raw_missing_env_var_fails() {
        let var_name = "TEXTGATE_TEST_DEFINITELY_MISSING";
        std::env::remove_var(var_name);

        let raw = make_raw_config(Some(format!("${{{}}}", var_name)));
        let result = Config::from_raw(raw);

        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains(var_name),
            "Error should name the variable: {}",
            err
        );
    }
}
