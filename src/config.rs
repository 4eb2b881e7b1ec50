//! Configuration management for chatrelay
//!
//! Parses TOML configuration files, layers environment overrides on top and
//! provides typed access to settings. Every section has defaults, so an empty
//! file (or no file at all) plus the usual Azure environment variables is a
//! complete configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Azure OpenAI token audience used by managed identity
pub const COGNITIVE_SERVICES_RESOURCE: &str = "https://cognitiveservices.azure.com";

/// Default instruction prepended to every conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "Assistant helps the user with cooking questions. Be brief in your answers. Answer only plain text, DO NOT use Markdown.

Generate 3 very brief follow-up questions that the user would likely ask next, based on the context.
Enclose the follow-up questions in double angle brackets. Example:
<<What ingredients I need to bake cookies?>>
<<What flavour can I use in my cookies?>>
<<How long should I put it in the oven?>>

Do no repeat questions that have already been asked.
Make sure the last question ends with \">>\".
";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bounds a non-streaming upstream call and the time to first byte of a streaming one
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7071
}

fn default_request_timeout() -> u64 {
    30
}

/// How the relay authenticates against the upstream provider
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Bearer token from the ambient managed identity
    #[default]
    ManagedIdentity,
    /// Static `api-key` header
    ApiKey,
}

/// API key wrapper that never prints its value
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Upstream completion provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub auth: AuthMode,
    #[serde(default)]
    pub api_key: Option<ApiKey>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    system_prompt: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            deployment: default_deployment(),
            api_version: default_api_version(),
            auth: AuthMode::default(),
            api_key: None,
            temperature: default_temperature(),
            system_prompt: None,
        }
    }
}

impl ProviderConfig {
    /// System instruction prepended to every conversation
    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    /// Whether the endpoint points at a local emulator that accepts any token
    pub fn is_local_emulator(&self) -> bool {
        self.endpoint.starts_with("http://localhost") || self.endpoint.starts_with("http://127.0.0.1")
    }
}

fn default_endpoint() -> String {
    "http://localhost:4041".to_string()
}

fn default_deployment() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_version() -> String {
    "2024-10-21".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

/// End-user security context settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub application_name: Option<String>,
    /// Tenant attached to Entra ID principals
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Forward the security context to the upstream provider
    #[serde(default)]
    pub attach_user_context: bool,
}

/// Log line encoding
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event, for log collectors
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self = toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
            path: path_display.clone(),
            source,
        })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Load the file if it exists, then apply process environment overrides
    ///
    /// A missing file is not an error: hosted deployments usually configure
    /// the relay through app settings alone.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let mut config = if path.as_ref().exists() {
            Self::from_file(path.as_ref())?
        } else {
            tracing::info!(path = %path_display, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Apply environment-style overrides through `lookup`
    ///
    /// Empty values are treated as unset.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(endpoint) = get("AZURE_OPENAI_API_ENDPOINT") {
            self.provider.endpoint = endpoint;
        }
        if let Some(key) = get("AZURE_OPENAI_API_KEY") {
            self.provider.api_key = Some(ApiKey::new(key));
            self.provider.auth = AuthMode::ApiKey;
        }
        if let Some(deployment) = get("AZURE_OPENAI_API_DEPLOYMENT_NAME") {
            self.provider.deployment = deployment;
        }
        if let Some(version) = get("AZURE_OPENAI_API_VERSION") {
            self.provider.api_version = version;
        }
        if let Some(name) = get("APPLICATION_NAME") {
            self.security.application_name = Some(name);
        }
        if let Some(tenant) = get("AZURE_TENANT_ID") {
            self.security.tenant_id = Some(tenant);
        }
        if let Some(flag) = get("ENABLE_SECURITY_CONTEXT") {
            self.security.attach_user_context = parse_flag(&flag).ok_or_else(|| {
                AppError::Config(format!(
                    "ENABLE_SECURITY_CONTEXT must be true/false/1/0, got '{}'",
                    flag
                ))
            })?;
        }

        Ok(())
    }

    /// Upstream request timeout
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `load()`, but can also
    /// be called explicitly when constructing Config via other means (e.g., in tests).
    pub fn validate(&self) -> AppResult<()> {
        let provider = &self.provider;

        if provider.endpoint.trim().is_empty() {
            return Err(AppError::Config("provider.endpoint cannot be empty".to_string()));
        }
        if !provider.endpoint.starts_with("http://") && !provider.endpoint.starts_with("https://") {
            return Err(AppError::Config(format!(
                "provider.endpoint '{}' must start with 'http://' or 'https://'",
                provider.endpoint
            )));
        }
        if provider.deployment.trim().is_empty() {
            return Err(AppError::Config(
                "provider.deployment cannot be empty".to_string(),
            ));
        }
        if provider.api_version.trim().is_empty() {
            return Err(AppError::Config(
                "provider.api_version cannot be empty".to_string(),
            ));
        }
        if provider.auth == AuthMode::ApiKey
            && provider
                .api_key
                .as_ref()
                .is_none_or(|key| key.expose().trim().is_empty())
        {
            return Err(AppError::Config(
                "provider.auth = \"api_key\" requires provider.api_key (or AZURE_OPENAI_API_KEY)"
                    .to_string(),
            ));
        }
        if !provider.temperature.is_finite() || !(0.0..=2.0).contains(&provider.temperature) {
            return Err(AppError::Config(format!(
                "provider.temperature must be a finite number between 0.0 and 2.0, got {}",
                provider.temperature
            )));
        }

        if self.server.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "server.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.server.request_timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "server.request_timeout_seconds cannot exceed 300 seconds (5 minutes), got {}",
                self.server.request_timeout_seconds
            )));
        }

        if self
            .observability
            .log_level
            .parse::<tracing::Level>()
            .is_err()
        {
            return Err(AppError::Config(format!(
                "observability.log_level must be one of trace, debug, info, warn, error; got '{}'",
                self.observability.log_level
            )));
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TEST_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 8080
request_timeout_seconds = 45

[provider]
endpoint = "https://contoso.openai.azure.com"
deployment = "gpt-4o"
auth = "api_key"
api_key = "secret-key"
temperature = 0.2

[security]
application_name = "contoso-chat"
tenant_id = "tenant-1"
attach_user_context = true

[observability]
log_level = "debug"
"#;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_from_str_parses_all_sections() {
        let config = Config::from_str(TEST_CONFIG).expect("should parse config");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_seconds, 45);
        assert_eq!(config.provider.deployment, "gpt-4o");
        assert_eq!(config.provider.auth, AuthMode::ApiKey);
        assert_eq!(
            config.provider.api_key.as_ref().map(ApiKey::expose),
            Some("secret-key")
        );
        assert_eq!(config.security.tenant_id.as_deref(), Some("tenant-1"));
        assert!(config.security.attach_user_context);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").expect("empty config should be valid");
        assert_eq!(config.server.port, 7071);
        assert_eq!(config.provider.endpoint, "http://localhost:4041");
        assert_eq!(config.provider.auth, AuthMode::ManagedIdentity);
        assert!(config.provider.is_local_emulator());
        assert!(!config.security.attach_user_context);
        assert_eq!(config.provider.system_prompt(), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_api_key_is_redacted_in_debug_output() {
        let config = Config::from_str(TEST_CONFIG).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("ApiKey(***)"));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("AZURE_OPENAI_API_ENDPOINT", "https://fabrikam.openai.azure.com"),
                ("AZURE_OPENAI_API_KEY", "k-123"),
                ("AZURE_OPENAI_API_DEPLOYMENT_NAME", "chat"),
                ("APPLICATION_NAME", "fabrikam"),
                ("AZURE_TENANT_ID", "t-9"),
                ("ENABLE_SECURITY_CONTEXT", "1"),
            ]))
            .unwrap();

        assert_eq!(config.provider.endpoint, "https://fabrikam.openai.azure.com");
        assert_eq!(config.provider.auth, AuthMode::ApiKey);
        assert_eq!(config.provider.deployment, "chat");
        assert_eq!(config.security.application_name.as_deref(), Some("fabrikam"));
        assert_eq!(config.security.tenant_id.as_deref(), Some("t-9"));
        assert!(config.security.attach_user_context);
        config.validate().expect("overridden config should validate");
    }

    #[test]
    fn test_empty_override_values_are_ignored() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[("AZURE_OPENAI_API_KEY", "  ")]))
            .unwrap();
        assert_eq!(config.provider.auth, AuthMode::ManagedIdentity);
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn test_invalid_security_flag_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("ENABLE_SECURITY_CONTEXT", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("ENABLE_SECURITY_CONTEXT"));
    }

    #[test]
    fn test_api_key_auth_without_key_fails_validation() {
        let result = Config::from_str("[provider]\nauth = \"api_key\"\n");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("api_key"), "got: {}", err);
    }

    #[test]
    fn test_endpoint_without_scheme_fails_validation() {
        let result = Config::from_str("[provider]\nendpoint = \"contoso.openai.azure.com\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_temperature_out_of_range_fails_validation() {
        assert!(Config::from_str("[provider]\ntemperature = 2.5\n").is_err());
        assert!(Config::from_str("[provider]\ntemperature = -0.1\n").is_err());
    }

    #[test]
    fn test_timeout_bounds() {
        assert!(Config::from_str("[server]\nrequest_timeout_seconds = 0\n").is_err());
        assert!(Config::from_str("[server]\nrequest_timeout_seconds = 301\n").is_err());
        assert!(Config::from_str("[server]\nrequest_timeout_seconds = 300\n").is_ok());
    }

    #[test]
    fn test_unknown_auth_mode_is_a_parse_error() {
        let err = Config::from_str("[provider]\nauth = \"oauth\"\n").unwrap_err();
        assert!(matches!(err, AppError::ConfigParseFailed { .. }));
    }
}
