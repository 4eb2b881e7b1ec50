//! Integration tests for configuration loading
//!
//! Covers the full path: file → parse → environment overrides → validate.

use chatrelay::config::{AuthMode, Config, DEFAULT_SYSTEM_PROMPT, LogFormat};
use chatrelay::error::AppError;
use std::collections::HashMap;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

/// Helper to create a temporary config file with given TOML content
fn create_temp_config(toml_content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file
        .write_all(toml_content.as_bytes())
        .expect("Failed to write temp file");
    temp_file.flush().expect("Failed to flush temp file");
    temp_file
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_empty_file_yields_defaults() {
    let temp_file = create_temp_config("");
    let config = Config::from_file(temp_file.path()).expect("empty config is valid");

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 7071);
    assert_eq!(config.provider.endpoint, "http://localhost:4041");
    assert_eq!(config.provider.auth, AuthMode::ManagedIdentity);
    assert_eq!(config.provider.system_prompt(), DEFAULT_SYSTEM_PROMPT);
    assert!(!config.security.attach_user_context);
    assert_eq!(config.observability.log_format, LogFormat::Text);
}

#[test]
fn test_json_log_format_is_accepted() {
    let temp_file = create_temp_config("[observability]\nlog_level = \"WARN\"\nlog_format = \"json\"");
    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.observability.log_format, LogFormat::Json);
    assert_eq!(config.observability.log_level, "WARN");
}

#[test]
fn test_missing_file_is_not_an_error_for_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    // Only fails if the surrounding environment holds invalid overrides
    if let Ok(config) = Config::load(&path) {
        assert_eq!(config.server.request_timeout_seconds, 30);
    }
}

#[test]
fn test_missing_file_is_an_error_for_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let err = Config::from_file(temp_dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::ConfigFileRead { .. }));
}

#[test]
fn test_parse_error_names_the_file() {
    let temp_file = create_temp_config("[server\nport = 1");
    let err = Config::from_file(temp_file.path()).unwrap_err();

    assert!(matches!(err, AppError::ConfigParseFailed { .. }));
    assert!(err.to_string().contains(&temp_file.path().display().to_string()));
}

#[test]
fn test_invalid_values_are_rejected_at_load() {
    let cases = [
        ("[provider]\nendpoint = \"contoso.openai.azure.com\"", "http"),
        ("[provider]\ntemperature = 3.5", "temperature"),
        ("[provider]\nauth = \"api_key\"", "api_key"),
        ("[server]\nrequest_timeout_seconds = 0", "request_timeout_seconds"),
        ("[observability]\nlog_level = \"loud\"", "log_level"),
    ];

    for (toml, expected) in cases {
        let temp_file = create_temp_config(toml);
        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(
            matches!(err, AppError::ConfigValidationFailed { .. }),
            "{} should fail validation",
            toml
        );
        assert!(
            err.to_string().contains(expected),
            "error for {:?} should mention {}, got: {}",
            toml,
            expected,
            err
        );
    }
}

#[test]
fn test_environment_overrides_file_values() {
    let temp_file = create_temp_config(
        r#"
[provider]
endpoint = "https://file.openai.azure.com"
deployment = "from-file"
"#,
    );
    let mut config = Config::from_file(temp_file.path()).unwrap();

    config
        .apply_overrides(env(&[
            ("AZURE_OPENAI_API_ENDPOINT", "https://env.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "env-key"),
            ("AZURE_OPENAI_API_DEPLOYMENT_NAME", "gpt-4o"),
            ("AZURE_OPENAI_API_VERSION", ""),
            ("APPLICATION_NAME", "contoso-chat"),
            ("AZURE_TENANT_ID", "tenant-9"),
            ("ENABLE_SECURITY_CONTEXT", "true"),
        ]))
        .unwrap();
    config.validate().unwrap();

    assert_eq!(config.provider.endpoint, "https://env.openai.azure.com");
    assert_eq!(config.provider.deployment, "gpt-4o");
    assert_eq!(config.provider.api_version, "2024-10-21");
    assert_eq!(config.provider.auth, AuthMode::ApiKey);
    assert_eq!(
        config.provider.api_key.as_ref().map(|k| k.expose()),
        Some("env-key")
    );
    assert_eq!(config.security.application_name.as_deref(), Some("contoso-chat"));
    assert_eq!(config.security.tenant_id.as_deref(), Some("tenant-9"));
    assert!(config.security.attach_user_context);
}

#[test]
fn test_invalid_security_flag_is_rejected() {
    let mut config = Config::default();
    let err = config
        .apply_overrides(env(&[("ENABLE_SECURITY_CONTEXT", "maybe")]))
        .unwrap_err();
    assert!(err.to_string().contains("ENABLE_SECURITY_CONTEXT"));
}

#[test]
fn test_api_key_is_not_printed_in_debug_output() {
    let mut config = Config::default();
    config
        .apply_overrides(env(&[("AZURE_OPENAI_API_KEY", "super-secret")]))
        .unwrap();

    assert!(!format!("{:?}", config).contains("super-secret"));
}
