//! Bearer token credentials for the upstream provider
//!
//! Token acquisition is an injected capability so deployments use the
//! ambient managed identity while tests and local emulators use a fixed token.

use crate::config::COGNITIVE_SERVICES_RESOURCE;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Instance Metadata Service token endpoint (VMs, container apps without IDENTITY_ENDPOINT)
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Bearer token with its absolute expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: SystemTime,
}

impl AccessToken {
    fn is_fresh(&self, now: SystemTime) -> bool {
        now + REFRESH_MARGIN < self.expires_on
    }
}

/// Source of bearer tokens for the upstream provider
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self) -> AppResult<AccessToken>;
}

/// Credential that always returns the same token
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self) -> AppResult<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: SystemTime::now() + Duration::from_secs(24 * 60 * 60),
        })
    }
}

/// Where the managed identity token comes from
#[derive(Debug, Clone)]
enum IdentitySource {
    /// App Service / Functions identity endpoint
    AppService { endpoint: String, header: String },
    /// Azure Instance Metadata Service
    Imds { endpoint: String },
}

/// Token response of both identity endpoints
///
/// `expires_on` is seconds since the epoch, sent as a string by IMDS and as
/// a number by some App Service versions.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: serde_json::Value,
}

/// Managed identity credential with an in-memory token cache
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    source: IdentitySource,
    resource: String,
    client_id: Option<String>,
    cached: Mutex<Option<AccessToken>>,
}

impl ManagedIdentityCredential {
    /// Detect the identity endpoint from the hosting environment
    ///
    /// `IDENTITY_ENDPOINT` + `IDENTITY_HEADER` select the App Service flavour;
    /// otherwise IMDS is used. `AZURE_CLIENT_ID` picks a user-assigned identity.
    pub fn from_env() -> AppResult<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let source = match (var("IDENTITY_ENDPOINT"), var("IDENTITY_HEADER")) {
            (Some(endpoint), Some(header)) => IdentitySource::AppService { endpoint, header },
            _ => IdentitySource::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        };

        Self::with_source(source, var("AZURE_CLIENT_ID"))
    }

    /// App Service / Functions identity endpoint
    pub fn app_service(
        endpoint: impl Into<String>,
        header: impl Into<String>,
        client_id: Option<String>,
    ) -> AppResult<Self> {
        Self::with_source(
            IdentitySource::AppService {
                endpoint: endpoint.into(),
                header: header.into(),
            },
            client_id,
        )
    }

    /// Instance Metadata Service at a custom address
    pub fn imds(endpoint: impl Into<String>, client_id: Option<String>) -> AppResult<Self> {
        Self::with_source(
            IdentitySource::Imds {
                endpoint: endpoint.into(),
            },
            client_id,
        )
    }

    fn with_source(source: IdentitySource, client_id: Option<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build identity client: {}", e)))?;

        Ok(Self {
            http,
            source,
            resource: COGNITIVE_SERVICES_RESOURCE.to_string(),
            client_id,
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> AppResult<AccessToken> {
        let mut query: Vec<(&str, &str)> = vec![("resource", self.resource.as_str())];

        let request = match &self.source {
            IdentitySource::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                if let Some(client_id) = &self.client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.http
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header)
                    .query(&query)
            }
            IdentitySource::Imds { endpoint } => {
                query.push(("api-version", IMDS_API_VERSION));
                if let Some(client_id) = &self.client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.http.get(endpoint).header("Metadata", "true").query(&query)
            }
        };

        let response = request.send().await.map_err(|e| AppError::UpstreamAuth {
            reason: format!("identity endpoint unreachable: {}", e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamAuth {
                reason: format!("identity endpoint returned {}: {}", status, truncate(&body)),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| AppError::UpstreamAuth {
            reason: format!("invalid token response: {}", e),
        })?;

        let expires_on = parse_expires_on(&token.expires_on).ok_or_else(|| AppError::UpstreamAuth {
            reason: format!("invalid expires_on value: {}", token.expires_on),
        })?;

        Ok(AccessToken {
            token: token.access_token,
            expires_on,
        })
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self) -> AppResult<AccessToken> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(SystemTime::now())) {
            return Ok(token.clone());
        }

        let token = self.fetch().await?;
        tracing::debug!(resource = %self.resource, "Acquired managed identity token");
        *cached = Some(token.clone());
        Ok(token)
    }
}

fn parse_expires_on(value: &serde_json::Value) -> Option<SystemTime> {
    let seconds = match value {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}
