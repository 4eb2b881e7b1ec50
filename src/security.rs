//! End-user security context extraction
//!
//! Builds the "who/where from" record that Microsoft Defender for Cloud uses
//! to investigate AI application incidents. The record is derived from
//! request headers plus process-wide configuration and never fails: every
//! anomaly degrades to an absent field.

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::SecurityConfig;

/// Header set by the hosting platform's authentication layer
pub const CLIENT_PRINCIPAL_HEADER: &str = "x-ms-client-principal";

/// Comma-separated proxy chain, closest client first
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Headers copied into the context, with the casing used in the output
pub const ALLOWED_HEADERS: [&str; 6] = [
    "User-Agent",
    "X-Forwarded-For",
    "Forwarded",
    "X-Real-IP",
    "True-Client-IP",
    "CF-Connecting-IP",
];

const ENTRA_ID_PROVIDER: &str = "aad";
const ENTRA_ID_LABEL: &str = "EntraId";

/// Security context attached to upstream requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_user_tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_user_id_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    pub source_request_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
}

impl SecurityContext {
    /// Derive the context for one request
    pub fn from_headers(headers: &HeaderMap, config: &SecurityConfig) -> Self {
        let identity = authenticated_user(headers, config);

        Self {
            end_user_tenant_id: identity.tenant_id,
            end_user_id: identity.user_id,
            end_user_id_type: identity.identity_provider,
            source_ip: source_ip(headers),
            source_request_headers: allowed_headers(headers),
            application_name: config.application_name.clone(),
        }
    }

    /// JSON string form sent in the upstream `user` field
    pub fn to_json(&self) -> String {
        // Plain strings and a string map cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Claims read from the `X-Ms-Client-Principal` header
///
/// Only the identity provider is used; other claims are ignored whatever
/// their shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPrincipal {
    #[serde(default)]
    pub identity_provider: Option<String>,
}

impl ClientPrincipal {
    /// Decode a base64 JSON principal; `None` for anything malformed
    pub fn decode(header_value: &str) -> Option<Self> {
        let bytes = STANDARD.decode(header_value.trim()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[derive(Debug, Default)]
struct AuthenticatedUser {
    identity_provider: Option<String>,
    user_id: Option<String>,
    tenant_id: Option<String>,
}

fn authenticated_user(headers: &HeaderMap, config: &SecurityConfig) -> AuthenticatedUser {
    let Some(principal) = headers
        .get(CLIENT_PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(ClientPrincipal::decode)
    else {
        return AuthenticatedUser::default();
    };

    let is_entra_id = principal.identity_provider.as_deref() == Some(ENTRA_ID_PROVIDER);
    let identity_provider = if is_entra_id {
        Some(ENTRA_ID_LABEL.to_string())
    } else {
        principal.identity_provider
    };

    // The platform user id is not the identity provider's own user id, so it
    // stays unset until one can be resolved.
    let tenant_id = if is_entra_id {
        config.tenant_id.clone()
    } else {
        None
    };

    AuthenticatedUser {
        identity_provider,
        user_id: None,
        tenant_id,
    }
}

/// First address of `X-Forwarded-For`, without its port
pub fn source_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers.get(FORWARDED_FOR_HEADER)?.to_str().ok()?;
    let first = forwarded.split(',').next()?.trim();
    Some(strip_port(first).to_string())
}

/// Remove a trailing `:port` from `host:port` or `[v6]:port`
///
/// Bare IPv6 literals contain several colons and are returned unchanged.
pub fn strip_port(address: &str) -> &str {
    if let Some(colon) = address.rfind(':') {
        if address.find(':') == Some(colon) {
            return &address[..colon];
        }
    }

    if address.starts_with('[') {
        if let Some(close) = address.find("]:") {
            return &address[..=close];
        }
    }

    address
}

fn allowed_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    ALLOWED_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
