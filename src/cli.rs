//! Command-line interface for chatrelay
//!
//! Provides argument parsing and subcommand handling for the chatrelay binary.

use clap::{Parser, Subcommand};

/// Streaming chat completion relay for Azure OpenAI
#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version)]
#[command(about = "Streaming chat completion relay for Azure OpenAI")]
#[command(
    long_about = "chatrelay accepts chat conversations over HTTP, forwards them to an Azure \
    OpenAI deployment and returns the reply as one JSON document or as an NDJSON stream, \
    optionally tagging upstream calls with the end user's security context."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Send one message to a running relay and print the reply
    Ask {
        /// Message to send as the user
        message: String,

        /// Base URL of the relay
        #[arg(long, default_value = "http://localhost:7071")]
        api_url: String,

        /// Request the whole reply at once instead of streaming it
        #[arg(long)]
        no_stream: bool,

        /// Minimum delay between printed deltas, in milliseconds
        #[arg(long, default_value_t = 0)]
        chunk_interval_ms: u64,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# chatrelay Configuration
# =======================
#
# Every setting has a default. Environment variables override the file:
#   AZURE_OPENAI_API_ENDPOINT, AZURE_OPENAI_API_KEY,
#   AZURE_OPENAI_API_DEPLOYMENT_NAME, AZURE_OPENAI_API_VERSION,
#   APPLICATION_NAME, AZURE_TENANT_ID, ENABLE_SECURITY_CONTEXT

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 7071

# Upper bound for a non-streaming upstream call and for the first response
# of a streaming one, in seconds (1-300)
request_timeout_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# UPSTREAM PROVIDER
# ─────────────────────────────────────────────────────────────────────────────

[provider]
# Azure OpenAI resource endpoint. http://localhost... selects the local
# emulator, which accepts a placeholder token.
endpoint = "http://localhost:4041"

# Deployment (model) name and REST API version
deployment = "gpt-4o-mini"
api_version = "2024-10-21"

# Authentication:
#   - "managed_identity": bearer token from the host's managed identity
#   - "api_key": static key sent in the api-key header (set api_key below)
auth = "managed_identity"
# api_key = "..."

# Sampling temperature (0.0-2.0)
temperature = 0.7

# Replace the built-in cooking assistant instruction
# system_prompt = "You are a helpful assistant."

# ─────────────────────────────────────────────────────────────────────────────
# SECURITY CONTEXT
# ─────────────────────────────────────────────────────────────────────────────

[security]
# Forward the end user's identity and source address with each upstream call
attach_user_context = false

# Reported as ApplicationName in the security context
# application_name = "contoso-chat"

# Reported as EndUserTenantId for Entra ID users
# tenant_id = "00000000-0000-0000-0000-000000000000"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
# RUST_LOG takes precedence when set
log_level = "info"
# "text" for terminals, "json" for log collectors
log_format = "text"

# Prometheus metrics are always available at /metrics on the server port
"#
}
