//! chatrelay - Streaming chat completion relay for Azure OpenAI
//!
//! This library accepts chat conversations over HTTP, forwards them to an
//! Azure OpenAI deployment and returns the assistant reply either as a single
//! JSON document or as an NDJSON stream of deltas. Upstream calls can carry
//! the end user's security context derived from the hosting platform headers.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod security;
pub mod telemetry;
