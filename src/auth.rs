//! Inbound request authentication.
//!
//! A single shared-secret check against the `X-Api-Key` header. The guard
//! fails closed: when no key is configured, every request is rejected with a
//! server error rather than let through.

use axum::http::HeaderMap;

use crate::config::AuthConfig;
use crate::error::Error;

/// Request header carrying the caller's credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Check the caller's credential against the configured key.
///
/// Must run before any backend work on every handling path. Returns
/// `ApiKeyNotConfigured` when the server has no key (misconfiguration,
/// surfaced as a 500) and `Unauthorized` when the header is missing or does
/// not exactly match.
pub fn authorize(headers: &HeaderMap, auth: &AuthConfig) -> Result<(), Error> {
    let Some(expected) = &auth.api_key else {
        tracing::error!("API key not configured - rejecting request");
        return Err(Error::ApiKeyNotConfigured);
    };

    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(key) if key == expected.expose_secret() => Ok(()),
        Some(_) => {
            tracing::warn!("Invalid API key attempt");
            Err(Error::Unauthorized)
        }
        None => {
            tracing::warn!("Request missing API key header");
            Err(Error::Unauthorized)
        }
    }
}
