use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/tokens`
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    /// User email
    pub identity: &'a str,
    /// User password
    pub secret: &'a str,
}

/// Bearer token issued by NPM. The same shape is persisted in the token cache.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenResponse {
    pub token: String,
    /// ISO 8601 timestamp, e.g. `2026-01-05T10:32:00.000Z`
    pub expires: String,
}

impl TokenResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expires)
            .ok()
            .map(|date| date.with_timezone(&Utc))
    }
}
