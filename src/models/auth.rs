//! Authentication models for the StelloVault sign-in flow

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-issued challenge for one sign-in attempt.
///
/// Deliberately not `Clone`: a challenge is moved into the verification step and
/// cannot be presented twice.
#[derive(Debug, PartialEq, Eq)]
pub struct Challenge {
    pub nonce: String,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Replace the message with the canonical text that will actually be signed
    pub fn with_message(self, message: String) -> Self {
        Self { message, ..self }
    }
}

/// Session issued by a successful verification, bound to one wallet address
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub bound_address: String,
}

impl AuthSession {
    pub fn new(tokens: AuthTokens, bound_address: impl Into<String>) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            bound_address: bound_address.into(),
        }
    }

    /// A session is only valid for the address it was issued to
    pub fn is_bound_to(&self, address: &str) -> bool {
        self.bound_address == address
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("bound_address", &self.bound_address)
            .finish()
    }
}

/// Tokens returned by a successful verification
#[derive(Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: Option<i64>,
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl From<LoginResponse> for AuthTokens {
    fn from(res: LoginResponse) -> Self {
        Self {
            access_token: res.access_token,
            refresh_token: res.refresh_token,
            token_type: res.token_type,
            expires_in: res.expires_in,
        }
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Backend responses may arrive bare or wrapped in `{ "data": ... }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiEnvelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ApiEnvelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            ApiEnvelope::Wrapped { data } => data,
            ApiEnvelope::Bare(inner) => inner,
        }
    }
}

/// POST {base}/nonce request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceRequest {
    pub wallet_address: String,
}

/// POST {base}/nonce response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceResponse {
    pub nonce: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// POST {base}/login request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub wallet_address: String,
    pub signature: String,
    pub message: String,
}

/// POST {base}/login response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: serde_json::Value,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error body of a non-2xx response, in either of the shapes the API uses
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorDetails {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Human-readable reason, if the body carries one
    pub fn reason(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or_else(|| self.error.as_ref().and_then(|e| e.message.as_deref()))
            .filter(|m| !m.trim().is_empty())
    }
}
