//! Backend challenge client
//!
//! Requests nonces and submits signatures against the auth API:
//! - `POST {base}/nonce` with `{ walletAddress }`
//! - `POST {base}/login` with `{ walletAddress, signature, message }`

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::message::expires_after;
use crate::config::{AuthConfig, ConfigError};
use crate::error::{AuthError, AuthResult};
use crate::models::{
    ApiEnvelope, AuthTokens, Challenge, ErrorBody, LoginRequest, LoginResponse, NonceRequest,
    NonceResponse,
};

/// Talks to the challenge-response backend
#[async_trait]
pub trait ChallengeClient: Send + Sync {
    /// Request a fresh challenge for `address`
    async fn request_nonce(&self, address: &str) -> AuthResult<Challenge>;

    /// Submit a signature over `message`, which must be the exact text that was signed
    async fn verify(&self, address: &str, signature: &str, message: &str)
        -> AuthResult<AuthTokens>;
}

/// HTTP implementation of [`ChallengeClient`]
#[derive(Debug, Clone)]
pub struct HttpChallengeClient {
    client: Client,
    base_url: String,
    challenge_ttl: Duration,
}

impl HttpChallengeClient {
    /// Create a client for the API base configured in `config`
    pub fn new(config: &AuthConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let base = config.api_base()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            challenge_ttl: config.challenge_ttl,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl ChallengeClient for HttpChallengeClient {
    async fn request_nonce(&self, address: &str) -> AuthResult<Challenge> {
        let url = self.endpoint("nonce");
        tracing::debug!(url = %url, address = %address, "Requesting nonce");

        let response = self
            .client
            .post(&url)
            .json(&NonceRequest {
                wallet_address: address.to_string(),
            })
            .send()
            .await
            .map_err(|e| AuthError::NonceRequest(e.to_string()))?;

        if !response.status().is_success() {
            let reason = failure_reason(response, "Failed to request nonce from server").await;
            tracing::warn!(address = %address, reason = %reason, "Nonce request rejected");
            return Err(AuthError::NonceRequest(reason));
        }

        let body: NonceResponse = parse_body(response)
            .await
            .map_err(AuthError::NonceRequest)?;

        if body.nonce.trim().is_empty() {
            return Err(AuthError::NonceRequest(
                "Server returned an empty nonce".to_string(),
            ));
        }

        let expires_at = body
            .expires_at
            .unwrap_or_else(|| expires_after(Utc::now(), self.challenge_ttl));

        Ok(Challenge {
            nonce: body.nonce,
            message: body.message,
            expires_at,
        })
    }

    async fn verify(
        &self,
        address: &str,
        signature: &str,
        message: &str,
    ) -> AuthResult<AuthTokens> {
        let url = self.endpoint("login");
        tracing::debug!(url = %url, address = %address, "Submitting signature");

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                wallet_address: address.to_string(),
                signature: signature.to_string(),
                message: message.to_string(),
            })
            .send()
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?;

        if !response.status().is_success() {
            let reason = failure_reason(response, "Verification failed").await;
            tracing::warn!(address = %address, reason = %reason, "Signature verification rejected");
            return Err(AuthError::Verification(reason));
        }

        let body: LoginResponse = parse_body(response)
            .await
            .map_err(AuthError::Verification)?;

        if body.access_token.is_empty() {
            return Err(AuthError::Verification(
                "Server returned an empty access token".to_string(),
            ));
        }

        Ok(body.into())
    }
}

/// Decode a success body, bare or wrapped in `{ "data": ... }`
async fn parse_body<T: DeserializeOwned>(response: Response) -> Result<T, String> {
    response
        .json::<ApiEnvelope<T>>()
        .await
        .map(ApiEnvelope::into_inner)
        .map_err(|e| format!("Invalid response body: {}", e))
}

/// Reason text for a non-2xx response
async fn failure_reason(response: Response, fallback: &str) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
        if let Some(reason) = body.reason() {
            return reason.to_string();
        }
    }

    let text = text.trim();
    if !text.is_empty() && !text.starts_with('{') {
        return text.to_string();
    }

    format!("{} ({})", fallback, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ADDRESS: &str = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";

    fn client_for(server: &MockServer) -> HttpChallengeClient {
        let config = AuthConfig::new("example.com")
            .with_api_base_url(format!("{}/api/v1/auth", server.uri()));
        HttpChallengeClient::new(&config).expect("client creation")
    }

    #[tokio::test]
    async fn request_nonce_posts_wallet_address() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/nonce"))
            .and(body_json(serde_json::json!({ "walletAddress": ADDRESS })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "nonce": "2b5f8d3a9c",
                    "message": "server text",
                    "expiresAt": "2030-01-01T00:00:00Z"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let challenge = client_for(&server).request_nonce(ADDRESS).await.unwrap();
        assert_eq!(challenge.nonce, "2b5f8d3a9c");
        assert_eq!(challenge.message, "server text");
        assert_eq!(challenge.expires_at.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn request_nonce_defaults_expiry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/nonce"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "nonce": "abc" })),
            )
            .mount(&server)
            .await;

        let challenge = client_for(&server).request_nonce(ADDRESS).await.unwrap();
        assert!(challenge.expires_at > Utc::now());
        assert!(!challenge.is_expired());
    }

    #[tokio::test]
    async fn request_nonce_failure_is_classified() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/nonce"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server).request_nonce(ADDRESS).await.unwrap_err();
        match err {
            AuthError::NonceRequest(reason) => {
                assert!(reason.contains("Failed to request nonce from server"));
                assert!(reason.contains("500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_posts_exact_message() {
        let server = MockServer::start().await;
        let message = "example.com wants you to sign in\nNonce: abc";

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .and(body_json(serde_json::json!({
                "walletAddress": ADDRESS,
                "signature": "0xsig",
                "message": message
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "accessToken": "access",
                    "refreshToken": "refresh",
                    "tokenType": "Bearer",
                    "expiresIn": 900,
                    "user": {}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server)
            .verify(ADDRESS, "0xsig", message)
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "access");
        assert_eq!(tokens.refresh_token, "refresh");
        assert_eq!(tokens.expires_in, Some(900));
    }

    #[tokio::test]
    async fn verify_surfaces_backend_reason() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "message": "Nonce already used" })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .verify(ADDRESS, "0xsig", "text")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Verification(ref reason) if reason == "Nonce already used"
        ));
    }

    #[tokio::test]
    async fn verify_rejects_empty_access_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "",
                "refreshToken": "refresh"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .verify(ADDRESS, "0xsig", "text")
            .await
            .unwrap_err();
        assert!(err.is_verification());
    }

    #[test]
    fn endpoint_joins_base() {
        let config = AuthConfig::new("example.com").with_api_base_url("/api/v1/auth/");
        let client = HttpChallengeClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://example.com/api/v1/auth");
        assert_eq!(client.endpoint("nonce"), "https://example.com/api/v1/auth/nonce");
    }
}
