//! In-process stand-in for the auth API
//!
//! Behaves like the real backend: nonces are random, bound to one address,
//! expire, and are consumed by the first verification attempt whether it
//! succeeds or not. The message is rebuilt from the issued challenge and
//! compared byte for byte. Signatures come from [`StubSigner`], which hashes
//! the signed text together with the address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::client::ChallengeClient;
use super::message;
use super::signer::{SignatureRejection, SigningProvider};
use crate::error::{AuthError, AuthResult};
use crate::models::{AuthTokens, Challenge};

const ACCESS_TOKEN_TTL_SECONDS: i64 = 900;
const REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Claims carried by stub-issued tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (wallet address)
    pub sub: String,
    /// JWT ID
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    /// "access" or "refresh"
    pub token_type: String,
}

#[derive(Debug)]
struct NonceRecord {
    wallet_address: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used: bool,
}

/// Fake backend implementing [`ChallengeClient`]
#[derive(Debug)]
pub struct StubChallengeClient {
    domain: String,
    chain_id: u64,
    nonce_ttl: Duration,
    latency: Duration,
    secret: String,
    nonces: Mutex<HashMap<String, NonceRecord>>,
    nonce_requests: AtomicUsize,
    verify_requests: AtomicUsize,
}

impl StubChallengeClient {
    pub fn new(domain: impl Into<String>, chain_id: u64) -> Self {
        Self {
            domain: domain.into(),
            chain_id,
            nonce_ttl: crate::config::DEFAULT_CHALLENGE_TTL,
            latency: Duration::ZERO,
            secret: "stub-signing-secret".to_string(),
            nonces: Mutex::new(HashMap::new()),
            nonce_requests: AtomicUsize::new(0),
            verify_requests: AtomicUsize::new(0),
        }
    }

    /// Simulated round-trip delay applied to every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_nonce_ttl(mut self, ttl: Duration) -> Self {
        self.nonce_ttl = ttl;
        self
    }

    pub fn nonce_requests(&self) -> usize {
        self.nonce_requests.load(Ordering::SeqCst)
    }

    /// Nonce records still held, used or not
    pub fn tracked_nonces(&self) -> usize {
        self.nonces().len()
    }

    pub fn verify_requests(&self) -> usize {
        self.verify_requests.load(Ordering::SeqCst)
    }

    /// Decode and validate a token issued by this stub
    pub fn verify_token(&self, token: &str) -> AuthResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| AuthError::Verification(format!("Invalid token: {}", e)))
    }

    fn nonces(&self) -> MutexGuard<'_, HashMap<String, NonceRecord>> {
        self.nonces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn issue_token(&self, address: &str, ttl_seconds: i64, token_type: &str) -> AuthResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: address.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + ttl_seconds,
            token_type: token_type.to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Verification(format!("Token encoding failed: {}", e)))
    }

    /// Consume the nonce named in `text` and check the text against it
    fn check_challenge(&self, address: &str, text: &str) -> Result<(), String> {
        let nonce = field(text, "Nonce: ").ok_or("Message has no nonce")?;

        let (issued_at, expires_at) = {
            let mut nonces = self.nonces();
            let record = nonces
                .get_mut(nonce)
                .filter(|r| r.wallet_address == address)
                .ok_or("Nonce not found or expired")?;

            // Replay prevention: one attempt per nonce
            if record.used {
                return Err("Nonce already used".to_string());
            }
            record.used = true;

            if record.expires_at < Utc::now() {
                return Err("Nonce expired".to_string());
            }
            (record.issued_at, record.expires_at)
        };

        // The client picks its own issuance time inside the challenge window
        let signed_issued_at = field(text, "Issued At: ")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|v| v.with_timezone(&Utc))
            .ok_or("Message has no valid issuance time")?;
        let signed_expires_at = field(text, "Expiration Time: ")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|v| v.with_timezone(&Utc))
            .ok_or("Message has no valid expiration time")?;

        // One second of slack for the millisecond truncation of rendered times
        if signed_issued_at + chrono::Duration::seconds(1) < issued_at {
            return Err("Message issued before the challenge".to_string());
        }
        if signed_expires_at > expires_at || signed_issued_at > expires_at {
            return Err("Message validity exceeds the challenge".to_string());
        }

        let expected = message::render(
            &self.domain,
            address,
            nonce,
            self.chain_id,
            signed_issued_at,
            signed_expires_at,
        );
        if expected != text {
            return Err("Message does not match the issued challenge".to_string());
        }

        Ok(())
    }
}

#[async_trait]
impl ChallengeClient for StubChallengeClient {
    async fn request_nonce(&self, address: &str) -> AuthResult<Challenge> {
        self.nonce_requests.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if address.is_empty() {
            return Err(AuthError::NonceRequest("Invalid wallet address".to_string()));
        }

        let nonce = generate_secure_nonce();
        let issued_at = Utc::now();
        let expires_at = message::expires_after(issued_at, self.nonce_ttl);

        {
            let mut nonces = self.nonces();
            // Expired records can no longer verify; used ones are kept until then
            // so a replay is reported as such
            nonces.retain(|_, record| record.expires_at >= issued_at);
            nonces.insert(
                nonce.clone(),
                NonceRecord {
                    wallet_address: address.to_string(),
                    issued_at,
                    expires_at,
                    used: false,
                },
            );
        }

        let message = message::render(
            &self.domain,
            address,
            &nonce,
            self.chain_id,
            issued_at,
            expires_at,
        );

        Ok(Challenge {
            nonce,
            message,
            expires_at,
        })
    }

    async fn verify(
        &self,
        address: &str,
        signature: &str,
        text: &str,
    ) -> AuthResult<AuthTokens> {
        self.verify_requests.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        self.check_challenge(address, text)
            .map_err(AuthError::Verification)?;

        if signature != stub_signature(address, text) {
            return Err(AuthError::Verification("Invalid signature".to_string()));
        }

        Ok(AuthTokens {
            access_token: self.issue_token(address, ACCESS_TOKEN_TTL_SECONDS, "access")?,
            refresh_token: self.issue_token(address, REFRESH_TOKEN_TTL_SECONDS, "refresh")?,
            token_type: "Bearer".to_string(),
            expires_in: Some(ACCESS_TOKEN_TTL_SECONDS),
        })
    }
}

/// Signer whose signatures [`StubChallengeClient`] accepts
#[derive(Debug, Clone)]
pub struct StubSigner {
    address: String,
}

impl StubSigner {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl SigningProvider for StubSigner {
    async fn sign(&self, text: &str) -> Result<String, SignatureRejection> {
        Ok(stub_signature(&self.address, text))
    }
}

/// Hex SHA-256 over address and text
pub fn stub_signature(address: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Generate a cryptographically secure nonce
fn generate_secure_nonce() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Value of the line starting with `prefix`
fn field<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.lines().find_map(|line| line.strip_prefix(prefix))
}
