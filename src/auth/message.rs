//! Canonical challenge text
//!
//! The backend re-renders this exact text from the challenge it issued and
//! compares it byte for byte, so the line order and spacing here are part of
//! the wire contract.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

pub const STATEMENT: &str = "I accept the Terms of Service.";
pub const VERSION: &str = "1";

/// Renders the sign-in text in EIP-4361 layout
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    default_ttl: Duration,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CHALLENGE_TTL)
    }
}

impl MessageBuilder {
    /// `default_ttl` is the validity window applied when no expiration is given
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }

    /// Render the challenge text.
    ///
    /// `issued_at` defaults to now and `expiration_time` to `issued_at` plus the
    /// builder's TTL. Pass both for a deterministic result.
    pub fn build(
        &self,
        domain: &str,
        address: &str,
        nonce: &str,
        chain_id: u64,
        issued_at: Option<DateTime<Utc>>,
        expiration_time: Option<DateTime<Utc>>,
    ) -> String {
        let issued_at = issued_at.unwrap_or_else(Utc::now);
        let expiration_time =
            expiration_time.unwrap_or_else(|| expires_after(issued_at, self.default_ttl));

        render(domain, address, nonce, chain_id, issued_at, expiration_time)
    }
}

/// `start + ttl`, saturating at the latest representable time
pub fn expires_after(start: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| start.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Pure rendering with every field explicit
pub fn render(
    domain: &str,
    address: &str,
    nonce: &str,
    chain_id: u64,
    issued_at: DateTime<Utc>,
    expiration_time: DateTime<Utc>,
) -> String {
    let host = host_of(domain);
    format!(
        "{host} wants you to sign in with your Ethereum account:\n\
         {address}\n\
         \n\
         {STATEMENT}\n\
         \n\
         URI: https://{host}\n\
         Version: {VERSION}\n\
         Chain ID: {chain_id}\n\
         Nonce: {nonce}\n\
         Issued At: {issued}\n\
         Expiration Time: {expires}",
        issued = timestamp(issued_at),
        expires = timestamp(expiration_time),
    )
}

/// ISO 8601 with millisecond precision and a `Z` suffix
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Strip a scheme and trailing slash so the domain line never reads `https://https://`
fn host_of(domain: &str) -> &str {
    domain
        .strip_prefix("https://")
        .or_else(|| domain.strip_prefix("http://"))
        .unwrap_or(domain)
        .trim_end_matches('/')
}
