//! Error taxonomy for the sign-in client
//!
//! Every failure of a sign-in attempt is classified into one [`AuthError`]
//! variant. The controller surfaces it through the `on_error` callback and the
//! `Error` status, and returns it to the caller.

use thiserror::Error;

use crate::auth::state::{AuthEvent, AuthStatus};
use crate::config::Locale;

/// Persistence layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt storage file: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

/// Sign-in errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Wallet not connected")]
    NotConnected,

    #[error("Failed to request nonce: {0}")]
    NonceRequest(String),

    #[error("Signature request rejected by user")]
    UserRejectedSignature,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Challenge expired before verification")]
    ChallengeExpired,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("A sign-in attempt is already in progress")]
    AttemptInProgress,

    #[error("Sign-in attempt was superseded by a reset or sign-out")]
    AttemptSuperseded,

    #[error("Invalid status transition: {event:?} from {from}")]
    InvalidTransition { from: AuthStatus, event: AuthEvent },
}

impl AuthError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::NotConnected => "NOT_CONNECTED",
            AuthError::NonceRequest(_) => "NONCE_REQUEST_FAILED",
            AuthError::UserRejectedSignature => "USER_REJECTED_SIGNATURE",
            AuthError::Signing(_) => "SIGNING_FAILED",
            AuthError::Verification(_) => "VERIFICATION_FAILED",
            AuthError::ChallengeExpired => "CHALLENGE_EXPIRED",
            AuthError::Storage(_) => "STORAGE_ERROR",
            AuthError::AttemptInProgress => "ATTEMPT_IN_PROGRESS",
            AuthError::AttemptSuperseded => "ATTEMPT_SUPERSEDED",
            AuthError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    /// True when the backend (or the client-side expiry check) refused the challenge
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            AuthError::Verification(_) | AuthError::ChallengeExpired
        )
    }

    /// True when the user declined the signature request
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, AuthError::UserRejectedSignature)
    }

    /// User-facing text. Declines get a short localized notice, everything else
    /// surfaces the underlying reason.
    pub fn display_message(&self, locale: Locale) -> String {
        match self {
            AuthError::UserRejectedSignature => locale.sign_in_cancelled().to_string(),
            AuthError::NonceRequest(reason)
            | AuthError::Signing(reason)
            | AuthError::Verification(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias using AuthError
pub type AuthResult<T> = Result<T, AuthError>;
