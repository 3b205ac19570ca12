//! External signing provider seam

use async_trait::async_trait;

use crate::error::AuthError;

/// Why a signing request did not produce a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureRejection {
    /// The user dismissed or declined the request
    DeclinedByUser,
    /// The provider failed for any other reason
    Provider(String),
}

impl SignatureRejection {
    /// Best-effort classification for providers that only report free text.
    ///
    /// Advisory only: providers that know the reason should return a typed
    /// rejection instead.
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let declined = ["rejected", "denied", "cancelled", "canceled"]
            .iter()
            .any(|needle| lower.contains(needle));

        if declined {
            SignatureRejection::DeclinedByUser
        } else {
            SignatureRejection::Provider(message)
        }
    }
}

impl From<SignatureRejection> for AuthError {
    fn from(rejection: SignatureRejection) -> Self {
        match rejection {
            SignatureRejection::DeclinedByUser => AuthError::UserRejectedSignature,
            SignatureRejection::Provider(reason) => AuthError::Signing(reason),
        }
    }
}

/// Signs arbitrary text with the connected wallet.
///
/// Human-in-the-loop: implementations may wait indefinitely for approval.
#[async_trait]
pub trait SigningProvider: Send + Sync {
    async fn sign(&self, text: &str) -> Result<String, SignatureRejection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_decline_wording() {
        for text in [
            "User rejected the request.",
            "MetaMask Tx Signature: User denied message signature.",
            "Request cancelled",
        ] {
            assert_eq!(
                SignatureRejection::from_provider_message(text),
                SignatureRejection::DeclinedByUser
            );
        }
    }

    #[test]
    fn test_other_failures_keep_text() {
        assert_eq!(
            SignatureRejection::from_provider_message("Ledger device locked"),
            SignatureRejection::Provider("Ledger device locked".to_string())
        );
    }

    #[test]
    fn test_conversion_to_auth_error() {
        let err: AuthError = SignatureRejection::DeclinedByUser.into();
        assert!(err.is_user_rejection());

        let err: AuthError = SignatureRejection::Provider("timeout".to_string()).into();
        assert!(matches!(err, AuthError::Signing(reason) if reason == "timeout"));
    }
}
