//! Sign-in orchestration
//!
//! [`AuthController`] runs one attempt at a time: request a challenge, render
//! and sign the canonical text, verify it, then persist the session bound to
//! the signing address. Every failure lands in the `Error` status, reaches the
//! `on_error` callback and is returned to the caller.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::client::ChallengeClient;
use super::message::MessageBuilder;
use super::session::{SessionKeys, SessionStore};
use super::signer::SigningProvider;
use super::state::{Attempt, AuthEvent, AuthStateMachine, AuthStatus};
use super::wallet::WalletConnection;
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult, StorageError};
use crate::models::{AuthSession, AuthTokens, Challenge};
use crate::storage::KeyValueStore;

/// Wallet sign-in controller
pub struct AuthController {
    config: AuthConfig,
    wallet: Arc<dyn WalletConnection>,
    signer: Arc<dyn SigningProvider>,
    client: Arc<dyn ChallengeClient>,
    sessions: SessionStore,
    messages: MessageBuilder,
    machine: AuthStateMachine,
}

impl AuthController {
    pub fn new(
        config: AuthConfig,
        wallet: Arc<dyn WalletConnection>,
        signer: Arc<dyn SigningProvider>,
        client: Arc<dyn ChallengeClient>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let keys = SessionKeys::new(config.storage_namespace.as_deref());
        let machine =
            AuthStateMachine::new(config.auto_reset_after, config.on_status_change.clone());

        Self {
            sessions: SessionStore::new(store, keys),
            messages: MessageBuilder::new(config.challenge_ttl),
            machine,
            config,
            wallet,
            signer,
            client,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn status(&self) -> AuthStatus {
        self.machine.status()
    }

    /// User-facing message of the last failure, cleared by the next attempt or reset
    pub fn error(&self) -> Option<String> {
        self.machine.last_error()
    }

    /// Address of the connected wallet
    pub fn address(&self) -> Option<String> {
        self.wallet.state().active_address().map(str::to_string)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthStatus> {
        self.machine.subscribe()
    }

    pub fn session(&self) -> Result<Option<AuthSession>, StorageError> {
        self.sessions.load()
    }

    /// True while an attempt is running
    pub fn is_authenticating(&self) -> bool {
        self.machine.status().is_in_flight()
    }

    /// True when a stored session is bound to the connected address
    pub fn is_authenticated(&self) -> bool {
        let Some(address) = self.address() else {
            return false;
        };
        match self.sessions.load() {
            Ok(Some(session)) => session.is_bound_to(&address),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                false
            }
        }
    }

    /// Run a full sign-in attempt and return the access token.
    ///
    /// Refused with [`AuthError::AttemptInProgress`] while another attempt is
    /// running; the running attempt is left untouched.
    pub async fn sign_in(&self) -> AuthResult<String> {
        let Some(address) = self.address() else {
            let err = AuthError::NotConnected;
            self.machine
                .fail(err.display_message(self.config.locale))
                .inspect_err(|e| warn!(error = %e, "Sign-in refused"))?;
            return Err(self.report(err));
        };

        let attempt = self
            .machine
            .begin()
            .inspect_err(|e| warn!(error = %e, "Sign-in refused"))?;

        info!(address = %address, "Starting wallet sign-in");

        match self.run_attempt(attempt, &address).await {
            Ok(access_token) => {
                info!(address = %address, "Wallet sign-in succeeded");
                if let Some(on_success) = &self.config.on_success {
                    on_success(&access_token);
                }
                Ok(access_token)
            }
            Err(err) => {
                match self
                    .machine
                    .fail_attempt(attempt, err.display_message(self.config.locale))
                {
                    Ok(_) => {}
                    Err(AuthError::AttemptSuperseded) => {
                        debug!(address = %address, "Failed attempt was already superseded");
                    }
                    Err(e) => warn!(error = %e, "Could not record sign-in failure"),
                }
                Err(self.report(err))
            }
        }
    }

    async fn run_attempt(&self, attempt: Attempt, address: &str) -> AuthResult<String> {
        let challenge = self.client.request_nonce(address).await?;
        self.machine.step(attempt, AuthEvent::NonceIssued)?;
        debug!(
            nonce = %challenge.nonce,
            expires_at = %challenge.expires_at,
            "Challenge issued"
        );

        let challenge = self.canonical(challenge, address);
        let signature = self.signer.sign(&challenge.message).await?;

        if challenge.is_expired() {
            return Err(AuthError::ChallengeExpired);
        }
        self.machine.step(attempt, AuthEvent::Signed)?;

        let tokens = self.verify(address, &signature, challenge).await?;

        // Stored only if no reset or sign-out took over the attempt meanwhile
        let session = AuthSession::new(tokens, address);
        self.machine.commit(attempt, AuthEvent::Verified, || {
            self.sessions.persist(&session).map_err(AuthError::from)
        })?;

        Ok(session.access_token)
    }

    /// Replace the server text with the locally rendered one, valid until the
    /// challenge expires
    fn canonical(&self, challenge: Challenge, address: &str) -> Challenge {
        let text = self.messages.build(
            &self.config.domain,
            address,
            &challenge.nonce,
            self.config.chain_id,
            Some(Utc::now()),
            Some(challenge.expires_at),
        );
        challenge.with_message(text)
    }

    /// Present the signed challenge. Takes the challenge by value so it is
    /// presented at most once.
    async fn verify(
        &self,
        address: &str,
        signature: &str,
        challenge: Challenge,
    ) -> AuthResult<AuthTokens> {
        self.client
            .verify(address, signature, &challenge.message)
            .await
    }

    fn report(&self, err: AuthError) -> AuthError {
        warn!(
            code = err.error_code(),
            reason = %err.display_message(self.config.locale),
            "Wallet sign-in failed"
        );
        if let Some(on_error) = &self.config.on_error {
            on_error(&err);
        }
        err
    }

    /// Return to `Idle` and clear the stored session.
    ///
    /// The reset comes first so an attempt committing concurrently either
    /// stores nothing or is cleared here.
    pub fn sign_out(&self) -> Result<(), StorageError> {
        self.machine.reset();
        let cleared = self.sessions.clear();
        match &cleared {
            Ok(()) => info!("Signed out"),
            Err(e) => warn!(error = %e, "Failed to clear stored session"),
        }
        cleared
    }

    /// Drop a session issued for another address than the connected one.
    ///
    /// Call when the wallet connection changes. Does nothing without a stored
    /// session or without a connected address.
    pub fn reload(&self) -> Result<(), StorageError> {
        let Some(bound) = self.sessions.bound_address()? else {
            return Ok(());
        };
        let Some(current) = self.address() else {
            return Ok(());
        };

        if bound != current {
            info!(bound = %bound, current = %current, "Wallet address changed, clearing session");
            self.sign_out()?;
        }
        Ok(())
    }

    /// Return to `Idle` early, e.g. to dismiss a success or error notice
    pub fn reset(&self) {
        self.machine.reset();
    }
}
