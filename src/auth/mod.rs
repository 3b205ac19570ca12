//! Wallet sign-in for StelloVault
//!
//! Client side of the challenge-response flow:
//! - Challenge requests and verification against the auth API
//! - Canonical EIP-4361 challenge text
//! - Status state machine with auto-reset
//! - Session persistence bound to the signing address

pub mod client;
pub mod controller;
pub mod message;
pub mod session;
pub mod signer;
pub mod state;
pub mod stub;
pub mod wallet;

pub use client::{ChallengeClient, HttpChallengeClient};
pub use controller::AuthController;
pub use message::MessageBuilder;
pub use session::{SessionKeys, SessionStore};
pub use signer::{SignatureRejection, SigningProvider};
pub use state::{Attempt, AuthEvent, AuthStateMachine, AuthStatus};
pub use stub::{StubChallengeClient, StubSigner};
pub use wallet::{SharedWallet, WalletConnection, WalletState};
