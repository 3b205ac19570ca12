//! StelloVault Sign-in Library
//!
//! Wallet sign-in client for the StelloVault API: the wallet signs a
//! server-issued challenge and the backend exchanges it for a session.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use auth::{AuthController, AuthStatus};
pub use config::{AuthConfig, Config, Locale};
pub use error::{AuthError, AuthResult, StorageError};
