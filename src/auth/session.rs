//! Persistence of the authenticated session
//!
//! The access token, refresh token and bound address live under three keys and
//! are always written and cleared as one batch.

use std::sync::Arc;

use crate::error::StorageError;
use crate::models::AuthSession;
use crate::storage::KeyValueStore;

pub const ACCESS_TOKEN_KEY: &str = "AUTH_TOKEN";
pub const REFRESH_TOKEN_KEY: &str = "REFRESH_TOKEN";
pub const BOUND_ADDRESS_KEY: &str = "AUTH_TOKEN_address";

/// Storage keys of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub bound_address: String,
}

impl SessionKeys {
    pub fn new(namespace: Option<&str>) -> Self {
        let key = |name: &str| match namespace {
            Some(ns) => format!("{}:{}", ns, name),
            None => name.to_string(),
        };
        Self {
            access_token: key(ACCESS_TOKEN_KEY),
            refresh_token: key(REFRESH_TOKEN_KEY),
            bound_address: key(BOUND_ADDRESS_KEY),
        }
    }

    fn all(&self) -> [&str; 3] {
        [
            self.access_token.as_str(),
            self.refresh_token.as_str(),
            self.bound_address.as_str(),
        ]
    }
}

impl Default for SessionKeys {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Session persistence over an injected key-value store
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    keys: SessionKeys,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: SessionKeys) -> Self {
        Self { store, keys }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Write all three session fields
    pub fn persist(&self, session: &AuthSession) -> Result<(), StorageError> {
        self.store.set_all(&[
            (self.keys.access_token.as_str(), session.access_token.as_str()),
            (self.keys.refresh_token.as_str(), session.refresh_token.as_str()),
            (self.keys.bound_address.as_str(), session.bound_address.as_str()),
        ])
    }

    /// Load the session. An incomplete record is treated as no session.
    pub fn load(&self) -> Result<Option<AuthSession>, StorageError> {
        let access_token = self.store.get(&self.keys.access_token)?;
        let refresh_token = self.store.get(&self.keys.refresh_token)?;
        let bound_address = self.store.get(&self.keys.bound_address)?;

        match (access_token, refresh_token, bound_address) {
            (Some(access_token), Some(refresh_token), Some(bound_address))
                if !access_token.is_empty() && !bound_address.is_empty() =>
            {
                Ok(Some(AuthSession {
                    access_token,
                    refresh_token,
                    bound_address,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Remove all three session fields
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove_all(&self.keys.all())
    }

    /// Address the stored session was issued for
    pub fn bound_address(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .store
            .get(&self.keys.bound_address)?
            .filter(|a| !a.is_empty()))
    }
}
