//! Wallet connection seam

use std::sync::{PoisonError, RwLock};

/// Snapshot of the wallet connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletState {
    pub address: Option<String>,
    pub is_connected: bool,
}

impl WalletState {
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            is_connected: true,
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Address usable for signing: present, non-empty, and connected
    pub fn active_address(&self) -> Option<&str> {
        if !self.is_connected {
            return None;
        }
        self.address.as_deref().filter(|a| !a.is_empty())
    }
}

/// Read access to the current wallet connection
pub trait WalletConnection: Send + Sync {
    fn state(&self) -> WalletState;
}

/// Wallet connection held in memory and updated by whoever manages the wallet
#[derive(Debug, Default)]
pub struct SharedWallet {
    state: RwLock<WalletState>,
}

impl SharedWallet {
    pub fn new(state: WalletState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn connect(&self, address: impl Into<String>) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) =
            WalletState::connected(address);
    }

    pub fn disconnect(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = WalletState::disconnected();
    }
}

impl WalletConnection for SharedWallet {
    fn state(&self) -> WalletState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_address() {
        assert_eq!(WalletState::connected("0x1").active_address(), Some("0x1"));
        assert_eq!(WalletState::connected("").active_address(), None);
        assert_eq!(WalletState::disconnected().active_address(), None);

        let stale = WalletState {
            address: Some("0x1".to_string()),
            is_connected: false,
        };
        assert_eq!(stale.active_address(), None);
    }

    #[test]
    fn test_shared_wallet_switches() {
        let wallet = SharedWallet::default();
        assert_eq!(wallet.state().active_address(), None);

        wallet.connect("0xA");
        assert_eq!(wallet.state().active_address(), Some("0xA"));

        wallet.disconnect();
        assert!(!wallet.state().is_connected);
    }
}
