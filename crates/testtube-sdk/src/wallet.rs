// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! The boundary to the user's wallet.
//!
//! The wallet itself is external: this module only describes the operations the SDK invokes on it
//! ([`WalletBridge`], [`Signer`]) and keeps track of the connection state of a session.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::messages::Tag;

/// A permission granted by the wallet to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Read the active address.
    AccessAddress,
    /// Sign messages on behalf of the active address.
    SignTransaction,
}

impl Permission {
    /// The permissions requested on connect.
    pub const REQUIRED: [Permission; 2] = [Permission::AccessAddress, Permission::SignTransaction];

    /// The name of the permission as understood by the wallet.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AccessAddress => "ACCESS_ADDRESS",
            Permission::SignTransaction => "SIGN_TRANSACTION",
        }
    }
}

/// Error raised by the wallet boundary.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// No wallet is available to the session.
    #[error("no wallet is installed")]
    NotInstalled,
    /// The session has no connected address.
    #[error("the wallet is not connected")]
    NotConnected,
    /// The wallet rejected or failed the request.
    #[error("wallet request failed: {0}")]
    Bridge(String),
}

/// The unsigned content of a message to be signed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataItemRequest {
    /// The message payload.
    pub data: Vec<u8>,
    /// The message tags, in order.
    pub tags: Vec<Tag>,
    /// The process the message is addressed to.
    pub target: Option<String>,
    /// An optional anchor.
    pub anchor: Option<String>,
}

/// A signed message, ready to be posted to the messenger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDataItem {
    /// The identifier of the signed message.
    pub id: String,
    /// The serialized signed message.
    pub raw: Vec<u8>,
}

/// Authorizes write calls.
#[async_trait]
pub trait Signer: Send + Sync + Debug {
    /// Signs `request` and returns the serialized data item.
    async fn sign_data_item(&self, request: DataItemRequest) -> Result<SignedDataItem, WalletError>;
}

/// The operations offered by a wallet.
#[async_trait]
pub trait WalletBridge: Send + Sync + Debug {
    /// Asks the user to grant `permissions`.
    async fn connect(&self, permissions: &[Permission]) -> Result<(), WalletError>;

    /// Revokes the permissions of the application.
    async fn disconnect(&self) -> Result<(), WalletError>;

    /// Returns the permissions currently granted.
    async fn permissions(&self) -> Result<Vec<Permission>, WalletError>;

    /// Returns the address currently selected in the wallet.
    async fn active_address(&self) -> Result<String, WalletError>;

    /// Returns a signer for the active address.
    fn signer(&self) -> Arc<dyn Signer>;
}

/// The connection state of a user's wallet.
#[derive(Debug)]
pub struct WalletSession {
    bridge: Option<Arc<dyn WalletBridge>>,
    address: Mutex<Option<String>>,
}

impl WalletSession {
    /// Creates a disconnected session; `bridge` is `None` if no wallet is installed.
    pub fn new(bridge: Option<Arc<dyn WalletBridge>>) -> Self {
        Self {
            bridge,
            address: Mutex::new(None),
        }
    }

    /// Adopts an existing connection if the wallet already granted address access.
    ///
    /// Returns the connected address, if any. Without a wallet this is not an error.
    pub async fn check_connection(&self) -> Result<Option<String>, WalletError> {
        let Some(bridge) = &self.bridge else {
            return Ok(None);
        };
        if !bridge
            .permissions()
            .await?
            .contains(&Permission::AccessAddress)
        {
            return Ok(self.address());
        }

        let address = bridge.active_address().await?;
        tracing::debug!(%address, "wallet already connected");
        self.set_address(Some(address.clone()));
        Ok(Some(address))
    }

    /// Requests the [required][Permission::REQUIRED] permissions and stores the active address.
    pub async fn connect(&self) -> Result<String, WalletError> {
        let bridge = self.bridge.as_ref().ok_or(WalletError::NotInstalled)?;
        bridge
            .connect(&Permission::REQUIRED)
            .await
            .inspect_err(|error| tracing::warn!(?error, "unable to connect the wallet"))?;

        let address = bridge.active_address().await?;
        tracing::info!(%address, "wallet connected");
        self.set_address(Some(address.clone()));
        Ok(address)
    }

    /// Disconnects the wallet and forgets the address.
    ///
    /// The address is kept if the wallet fails to disconnect.
    pub async fn disconnect(&self) -> Result<(), WalletError> {
        if let Some(bridge) = &self.bridge {
            bridge.disconnect().await?;
        }
        self.set_address(None);
        tracing::info!("wallet disconnected");
        Ok(())
    }

    /// The connected address.
    pub fn address(&self) -> Option<String> {
        self.address
            .lock()
            .expect("mutex should not be poisoned")
            .clone()
    }

    /// Returns true if an address is connected.
    pub fn is_connected(&self) -> bool {
        self.address().is_some()
    }

    /// Returns the signer of the connected wallet.
    pub fn signer(&self) -> Result<Arc<dyn Signer>, WalletError> {
        match &self.bridge {
            Some(bridge) if self.is_connected() => Ok(bridge.signer()),
            Some(_) => Err(WalletError::NotConnected),
            None => Err(WalletError::NotInstalled),
        }
    }

    fn set_address(&self, address: Option<String>) {
        *self.address.lock().expect("mutex should not be poisoned") = address;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullSigner;

    #[async_trait]
    impl Signer for NullSigner {
        async fn sign_data_item(
            &self,
            _request: DataItemRequest,
        ) -> Result<SignedDataItem, WalletError> {
            Ok(SignedDataItem {
                id: "id".to_owned(),
                raw: vec![],
            })
        }
    }

    #[derive(Debug, Default)]
    struct FakeBridge {
        granted: Mutex<Vec<Permission>>,
        reject_connect: bool,
    }

    #[async_trait]
    impl WalletBridge for FakeBridge {
        async fn connect(&self, permissions: &[Permission]) -> Result<(), WalletError> {
            if self.reject_connect {
                return Err(WalletError::Bridge("user rejected".to_owned()));
            }
            *self.granted.lock().unwrap() = permissions.to_vec();
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), WalletError> {
            self.granted.lock().unwrap().clear();
            Ok(())
        }

        async fn permissions(&self) -> Result<Vec<Permission>, WalletError> {
            Ok(self.granted.lock().unwrap().clone())
        }

        async fn active_address(&self) -> Result<String, WalletError> {
            Ok("addr".to_owned())
        }

        fn signer(&self) -> Arc<dyn Signer> {
            Arc::new(NullSigner)
        }
    }

    #[tokio::test]
    async fn connect_and_disconnect() {
        let bridge = Arc::new(FakeBridge::default());
        let session = WalletSession::new(Some(bridge.clone()));

        assert_eq!(session.check_connection().await.unwrap(), None);
        assert!(matches!(session.signer(), Err(WalletError::NotConnected)));

        assert_eq!(session.connect().await.unwrap(), "addr");
        assert_eq!(
            *bridge.granted.lock().unwrap(),
            vec![Permission::AccessAddress, Permission::SignTransaction]
        );
        assert!(session.signer().is_ok());

        session.disconnect().await.unwrap();
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn check_connection_adopts_granted_address() {
        let bridge = Arc::new(FakeBridge::default());
        bridge
            .granted
            .lock()
            .unwrap()
            .push(Permission::AccessAddress);
        let session = WalletSession::new(Some(bridge));

        assert_eq!(
            session.check_connection().await.unwrap().as_deref(),
            Some("addr")
        );
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn connect_fails_without_wallet_or_on_rejection() {
        let session = WalletSession::new(None);
        assert_eq!(session.check_connection().await.unwrap(), None);
        assert!(matches!(
            session.connect().await,
            Err(WalletError::NotInstalled)
        ));

        let session = WalletSession::new(Some(Arc::new(FakeBridge {
            reject_connect: true,
            ..FakeBridge::default()
        })));
        assert!(matches!(session.connect().await, Err(WalletError::Bridge(_))));
        assert!(!session.is_connected());
    }

    #[test]
    fn permission_names() {
        assert_eq!(Permission::AccessAddress.as_str(), "ACCESS_ADDRESS");
        assert_eq!(
            serde_json::to_string(&Permission::SignTransaction).unwrap(),
            "\"SIGN_TRANSACTION\""
        );
    }
}
