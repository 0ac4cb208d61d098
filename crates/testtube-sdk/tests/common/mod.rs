// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-process fakes of the compute network and the wallet.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use testtube_sdk::{
    ClientError,
    FaucetClient,
    RemoteCallClient,
    config::ClientConfig,
    messages::{MessageResult, ResponseMessage, Tag, tag_names},
    network::{ComputeNetwork, MessageId},
    store::MemoryStore,
    wallet::{
        DataItemRequest,
        Permission,
        SignedDataItem,
        Signer,
        WalletBridge,
        WalletError,
        WalletSession,
    },
};

pub const TOKEN: &str = "token-process";
pub const ADDRESS: &str = "user-address";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A call observed by the [`FakeNetwork`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedCall {
    pub process_id: String,
    pub tags: Vec<Tag>,
    pub signed: bool,
}

impl ObservedCall {
    pub fn action(&self) -> Option<&str> {
        action_of(&self.tags)
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    replies: HashMap<String, MessageResult>,
    failures: HashMap<String, u32>,
    calls: Vec<ObservedCall>,
    settled: HashMap<MessageId, MessageResult>,
    next_message: u64,
}

/// A compute network answering per `Action` tag and counting calls.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    state: Mutex<NetworkState>,
    latency: Duration,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Answers every call with the given action with `result`.
    pub fn reply(&self, action: &str, result: MessageResult) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(action.to_owned(), result);
    }

    /// Fails the next `times` calls with the given action.
    pub fn fail_next(&self, action: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(action.to_owned(), times);
    }

    pub fn calls(&self) -> Vec<ObservedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_with_action(&self, action: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.action() == Some(action))
            .count()
    }

    async fn respond(
        &self,
        process_id: &str,
        tags: &[Tag],
        signed: bool,
    ) -> Result<MessageResult, ClientError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(ObservedCall {
            process_id: process_id.to_owned(),
            tags: tags.to_vec(),
            signed,
        });

        let action = action_of(tags).unwrap_or_default().to_owned();
        if let Some(remaining) = state.failures.get_mut(&action).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(transient_error());
        }
        Ok(state.replies.get(&action).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ComputeNetwork for FakeNetwork {
    async fn dry_run(&self, process_id: &str, tags: &[Tag]) -> Result<MessageResult, ClientError> {
        self.respond(process_id, tags, false).await
    }

    async fn send_message(
        &self,
        process_id: &str,
        tags: &[Tag],
        data: &str,
        signer: &dyn Signer,
    ) -> Result<MessageId, ClientError> {
        let signed = signer
            .sign_data_item(DataItemRequest {
                data: data.as_bytes().to_vec(),
                tags: tags.to_vec(),
                target: Some(process_id.to_owned()),
                anchor: None,
            })
            .await?;
        let result = self.respond(process_id, tags, true).await?;

        let mut state = self.state.lock().unwrap();
        state.next_message += 1;
        let message = MessageId(format!("{}-{}", signed.id, state.next_message));
        state.settled.insert(message.clone(), result);
        Ok(message)
    }

    async fn result(
        &self,
        _process_id: &str,
        message: &MessageId,
    ) -> Result<MessageResult, ClientError> {
        self.state
            .lock()
            .unwrap()
            .settled
            .remove(message)
            .ok_or_else(transient_error)
    }
}

/// An error as returned for a garbled response.
pub fn transient_error() -> ClientError {
    serde_json::from_str::<MessageResult>("<html>502 Bad Gateway</html>")
        .expect_err("not json")
        .into()
}

fn action_of(tags: &[Tag]) -> Option<&str> {
    tags.iter()
        .find(|tag| tag.name == tag_names::ACTION)
        .map(|tag| tag.value.as_str())
}

/// A response consisting of one message carrying `tags`.
pub fn reply(tags: &[(&str, &str)]) -> MessageResult {
    MessageResult {
        messages: vec![ResponseMessage {
            data: None,
            tags: tags
                .iter()
                .map(|(name, value)| Tag::new(*name, *value))
                .collect(),
        }],
    }
}

#[derive(Debug)]
pub struct FakeSigner;

#[async_trait]
impl Signer for FakeSigner {
    async fn sign_data_item(&self, request: DataItemRequest) -> Result<SignedDataItem, WalletError> {
        Ok(SignedDataItem {
            id: "signed".to_owned(),
            raw: request.data,
        })
    }
}

/// A wallet that grants every permission for [`ADDRESS`].
#[derive(Debug)]
pub struct FakeWallet;

#[async_trait]
impl WalletBridge for FakeWallet {
    async fn connect(&self, _permissions: &[Permission]) -> Result<(), WalletError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        Ok(())
    }

    async fn permissions(&self) -> Result<Vec<Permission>, WalletError> {
        Ok(Permission::REQUIRED.to_vec())
    }

    async fn active_address(&self) -> Result<String, WalletError> {
        Ok(ADDRESS.to_owned())
    }

    fn signer(&self) -> Arc<dyn Signer> {
        Arc::new(FakeSigner)
    }
}

pub struct Setup {
    pub network: Arc<FakeNetwork>,
    pub store: Arc<MemoryStore>,
    pub client: Arc<RemoteCallClient>,
    pub faucet: FaucetClient,
}

/// Creates a faucet client for [`TOKEN`] with a connected wallet.
pub async fn setup(network: FakeNetwork, mut config: ClientConfig) -> Setup {
    init_tracing();
    config.faucet.token_process_id = TOKEN.to_owned();

    let network = Arc::new(network);
    let store = Arc::new(MemoryStore::new());
    let client = Arc::new(RemoteCallClient::new(network.clone(), store.clone()));
    let session = Arc::new(WalletSession::new(Some(Arc::new(FakeWallet))));
    session.connect().await.expect("fake wallet connects");

    let faucet = FaucetClient::new(client.clone(), session, &config);
    Setup {
        network,
        store,
        client,
        faucet,
    }
}
