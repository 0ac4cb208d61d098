// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! The remote call orchestrator.
//!
//! Every call goes through up to three layers, fastest first:
//!
//! 1. the [`RequestThrottle`], answering identical calls made within a short window;
//! 2. the remote cache tier, if the caller opted in with a [`CacheExpiry`];
//! 3. the compute network, either as a dry run or as a signed message followed by a result fetch.
//!
//! Responses obtained from a lower layer are written back to the layers above it.

use std::{sync::Arc, time::Duration};

use testtube_utils::metrics::Registry;
use tokio::time::Instant;

use crate::{
    cache::{CacheExpiry, DEFAULT_LOCAL_CACHE_WINDOW, LocalCache, RemoteCache, RestKvCache},
    config::ClientConfig,
    error::ClientError,
    fingerprint::{CallFingerprint, DEFAULT_KEY_PREFIX},
    messages::{MessageResult, ProcessRequest, Tag},
    metrics::{REMOTE_TIER, RemoteCallMetrics, SIGNED_MODE, SIMULATE_MODE},
    network::{ComputeNetwork, HttpComputeNetwork},
    store::LocalStore,
    throttle::{DEFAULT_THROTTLE_WINDOW, RequestThrottle},
    utils::WallClock,
    wallet::Signer,
};

/// How a call reaches the process.
#[derive(Debug, Clone)]
pub enum CallMode {
    /// A read-only dry run; nothing is signed and the process state does not change.
    Simulate,
    /// A message signed by `signer`, dispatched to the process and then settled.
    SignedDispatch {
        /// Signs the dispatched message.
        signer: Arc<dyn Signer>,
    },
}

impl CallMode {
    fn label(&self) -> &'static str {
        match self {
            CallMode::Simulate => SIMULATE_MODE,
            CallMode::SignedDispatch { .. } => SIGNED_MODE,
        }
    }
}

/// Sends calls to processes, de-duplicating and caching their responses.
///
/// One instance owns the throttle and the local cache tier of the process; clone the surrounding
/// `Arc` rather than creating several clients over the same store.
#[derive(Debug)]
pub struct RemoteCallClient {
    network: Arc<dyn ComputeNetwork>,
    remote_cache: Option<Arc<dyn RemoteCache>>,
    throttle: RequestThrottle,
    local_cache: LocalCache,
    key_prefix: String,
    metrics: Arc<RemoteCallMetrics>,
}

impl RemoteCallClient {
    /// Creates a client with the default windows and without a remote cache.
    pub fn new(network: Arc<dyn ComputeNetwork>, store: Arc<dyn LocalStore>) -> Self {
        let clock = WallClock::new();
        Self {
            network,
            remote_cache: None,
            throttle: RequestThrottle::new(store.clone(), DEFAULT_THROTTLE_WINDOW, clock),
            local_cache: LocalCache::new(store, DEFAULT_LOCAL_CACHE_WINDOW, clock),
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            metrics: Arc::new(RemoteCallMetrics::new(&Registry::default())),
        }
    }

    /// Creates a client talking to the endpoints in `config`.
    ///
    /// Metrics are registered on `registry` if provided.
    pub fn from_config(
        config: &ClientConfig,
        registry: Option<&Registry>,
    ) -> Result<Self, ClientError> {
        let http_client = config.network.build_http_client()?;
        let network = HttpComputeNetwork::new(
            http_client.clone(),
            config.network.compute_unit_url.clone(),
            config.network.messenger_unit_url.clone(),
        );

        let mut client = Self::new(Arc::new(network), config.local_store.open())
            .with_throttle_window(config.throttle_window)
            .with_local_cache_window(config.balance_cache_window)
            .with_key_prefix(config.key_prefix());
        if let Some(cache) = &config.remote_cache {
            client = client.with_remote_cache(Arc::new(RestKvCache::new(
                http_client,
                cache.url.clone(),
                cache.token.clone(),
            )));
        }
        if let Some(registry) = registry {
            client = client.with_metrics(Arc::new(RemoteCallMetrics::new(registry)));
        }
        Ok(client)
    }

    /// Sets the shared remote cache tier.
    pub fn with_remote_cache(mut self, remote_cache: Arc<dyn RemoteCache>) -> Self {
        self.remote_cache = Some(remote_cache);
        self
    }

    /// Sets the window in which identical calls are answered from the throttle store.
    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle = RequestThrottle::new(self.throttle.store(), window, self.throttle.clock());
        self
    }

    /// Sets the freshness window of the local cache tier.
    pub fn with_local_cache_window(mut self, window: Duration) -> Self {
        self.local_cache =
            LocalCache::new(self.local_cache.store(), window, self.throttle.clock());
        self
    }

    /// Sets the prefix of call fingerprints.
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Sets the metrics to record into.
    pub fn with_metrics(mut self, metrics: Arc<RemoteCallMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The local cache tier.
    pub fn local_cache(&self) -> &LocalCache {
        &self.local_cache
    }

    /// The throttle store.
    pub fn throttle(&self) -> &RequestThrottle {
        &self.throttle
    }

    /// The metrics of this client.
    pub fn metrics(&self) -> &RemoteCallMetrics {
        &self.metrics
    }

    /// Computes the fingerprint of a call.
    pub fn fingerprint(
        &self,
        target: &str,
        tags: &[Tag],
        discriminator: Option<&str>,
    ) -> CallFingerprint {
        CallFingerprint::new(&self.key_prefix, target, tags, discriminator)
    }

    /// Sends `tags` to the process `target` and returns its response.
    ///
    /// A response recorded for the same call within the throttle window is returned without any
    /// further lookup. With a `cache_expiry`, the remote cache tier is consulted next and written
    /// to after a network call. Errors of the network call and of the remote cache propagate; the
    /// call is not retried.
    #[tracing::instrument(skip_all, fields(process_id = %target, mode = mode.label()))]
    pub async fn send_and_get_result(
        &self,
        target: &str,
        tags: &[Tag],
        mode: &CallMode,
        cache_expiry: Option<CacheExpiry>,
        discriminator: Option<&str>,
    ) -> Result<MessageResult, ClientError> {
        let fingerprint = self.fingerprint(target, tags, discriminator);

        if let Some(response) = self.throttle.check(&fingerprint) {
            tracing::debug!(%fingerprint, "throttled request, using recent result");
            self.metrics.throttle_hits_total.inc();
            return Ok(response);
        }

        let remote_cache = cache_expiry.and_then(|expiry| match &self.remote_cache {
            Some(cache) => Some((cache, expiry)),
            None => {
                tracing::debug!(%fingerprint, "no remote cache configured, skipping it");
                None
            }
        });

        if let Some((cache, _)) = remote_cache {
            if let Some(response) = self.remote_lookup(cache.as_ref(), &fingerprint).await? {
                self.throttle.record(&fingerprint, &response);
                return Ok(response);
            }
        }

        let response = self.perform(target, tags, mode).await?;

        if let Some((cache, expiry)) = remote_cache {
            cache
                .set(
                    fingerprint.as_str(),
                    serde_json::to_value(&response)?,
                    expiry.as_secs(),
                )
                .await?;
        }
        self.throttle.record(&fingerprint, &response);

        Ok(response)
    }

    /// Sends a typed `request` to the process `target` and parses its reply.
    ///
    /// See [`send_and_get_result`][Self::send_and_get_result].
    pub async fn call<R: ProcessRequest>(
        &self,
        target: &str,
        request: &R,
        mode: &CallMode,
        cache_expiry: Option<CacheExpiry>,
        discriminator: Option<&str>,
    ) -> Result<R::Reply, ClientError> {
        let response = self
            .send_and_get_result(target, &request.to_tags(), mode, cache_expiry, discriminator)
            .await?;
        R::parse_reply(&response)
    }

    /// Drops every stored response of a call.
    ///
    /// Returns true if the remote cache held an entry for the call.
    pub async fn invalidate(
        &self,
        target: &str,
        tags: &[Tag],
        discriminator: Option<&str>,
    ) -> Result<bool, ClientError> {
        let fingerprint = self.fingerprint(target, tags, discriminator);
        self.throttle.forget(&fingerprint);

        let Some(cache) = &self.remote_cache else {
            return Ok(false);
        };
        let existed = cache.delete(fingerprint.as_str()).await?;
        tracing::debug!(%fingerprint, existed, "invalidated remote cache entry");
        Ok(existed)
    }

    /// Waits until the local store has persisted every change made so far.
    pub async fn flush(&self) {
        self.local_cache.store().flush().await;
    }

    async fn remote_lookup(
        &self,
        cache: &dyn RemoteCache,
        fingerprint: &CallFingerprint,
    ) -> Result<Option<MessageResult>, ClientError> {
        let cached = cache
            .get(fingerprint.as_str())
            .await?
            .and_then(|value| {
                serde_json::from_value(value)
                    .inspect_err(|error| {
                        tracing::warn!(%fingerprint, ?error, "invalid remote cache data")
                    })
                    .ok()
            });

        self.metrics
            .observe_cache_lookup(REMOTE_TIER, cached.is_some());
        if cached.is_some() {
            tracing::debug!(%fingerprint, "using remote cache entry");
        }
        Ok(cached)
    }

    async fn perform(
        &self,
        target: &str,
        tags: &[Tag],
        mode: &CallMode,
    ) -> Result<MessageResult, ClientError> {
        let start = Instant::now();
        let result = match mode {
            CallMode::Simulate => self.network.dry_run(target, tags).await,
            CallMode::SignedDispatch { signer } => {
                self.dispatch_and_settle(target, tags, signer.as_ref()).await
            }
        };

        self.metrics
            .observe_call(mode.label(), result.is_ok(), start.elapsed());
        if let Err(error) = &result {
            tracing::debug!(?error, "call to the compute network failed");
        }
        result
    }

    async fn dispatch_and_settle(
        &self,
        target: &str,
        tags: &[Tag],
        signer: &dyn Signer,
    ) -> Result<MessageResult, ClientError> {
        let message = self.network.send_message(target, tags, "", signer).await?;
        tracing::debug!(%message, "message sent, fetching result");
        self.network.result(target, &message).await
    }
}
