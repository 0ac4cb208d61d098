// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration of the Test Tube client.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use testtube_utils::{
    backoff::RetryConfig,
    config::{default_config_paths, load_from_yaml, path_or_defaults_if_exist},
};
use url::Url;

use crate::{
    cache::DEFAULT_LOCAL_CACHE_WINDOW,
    fingerprint::DEFAULT_KEY_PREFIX,
    network::{DEFAULT_COMPUTE_UNIT_URL, DEFAULT_MESSENGER_UNIT_URL},
    store::{FileStore, LocalStore, MemoryStore},
    throttle::DEFAULT_THROTTLE_WINDOW,
};

/// The name under which configuration files are searched.
pub const CONFIG_APP_NAME: &str = "testtube";

/// Returns the default paths of the configuration file.
pub fn default_configuration_paths() -> Vec<PathBuf> {
    default_config_paths(CONFIG_APP_NAME, &["testtube.yaml", "testtube.yml"])
}

/// Loads the configuration from `path`, or from the first existing default path.
///
/// If no file is given and none of the default paths exists, the default configuration is used.
pub fn load_configuration(path: Option<impl AsRef<Path>>) -> anyhow::Result<ClientConfig> {
    let Some(path) = path_or_defaults_if_exist(path, &default_configuration_paths()) else {
        tracing::info!("no configuration file found, using the default configuration");
        return Ok(ClientConfig::default());
    };
    let config = load_from_yaml(&path)?;
    tracing::info!(path = %path.display(), "using Test Tube configuration");
    Ok(config)
}

/// Config for the client.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// The compute network endpoints.
    pub network: NetworkConfig,
    /// The shared remote cache; without it, no remote caching takes place.
    pub remote_cache: Option<RemoteCacheConfig>,
    /// The local persistent store.
    pub local_store: LocalStoreConfig,
    /// The window in which identical calls are answered from the throttle store.
    #[serde(rename = "throttle_window_millis")]
    #[serde_as(as = "DurationMilliSeconds")]
    pub throttle_window: Duration,
    /// The window in which cached balances are considered fresh.
    #[serde(rename = "balance_cache_window_millis")]
    #[serde_as(as = "DurationMilliSeconds")]
    pub balance_cache_window: Duration,
    /// How long a balance request waits for an identical request already in flight before
    /// issuing its own; waits indefinitely if unset.
    #[serde(rename = "in_flight_timeout_millis")]
    #[serde_as(as = "Option<DurationMilliSeconds>")]
    pub in_flight_timeout: Option<Duration>,
    /// The retry policy of denomination lookups and faucet requests.
    pub retry: RetryConfig,
    /// The faucet settings.
    pub faucet: FaucetConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            remote_cache: None,
            local_store: LocalStoreConfig::default(),
            throttle_window: DEFAULT_THROTTLE_WINDOW,
            balance_cache_window: DEFAULT_LOCAL_CACHE_WINDOW,
            in_flight_timeout: None,
            retry: RetryConfig::default(),
            faucet: FaucetConfig::default(),
        }
    }
}

impl ClientConfig {
    /// The prefix of call fingerprints.
    pub fn key_prefix(&self) -> &str {
        self.remote_cache
            .as_ref()
            .map_or(DEFAULT_KEY_PREFIX, |cache| cache.key_prefix.as_str())
    }
}

/// The compute network endpoints.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// The compute unit serving dry runs and message results.
    pub compute_unit_url: Url,
    /// The messenger unit accepting signed messages.
    pub messenger_unit_url: Url,
    /// The timeout of a single HTTP request.
    #[serde(rename = "request_timeout_millis")]
    #[serde_as(as = "DurationMilliSeconds")]
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            compute_unit_url: Url::parse(DEFAULT_COMPUTE_UNIT_URL)
                .expect("the default compute unit URL is valid"),
            messenger_unit_url: Url::parse(DEFAULT_MESSENGER_UNIT_URL)
                .expect("the default messenger unit URL is valid"),
            request_timeout: default::REQUEST_TIMEOUT,
        }
    }
}

impl NetworkConfig {
    /// Builds the HTTP client used for the network and the remote cache.
    pub fn build_http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
    }
}

/// The shared remote cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// The REST endpoint of the cache.
    pub url: Url,
    /// The bearer token of the cache.
    pub token: String,
    /// The prefix of every call fingerprint, and thus of every cache key.
    #[serde(default = "default::key_prefix")]
    pub key_prefix: String,
}

/// The local persistent store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    /// The file backing the store; the store is kept in memory if unset.
    pub path: Option<PathBuf>,
}

impl LocalStoreConfig {
    /// Opens the configured store.
    pub fn open(&self) -> Arc<dyn LocalStore> {
        match &self.path {
            Some(path) => Arc::new(FileStore::open(path)),
            None => Arc::new(MemoryStore::new()),
        }
    }
}

/// The faucet settings.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// The process of the token dispensed by the faucet.
    pub token_process_id: String,
    /// How many whole tokens to request.
    pub quantity: QuantityPolicy,
    /// The delay between a successful dispense and the balance refresh.
    #[serde(rename = "refresh_delay_millis")]
    #[serde_as(as = "DurationMilliSeconds")]
    pub refresh_delay: Duration,
    /// The denomination assumed when the token does not report a usable one.
    pub default_denomination: u32,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            token_process_id: default::TOKEN_PROCESS_ID.to_owned(),
            quantity: QuantityPolicy::default(),
            refresh_delay: default::REFRESH_DELAY,
            default_denomination: default::DENOMINATION,
        }
    }
}

/// How many whole tokens a faucet request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityPolicy {
    /// Always the same amount.
    Fixed(u64),
    /// A uniformly random amount in `min..=max`.
    Random {
        /// The smallest amount.
        min: u64,
        /// The largest amount.
        max: u64,
    },
}

impl Default for QuantityPolicy {
    fn default() -> Self {
        Self::Fixed(default::QUANTITY)
    }
}

impl QuantityPolicy {
    /// Draws an amount using the thread-local RNG.
    pub fn amount(&self) -> u64 {
        self.amount_with(&mut rand::thread_rng())
    }

    /// Draws an amount using `rng`.
    pub fn amount_with<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        match *self {
            Self::Fixed(amount) => amount,
            Self::Random { min, max } if min <= max => rng.gen_range(min..=max),
            Self::Random { min, max } => rng.gen_range(max..=min),
        }
    }
}

mod default {
    use std::time::Duration;

    use crate::fingerprint::DEFAULT_KEY_PREFIX;

    pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub(crate) const REFRESH_DELAY: Duration = Duration::from_secs(5);
    pub(crate) const DENOMINATION: u32 = 8;
    pub(crate) const QUANTITY: u64 = 100;
    pub(crate) const TOKEN_PROCESS_ID: &str = "U09Pg31Wlasc8ox5uTDm9sjFQT8XKcCR2Ru5lmFMe2A";

    pub(crate) fn key_prefix() -> String {
        DEFAULT_KEY_PREFIX.to_owned()
    }
}
