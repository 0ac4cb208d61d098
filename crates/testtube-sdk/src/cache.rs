// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! The two cache tiers.
//!
//! - The *local* tier ([`LocalCache`]) stores timestamped payloads in the client's
//!   [`LocalStore`] and considers them fresh for a fixed window.
//! - The *remote* tier ([`RemoteCache`]) is a key/value store shared by all clients, with a TTL
//!   chosen per write from [`CacheExpiry`]. [`RestKvCache`] talks to a Redis-compatible REST
//!   endpoint, [`MemoryKvCache`] keeps entries in process.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::time::Instant;
use url::Url;

use crate::{store::LocalStore, utils::WallClock};

/// Default freshness window of the local tier.
pub const DEFAULT_LOCAL_CACHE_WINDOW: Duration = Duration::from_secs(10);

/// The expiry durations a caller may choose for remote cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheExpiry {
    /// One minute.
    Minute,
    /// Ten minutes.
    TenMinutes,
    /// One hour.
    Hour,
    /// One day.
    Day,
    /// One week.
    Week,
    /// One average Gregorian month.
    Month,
}

impl CacheExpiry {
    /// The expiry in seconds.
    pub const fn as_secs(self) -> u64 {
        match self {
            Self::Minute => 60,
            Self::TenMinutes => 600,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 604_800,
            Self::Month => 2_629_746,
        }
    }

    /// The expiry as a [`Duration`].
    pub const fn as_duration(self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

/// Error raised by a [`RemoteCache`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The request to the cache service failed.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The cache service answered with a non-success status.
    #[error("cache service returned status {status}: {message}")]
    Status {
        /// The HTTP status code.
        status: StatusCode,
        /// The error message returned by the service.
        message: String,
    },
    /// The cache service reported an error for the command.
    #[error("cache service rejected the command: {0}")]
    Rejected(String),
    /// The reply of the cache service could not be interpreted.
    #[error("unexpected reply from cache service: {0}")]
    UnexpectedReply(String),
}

/// A key/value store with per-entry TTL, shared between all client instances.
///
/// A `set` on an existing key overwrites the value and restarts its TTL.
#[async_trait]
pub trait RemoteCache: Send + Sync + Debug {
    /// Returns the value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Stores `value` under `key` for `ttl_seconds`.
    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<(), CacheError>;

    /// Deletes `key`, returning true if it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// A [`RemoteCache`] backed by a Redis database exposed through a REST endpoint.
///
/// Commands are posted as JSON arrays (e.g. `["SET", key, value, "EX", ttl]`) with a bearer
/// token, and values are stored as their JSON serialization.
#[derive(Debug, Clone)]
pub struct RestKvCache {
    client: ReqwestClient,
    url: Url,
    token: String,
}

impl RestKvCache {
    /// Creates a cache talking to `url` with the given access `token`.
    pub fn new(client: ReqwestClient, url: Url, token: impl Into<String>) -> Self {
        Self {
            client,
            url,
            token: token.into(),
        }
    }

    async fn command(&self, command: &[Value]) -> Result<Option<Value>, CacheError> {
        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .json(command)
            .send()
            .await?;

        let status = response.status();
        let reply: RestReply = match response.json().await {
            Ok(reply) => reply,
            Err(error) if status.is_success() => return Err(error.into()),
            Err(error) => {
                return Err(CacheError::Status {
                    status,
                    message: error.to_string(),
                });
            }
        };

        match (status.is_success(), reply.error) {
            (_, Some(message)) if !status.is_success() => Err(CacheError::Status { status, message }),
            (_, Some(message)) => Err(CacheError::Rejected(message)),
            (false, None) => Err(CacheError::Status {
                status,
                message: "no error message".to_owned(),
            }),
            (true, None) => Ok(reply.result.filter(|value| !value.is_null())),
        }
    }
}

#[async_trait]
impl RemoteCache for RestKvCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let result = self.command(&["GET".into(), key.into()]).await?;
        Ok(result.map(|value| match value {
            // Values are written as JSON text; anything else is returned as-is.
            Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            other => other,
        }))
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<(), CacheError> {
        self.command(&[
            "SET".into(),
            key.into(),
            value.to_string().into(),
            "EX".into(),
            ttl_seconds.into(),
        ])
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let result = self.command(&["DEL".into(), key.into()]).await?;
        match result.as_ref().and_then(Value::as_u64) {
            Some(removed) => Ok(removed == 1),
            None => Err(CacheError::UnexpectedReply(format!("{result:?}"))),
        }
    }
}

/// A [`RemoteCache`] kept in process memory, with expiry measured on the tokio clock.
///
/// Useful when no shared cache is deployed, and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvCache {
    entries: Arc<Mutex<HashMap<String, (Value, Instant)>>>,
}

impl MemoryKvCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn take_expired(entries: &mut HashMap<String, (Value, Instant)>, key: &str) {
        if entries
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at <= Instant::now())
        {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl RemoteCache for MemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock().expect("mutex should not be poisoned");
        Self::take_expired(&mut entries, key);
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<(), CacheError> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .lock()
            .expect("mutex should not be poisoned")
            .insert(key.to_owned(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().expect("mutex should not be poisoned");
        Self::take_expired(&mut entries, key);
        Ok(entries.remove(key).is_some())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LocalEntry<T> {
    timestamp: u64,
    data: T,
}

/// Timestamped payloads in the [`LocalStore`], fresh for a fixed window.
///
/// Stale entries are not removed; they are overwritten by the next write.
#[derive(Debug, Clone)]
pub struct LocalCache {
    store: Arc<dyn LocalStore>,
    window: Duration,
    clock: WallClock,
}

impl LocalCache {
    /// Creates a local cache over `store`, using `clock` for timestamps.
    pub fn new(store: Arc<dyn LocalStore>, window: Duration, clock: WallClock) -> Self {
        Self {
            store,
            window,
            clock,
        }
    }

    /// The freshness window.
    pub fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn store(&self) -> Arc<dyn LocalStore> {
        self.store.clone()
    }

    /// Returns the payload under `key` if it was written less than the window ago.
    pub fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read(key)
            .filter(|entry| self.clock.is_fresh(entry.timestamp, self.window))
            .map(|entry| entry.data)
    }

    /// Returns the payload under `key` regardless of its age.
    pub fn get_any_age<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read(key).map(|entry| entry.data)
    }

    /// Stores `data` under `key` with the current timestamp.
    pub fn set<T: Serialize>(&self, key: &str, data: &T) {
        let entry = LocalEntry {
            timestamp: self.clock.now_millis(),
            data,
        };
        match serde_json::to_string(&entry) {
            Ok(value) => self.store.set(key, value),
            Err(error) => tracing::warn!(key, ?error, "unable to serialize local cache entry"),
        }
    }

    /// Removes the entry under `key`.
    pub fn remove(&self, key: &str) {
        self.store.remove(key);
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<LocalEntry<T>> {
        let raw = self.store.get(key)?;
        serde_json::from_str(&raw)
            .inspect_err(|error| tracing::warn!(key, ?error, "invalid local cache data"))
            .ok()
    }
}
