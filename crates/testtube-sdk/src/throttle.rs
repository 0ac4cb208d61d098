// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Short-window de-duplication of identical remote calls.
//!
//! Every completed call records its response under the call's fingerprint; an identical call
//! within the window gets the recorded response back without touching any cache or the network.
//! The check and the record are not atomic: two identical calls racing before either recorded
//! its response both go through.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    fingerprint::CallFingerprint,
    messages::MessageResult,
    store::LocalStore,
    utils::WallClock,
};

/// Default window in which identical calls are collapsed.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct ThrottleEntry {
    timestamp: u64,
    #[serde(default)]
    response: Option<MessageResult>,
}

/// Records responses per call fingerprint in the [`LocalStore`].
#[derive(Debug, Clone)]
pub struct RequestThrottle {
    store: Arc<dyn LocalStore>,
    window: Duration,
    clock: WallClock,
}

impl RequestThrottle {
    /// Creates a throttle over `store` collapsing identical calls within `window`.
    pub fn new(store: Arc<dyn LocalStore>, window: Duration, clock: WallClock) -> Self {
        Self {
            store,
            window,
            clock,
        }
    }

    pub(crate) fn store(&self) -> Arc<dyn LocalStore> {
        self.store.clone()
    }

    pub(crate) fn clock(&self) -> WallClock {
        self.clock
    }

    /// Returns the recorded response for `fingerprint` if it is younger than the window.
    ///
    /// Malformed entries are logged and treated as absent.
    pub fn check(&self, fingerprint: &CallFingerprint) -> Option<MessageResult> {
        let raw = self.store.get(&fingerprint.throttle_key())?;
        let entry: ThrottleEntry = serde_json::from_str(&raw)
            .inspect_err(|error| tracing::warn!(%fingerprint, ?error, "invalid throttle data"))
            .ok()?;

        if !self.clock.is_fresh(entry.timestamp, self.window) {
            return None;
        }
        entry.response
    }

    /// Records `response` for `fingerprint`, overwriting any previous entry.
    pub fn record(&self, fingerprint: &CallFingerprint, response: &MessageResult) {
        let entry = ThrottleEntry {
            timestamp: self.clock.now_millis(),
            response: Some(response.clone()),
        };
        match serde_json::to_string(&entry) {
            Ok(value) => self.store.set(&fingerprint.throttle_key(), value),
            Err(error) => tracing::warn!(%fingerprint, ?error, "unable to serialize throttle entry"),
        }
    }

    /// Drops the entry for `fingerprint`, so the next identical call goes through.
    pub fn forget(&self, fingerprint: &CallFingerprint) {
        self.store.remove(&fingerprint.throttle_key());
    }
}
