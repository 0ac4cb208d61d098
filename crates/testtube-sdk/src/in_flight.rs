// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Coalescing of concurrent requests for the same resource.
//!
//! The first caller for a key becomes the *leader* and holds an [`InFlightGuard`] while it
//! performs the request. Callers arriving while the guard is alive become *followers*: they wait
//! on an [`InFlightWaiter`] until the guard is released and then read the leader's result from
//! wherever the leader stored it, instead of issuing their own request.

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::watch;

#[derive(Debug)]
struct Marker {
    generation: u64,
    settled: watch::Receiver<()>,
}

#[derive(Debug)]
struct Markers<K> {
    next_generation: u64,
    by_key: HashMap<K, Marker>,
}

/// Tracks at most one in-flight request per key.
#[derive(Debug)]
pub struct InFlightCoalescer<K> {
    markers: Arc<Mutex<Markers<K>>>,
}

impl<K> Default for InFlightCoalescer<K> {
    fn default() -> Self {
        Self {
            markers: Arc::new(Mutex::new(Markers {
                next_generation: 0,
                by_key: HashMap::new(),
            })),
        }
    }
}

/// The outcome of [`InFlightCoalescer::try_acquire`].
#[derive(Debug)]
pub enum Acquisition<K: Eq + Hash> {
    /// No request was in flight; the caller must perform it and drop the guard afterwards.
    Leader(InFlightGuard<K>),
    /// Another caller is performing the request.
    Follower(InFlightWaiter),
}

impl<K> InFlightCoalescer<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Creates a coalescer without in-flight requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as in flight, or joins the request already in flight for it.
    pub fn try_acquire(&self, key: K) -> Acquisition<K> {
        let mut markers = self.lock();
        if let Some(marker) = markers.by_key.get(&key) {
            tracing::debug!(?key, "request already in flight, waiting");
            return Acquisition::Follower(InFlightWaiter {
                settled: marker.settled.clone(),
            });
        }

        let generation = markers.next_generation;
        markers.next_generation += 1;
        let (sender, settled) = watch::channel(());
        markers.by_key.insert(
            key.clone(),
            Marker {
                generation,
                settled,
            },
        );

        Acquisition::Leader(InFlightGuard {
            markers: self.markers.clone(),
            key,
            generation,
            _settle: sender,
        })
    }

    /// Returns true if a request for `key` is in flight.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.lock().by_key.contains_key(key)
    }

    fn lock(&self) -> MutexGuard<'_, Markers<K>> {
        self.markers.lock().expect("mutex should not be poisoned")
    }
}

/// Held by the leader of an in-flight request.
///
/// Dropping the guard (or calling [`release`][Self::release]) clears the marker and wakes all
/// followers, whether the request succeeded or failed.
#[derive(Debug)]
pub struct InFlightGuard<K: Eq + Hash> {
    markers: Arc<Mutex<Markers<K>>>,
    key: K,
    generation: u64,
    // Dropped after the marker is removed, which closes the channel and wakes the followers.
    _settle: watch::Sender<()>,
}

impl<K: Eq + Hash> InFlightGuard<K> {
    /// Clears the marker and wakes the followers.
    pub fn release(self) {}
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        let mut markers = self.markers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if markers
            .by_key
            .get(&self.key)
            .is_some_and(|marker| marker.generation == self.generation)
        {
            markers.by_key.remove(&self.key);
        }
    }
}

/// Held by a follower of an in-flight request.
#[derive(Debug)]
pub struct InFlightWaiter {
    settled: watch::Receiver<()>,
}

impl InFlightWaiter {
    /// Waits until the leader releases its guard.
    ///
    /// With a `timeout`, gives up after that duration and returns false; returns true once the
    /// request has settled.
    pub async fn wait(mut self, timeout: Option<Duration>) -> bool {
        // The leader never sends; `changed` returns once the sender is dropped.
        let settled = async move {
            while self.settled.changed().await.is_ok() {}
        };
        match timeout {
            None => {
                settled.await;
                true
            }
            Some(timeout) => tokio::time::timeout(timeout, settled).await.is_ok(),
        }
    }
}
