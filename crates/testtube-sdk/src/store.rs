// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! The local persistent key/value store backing the throttle and the local cache tier.
//!
//! The store holds plain strings and never expires anything; callers embed a timestamp in the
//! stored value and decide about staleness themselves.

use std::{
    collections::HashMap,
    fmt::Debug,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

/// String key/value storage shared by every caller of a client instance.
///
/// Reads and writes are synchronous and last-writer-wins. Implementations may persist changes in
/// the background; [`LocalStore::flush`] waits for them.
#[async_trait]
pub trait LocalStore: Send + Sync + Debug {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, overwriting any previous value.
    fn set(&self, key: &str, value: String);

    /// Removes the value stored under `key`, if any.
    fn remove(&self, key: &str);

    /// Waits until every change made so far is persisted.
    async fn flush(&self) {}
}

/// A [`LocalStore`] living only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().expect("mutex should not be poisoned")
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries().insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }
}

#[derive(Debug, Default)]
struct FileState {
    entries: HashMap<String, String>,
    /// Incremented on every change.
    generation: u64,
}

/// A snapshot of the store waiting to be written to disk.
#[derive(Debug)]
struct PendingWrite {
    path: PathBuf,
    generation: u64,
    bytes: Vec<u8>,
    /// The generation of the snapshot on disk.
    written: Arc<Mutex<u64>>,
}

impl PendingWrite {
    /// Writes the snapshot unless a newer one was written already.
    fn run(self) {
        let mut written = self.written.lock().expect("mutex should not be poisoned");
        if *written >= self.generation {
            return;
        }

        let result = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::write(&self.path, &self.bytes));
        match result {
            Ok(()) => *written = self.generation,
            Err(error) => {
                tracing::warn!(path = %self.path.display(), ?error, "unable to persist local store")
            }
        }
    }
}

/// A [`LocalStore`] persisted as a JSON object in a file.
///
/// The whole file is rewritten on every change. Within a tokio runtime the write runs on the
/// blocking thread pool; snapshots are written newest-last, so a delayed write never overwrites a
/// later one. Persisting is best effort: failures to write are logged and the in-memory view stays
/// authoritative for the lifetime of the process. Use [`LocalStore::flush`] before exiting.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<FileState>,
    written: Arc<Mutex<u64>>,
}

impl FileStore {
    /// Opens the store at `path`.
    ///
    /// A missing file yields an empty store; so does a file that cannot be parsed, after logging a
    /// warning.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
                tracing::warn!(
                    path = %path.display(),
                    ?error,
                    "local store is corrupt, starting empty"
                );
                HashMap::new()
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    ?error,
                    "unable to read local store, starting empty"
                );
                HashMap::new()
            }
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened local store");

        Self {
            path,
            state: Mutex::new(FileState {
                entries,
                generation: 0,
            }),
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().expect("mutex should not be poisoned")
    }

    fn update(&self, change: impl FnOnce(&mut HashMap<String, String>)) {
        let pending = {
            let mut state = self.state();
            change(&mut state.entries);
            state.generation += 1;
            self.snapshot(&state)
        };
        let Some(pending) = pending else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || pending.run());
            }
            Err(_) => pending.run(),
        }
    }

    fn snapshot(&self, state: &FileState) -> Option<PendingWrite> {
        let bytes = serde_json::to_vec(&state.entries)
            .inspect_err(|error| {
                tracing::warn!(path = %self.path.display(), ?error, "unable to serialize local store")
            })
            .ok()?;
        Some(PendingWrite {
            path: self.path.clone(),
            generation: state.generation,
            bytes,
            written: self.written.clone(),
        })
    }
}

#[async_trait]
impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.state().entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.update(|entries| {
            entries.insert(key.to_owned(), value);
        });
    }

    fn remove(&self, key: &str) {
        self.update(|entries| {
            entries.remove(key);
        });
    }

    async fn flush(&self) {
        let pending = {
            let state = self.state();
            self.snapshot(&state)
        };
        let Some(pending) = pending else {
            return;
        };
        if let Err(error) = tokio::task::spawn_blocking(move || pending.run()).await {
            tracing::warn!(?error, "local store flush did not complete");
        }
    }
}
