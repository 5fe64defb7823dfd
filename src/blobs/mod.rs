//! Ephemeral registry of generated outputs.
//!
//! Every payload is reachable through two names: an opaque [`BlobKey`] and an
//! addressable [`BlobHandle`] (`blob:splitbox/<uuid>`) that can be handed to
//! whatever displays or downloads the output. Entries live until the caller
//! releases them; the store never evicts on its own.
//!
//! Releasing twice, releasing something never issued, or reading a released
//! key are caller bugs. They come back as [`LifecycleError`] and are logged at
//! `error` level.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

const HANDLE_PREFIX: &str = "blob:splitbox/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("blob key {0} was already released")]
    KeyAlreadyReleased(BlobKey),

    #[error("blob handle {0} was already released")]
    HandleAlreadyReleased(BlobHandle),

    #[error("blob key {0} was never issued by this store")]
    UnknownKey(BlobKey),

    #[error("blob handle {0} was never issued by this store")]
    UnknownHandle(BlobHandle),

    #[error("blob key {0} used after release")]
    UseAfterRelease(BlobKey),
}

impl LifecycleError {
    pub fn is_double_release(&self) -> bool {
        matches!(
            self,
            LifecycleError::KeyAlreadyReleased(_) | LifecycleError::HandleAlreadyReleased(_)
        )
    }
}

/// Result type for blob lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobKey(Uuid);

impl BlobKey {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobHandle(String);

impl BlobHandle {
    fn generate() -> Self {
        Self(format!("{HANDLE_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct BlobEntry {
    handle: BlobHandle,
    payload: Bytes,
}

#[derive(Debug, Default)]
pub struct BlobStore {
    entries: HashMap<BlobKey, BlobEntry>,
    handles: HashMap<BlobHandle, BlobKey>,
    // Tombstones, so a second release is told apart from a bogus one.
    // Cleared by `forget_released` when the owning document goes away.
    released_keys: HashSet<BlobKey>,
    released_handles: HashMap<BlobHandle, BlobKey>,
    live_bytes: u64,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload and return its handle and key.
    pub fn put(&mut self, payload: impl Into<Bytes>) -> (BlobHandle, BlobKey) {
        let payload = payload.into();
        let key = BlobKey::generate();
        let handle = BlobHandle::generate();
        let size = payload.len();

        self.live_bytes = self.live_bytes.saturating_add(size as u64);
        self.handles.insert(handle.clone(), key);
        self.entries.insert(
            key,
            BlobEntry {
                handle: handle.clone(),
                payload,
            },
        );

        debug!(%key, %handle, size, "Blob registered");
        (handle, key)
    }

    pub fn get(&self, key: &BlobKey) -> Result<Bytes> {
        match self.entries.get(key) {
            Some(entry) => Ok(entry.payload.clone()),
            None => Err(self.report(self.missing_key(key, true))),
        }
    }

    /// Map a handle back to its key.
    pub fn resolve(&self, handle: &BlobHandle) -> Result<BlobKey> {
        if let Some(key) = self.handles.get(handle) {
            return Ok(*key);
        }
        let err = match self.released_handles.get(handle) {
            Some(key) => LifecycleError::UseAfterRelease(*key),
            None => LifecycleError::UnknownHandle(handle.clone()),
        };
        Err(self.report(err))
    }

    pub fn release_by_handle(&mut self, handle: &BlobHandle) -> Result<()> {
        let Some(key) = self.handles.get(handle).copied() else {
            let err = if self.released_handles.contains_key(handle) {
                LifecycleError::HandleAlreadyReleased(handle.clone())
            } else {
                LifecycleError::UnknownHandle(handle.clone())
            };
            return Err(self.report(err));
        };
        self.remove(key);
        Ok(())
    }

    pub fn release_by_key(&mut self, key: &BlobKey) -> Result<()> {
        if !self.entries.contains_key(key) {
            return Err(self.report(self.missing_key(key, false)));
        }
        self.remove(*key);
        Ok(())
    }

    /// Release every live entry; returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let keys: Vec<BlobKey> = self.entries.keys().copied().collect();
        for key in &keys {
            self.remove(*key);
        }
        if !keys.is_empty() {
            debug!(released = keys.len(), "Blob store swept");
        }
        keys.len()
    }

    /// Live entry count
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn contains(&self, key: &BlobKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Released names still remembered for double-release detection
    pub fn tombstones(&self) -> usize {
        self.released_keys.len() + self.released_handles.len()
    }

    /// Drop every tombstone. Names released before this call report as
    /// unknown afterwards; still an error, just a less specific one.
    pub fn forget_released(&mut self) -> usize {
        let forgotten = self.released_keys.len();
        self.released_keys.clear();
        self.released_handles.clear();
        forgotten
    }

    fn remove(&mut self, key: BlobKey) {
        if let Some(entry) = self.entries.remove(&key) {
            self.handles.remove(&entry.handle);
            self.live_bytes = self.live_bytes.saturating_sub(entry.payload.len() as u64);
            debug!(%key, handle = %entry.handle, "Blob released");
            self.released_handles.insert(entry.handle, key);
            self.released_keys.insert(key);
        }
    }

    fn missing_key(&self, key: &BlobKey, reading: bool) -> LifecycleError {
        match (self.released_keys.contains(key), reading) {
            (true, true) => LifecycleError::UseAfterRelease(*key),
            (true, false) => LifecycleError::KeyAlreadyReleased(*key),
            (false, _) => LifecycleError::UnknownKey(*key),
        }
    }

    fn report(&self, err: LifecycleError) -> LifecycleError {
        error!(error = %err, live = self.entries.len(), "Blob lifecycle violation");
        err
    }
}
