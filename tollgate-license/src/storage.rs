//! Persistence of tokens and client state.
//!
//! Everything the client keeps is a small text blob in a named slot. Slots
//! are written by full replacement: a crash mid-write leaves either the old
//! or the new content, never a mix.

use crate::error::{LicenseError, LicenseResult};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;
use tracing::debug;

/// Named persistence slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Signed license activation token.
    Activation,
    /// Signed verified-trial token.
    Trial,
    /// Last sync time and failure count.
    SyncState,
    /// Highest wall-clock time observed.
    Watermark,
    /// Unsigned local trial record.
    LocalTrial,
    /// Correlation record of the last offline request.
    OfflineRequest,
}

impl Slot {
    /// Returns the file name used by [`FileStorage`].
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Activation => "activation.dat",
            Self::Trial => "trial.dat",
            Self::SyncState => "sync_state.json",
            Self::Watermark => "watermark.json",
            Self::LocalTrial => "local_trial.json",
            Self::OfflineRequest => "offline_request.json",
        }
    }
}

/// Backend for slot persistence.
pub trait SlotStorage: Send + Sync {
    /// Reads a slot, `None` if it was never written or was removed.
    fn read(&self, slot: Slot) -> LicenseResult<Option<String>>;

    /// Atomically replaces a slot's content.
    fn write(&self, slot: Slot, data: &str) -> LicenseResult<()>;

    /// Removes a slot. Removing a missing slot is not an error.
    fn remove(&self, slot: Slot) -> LicenseResult<()>;
}

/// One file per slot inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Creates a file storage rooted at `dir` (created lazily on first write).
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, slot: Slot) -> PathBuf {
        self.dir.join(slot.file_name())
    }
}

impl SlotStorage for FileStorage {
    fn read(&self, slot: Slot) -> LicenseResult<Option<String>> {
        match std::fs::read_to_string(self.path(slot)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, slot: Slot, data: &str) -> LicenseResult<()> {
        std::fs::create_dir_all(&self.dir)?;

        // Write a sibling temp file, flush it, then rename over the target.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(slot))
            .map_err(|e| LicenseError::Storage(e.error.to_string()))?;

        debug!("wrote slot {:?} ({} bytes)", slot, data.len());
        Ok(())
    }

    fn remove(&self, slot: Slot) -> LicenseResult<()> {
        match std::fs::remove_file(self.path(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-lifetime storage for [`crate::PermissionScope::InMemory`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: RwLock<HashMap<Slot, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStorage for MemoryStorage {
    fn read(&self, slot: Slot) -> LicenseResult<Option<String>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| LicenseError::Storage("memory storage poisoned".to_string()))?;
        Ok(slots.get(&slot).cloned())
    }

    fn write(&self, slot: Slot, data: &str) -> LicenseResult<()> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| LicenseError::Storage("memory storage poisoned".to_string()))?;
        slots.insert(slot, data.to_string());
        Ok(())
    }

    fn remove(&self, slot: Slot) -> LicenseResult<()> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| LicenseError::Storage("memory storage poisoned".to_string()))?;
        slots.remove(&slot);
        Ok(())
    }
}

/// Persists one signed token (activation or trial) as its envelope string.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn SlotStorage>,
    slot: Slot,
}

impl TokenStore {
    /// Creates a store for the token in `slot`.
    pub fn new(storage: Arc<dyn SlotStorage>, slot: Slot) -> Self {
        Self { storage, slot }
    }

    /// Loads the stored envelope, `None` if nothing is stored.
    pub fn load(&self) -> LicenseResult<Option<String>> {
        Ok(self
            .storage
            .read(self.slot)?
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty()))
    }

    /// Atomically replaces the stored envelope.
    pub fn save(&self, raw: &str) -> LicenseResult<()> {
        self.storage.write(self.slot, raw)
    }

    /// Checks if a token is stored.
    pub fn has_token(&self) -> LicenseResult<bool> {
        Ok(self.load()?.is_some())
    }

    /// Erases the stored token.
    pub fn clear(&self) -> LicenseResult<()> {
        self.storage.remove(self.slot)
    }
}
