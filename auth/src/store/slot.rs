//! Single-value persistence slots.

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{storage_error, Error, StorageErrorKind};

/// A durable holder for one string value.
///
/// Operations are synchronous so that a write can never be interleaved with
/// another session operation.
pub trait Slot: Send + Sync {
    /// Read the stored value, `None` when the slot is empty.
    fn load(&self) -> Result<Option<String>, Error>;

    /// Replace the stored value.
    fn save(&self, value: &str) -> Result<(), Error>;

    /// Empty the slot. Clearing an empty slot succeeds.
    fn clear(&self) -> Result<(), Error>;
}

/// Process-local slot, used in tests and for sessions that must not touch disk.
#[derive(Debug, Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Slot for MemorySlot {
    fn load(&self) -> Result<Option<String>, Error> {
        Ok(self.value.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, value: &str) -> Result<(), Error> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), Error> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Slot backed by a single file. Writes go through a sibling temporary file
/// and a rename so a reader never observes a half-written value.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Slot for FileSlot {
    fn load(&self) -> Result<Option<String>, Error> {
        match fs::read_to_string(&self.path) {
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(StorageErrorKind::Read, e)),
        }
    }

    fn save(&self, value: &str) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| storage_error(StorageErrorKind::Write, e))?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, value).map_err(|e| storage_error(StorageErrorKind::Write, e))?;
        fs::rename(&staging, &self.path).map_err(|e| storage_error(StorageErrorKind::Write, e))
    }

    fn clear(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(StorageErrorKind::Write, e)),
        }
    }
}
