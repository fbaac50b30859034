//! Persistence for cartridge save memory.
//!
//! Backup contents are keyed by [`CartridgeInfo::save_key`] so two ROMs with
//! the same title never share a save.
//!
//! [`CartridgeInfo::save_key`]: crate::CartridgeInfo::save_key

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

/// Where cartridge save memory lives between sessions.
pub trait SaveStorage {
    /// The stored contents for `key`, if any.
    ///
    /// # Errors
    ///
    /// Any I/O failure other than the entry not existing.
    fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Store `data` under `key`, replacing what was there.
    ///
    /// # Errors
    ///
    /// Any I/O failure.
    fn store(&mut self, key: &str, data: &[u8]) -> io::Result<()>;
}

/// One `<key>.sav` file per cartridge in a directory.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    dir: PathBuf,
}

impl DirectoryStorage {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.sav"))
    }
}

impl SaveStorage for DirectoryStorage {
    fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn store(&mut self, key: &str, data: &[u8]) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("sav.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)
    }
}

/// In-memory storage, for tests and hosts that persist elsewhere.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SaveStorage for MemoryStorage {
    fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn store(&mut self, key: &str, data: &[u8]) -> io::Result<()> {
        self.entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}
