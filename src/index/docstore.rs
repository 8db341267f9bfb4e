//! File-backed side-store holding full chunk payloads.
//!
//! One JSON file per key under `<work_dir>/file_stores/<collection>/`.
//! Keys are the UUIDs generated at indexing time and referenced from the
//! vector entry's `doc_id` metadata.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use etf_assistant_core::models::Chunk;

pub struct FileDocStore {
    root: PathBuf,
}

impl FileDocStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("Invalid side-store key: {:?}", key);
        }
        Ok(self.root.join(format!("{}.json", key)))
    }

    pub fn mset(&self, pairs: &[(String, Chunk)]) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        for (key, chunk) in pairs {
            let path = self.path_for(key)?;
            std::fs::write(&path, serde_json::to_vec(chunk)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }

    pub fn mget(&self, key: &str) -> Result<Option<Chunk>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).with_context(|| {
                format!("Corrupt side-store payload {}", path.display())
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Remove keys; missing keys are ignored.
    pub fn mdelete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = self.path_for(key)?;
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to delete {}", path.display()))
                }
            }
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to remove {}", self.root.display()))?;
        }
        Ok(())
    }
}
