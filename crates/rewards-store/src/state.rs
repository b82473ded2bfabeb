//! File-backed engine state blobs and confirmations key/value storage.
//!
//! Blobs are opaque strings owned by the ledger engine. Writes go to a
//! sibling temp file first and are renamed into place, so a reader sees
//! either the old or the new contents.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::types::{BlobLoad, StateBlob};
use rewards_core::{DataPaths, Error, Result};

pub struct StateStore {
    ledger_state: PathBuf,
    publisher_state: PathBuf,
    publisher_list: PathBuf,
    confirmations: PathBuf,
}

impl StateStore {
    pub fn new(paths: &DataPaths) -> Self {
        Self {
            ledger_state: paths.ledger_state.clone(),
            publisher_state: paths.publisher_state.clone(),
            publisher_list: paths.publisher_list.clone(),
            confirmations: paths.confirmations.clone(),
        }
    }

    fn blob_path(&self, blob: StateBlob) -> &Path {
        match blob {
            StateBlob::Ledger => &self.ledger_state,
            StateBlob::Publisher => &self.publisher_state,
            StateBlob::PublisherList => &self.publisher_list,
        }
    }

    // ---------------------------------------------------------------
    // Engine blobs
    // ---------------------------------------------------------------

    pub fn save(&self, blob: StateBlob, data: &str) -> Result<()> {
        let path = self.blob_path(blob);
        write_atomic(path, data)?;
        debug!("Saved {} ({} bytes)", blob, data.len());
        Ok(())
    }

    /// Load a blob. A file that was never written is `NotFound`, any other
    /// read failure is `Failed`.
    pub fn load(&self, blob: StateBlob) -> BlobLoad {
        read_blob(self.blob_path(blob), &blob.to_string())
    }

    /// Delete a blob. Deleting one that does not exist succeeds.
    pub fn reset(&self, blob: StateBlob) -> Result<()> {
        remove_if_present(self.blob_path(blob))
    }

    // ---------------------------------------------------------------
    // Confirmations
    // ---------------------------------------------------------------

    fn confirmation_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.contains('\0')
        {
            return Err(Error::InvalidState(format!(
                "invalid confirmations key: {:?}",
                name
            )));
        }
        Ok(self.confirmations.join(name))
    }

    pub fn save_confirmation(&self, name: &str, value: &str) -> Result<()> {
        let path = self.confirmation_path(name)?;
        write_atomic(&path, value)
    }

    pub fn load_confirmation(&self, name: &str) -> BlobLoad {
        match self.confirmation_path(name) {
            Ok(path) => read_blob(&path, name),
            Err(e) => {
                warn!("{}", e);
                BlobLoad::Failed
            }
        }
    }

    pub fn reset_confirmation(&self, name: &str) -> Result<()> {
        let path = self.confirmation_path(name)?;
        remove_if_present(&path)
    }
}

fn write_atomic(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Storage(format!("not a file path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, data.as_bytes())?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Storage(format!(
            "failed to replace {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}

fn read_blob(path: &Path, label: &str) -> BlobLoad {
    match std::fs::read_to_string(path) {
        Ok(data) => BlobLoad::Found(data),
        Err(e) if e.kind() == ErrorKind::NotFound => BlobLoad::NotFound,
        Err(e) => {
            warn!("Failed to read {}: {}", label, e);
            BlobLoad::Failed
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_state() -> (StateStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path()).unwrap();
        (StateStore::new(&paths), dir)
    }

    #[test]
    fn test_never_saved_is_not_found() {
        let (state, _dir) = test_state();
        assert_eq!(state.load(StateBlob::Ledger), BlobLoad::NotFound);
        assert_eq!(state.load_confirmation("catalog"), BlobLoad::NotFound);
    }

    #[test]
    fn test_blob_round_trip_exact() {
        let (state, _dir) = test_state();
        let data = "{\"wallet\":\"ünïcode\"}\n\ttrailing  ";
        state.save(StateBlob::Publisher, data).unwrap();
        assert_eq!(state.load(StateBlob::Publisher), BlobLoad::Found(data.to_string()));

        state.save(StateBlob::Publisher, "").unwrap();
        assert_eq!(state.load(StateBlob::Publisher), BlobLoad::Found(String::new()));
    }

    #[test]
    fn test_blobs_are_independent() {
        let (state, _dir) = test_state();
        state.save(StateBlob::Ledger, "ledger").unwrap();
        state.save(StateBlob::PublisherList, "list").unwrap();
        state.reset(StateBlob::Ledger).unwrap();
        assert_eq!(state.load(StateBlob::Ledger), BlobLoad::NotFound);
        assert_eq!(state.load(StateBlob::PublisherList), BlobLoad::Found("list".into()));
        state.reset(StateBlob::Ledger).unwrap();
    }

    #[test]
    fn test_confirmations_keys() {
        let (state, _dir) = test_state();
        state.save_confirmation("catalog", "v1").unwrap();
        assert_eq!(state.load_confirmation("catalog"), BlobLoad::Found("v1".into()));
        state.reset_confirmation("catalog").unwrap();
        assert_eq!(state.load_confirmation("catalog"), BlobLoad::NotFound);

        assert!(state.save_confirmation("../escape", "x").is_err());
        assert!(state.save_confirmation("a/b", "x").is_err());
        assert_eq!(state.load_confirmation(""), BlobLoad::Failed);
    }
}
