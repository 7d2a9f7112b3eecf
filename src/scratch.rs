//! Scratch storage for uploads. Every upload is written under a fresh UUID so
//! no two requests ever share a file, and is removed again when the request's
//! lease drops.

use crate::error::{ClassifyError, Result};
use crate::upload::UploadedImage;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// An upload persisted to disk, owned by the request that wrote it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchFile {
    pub path: PathBuf,
    pub id: Uuid,
    pub extension: String,
}

/// Where uploads are kept while they are being classified
pub trait ScratchStore: Send + Sync {
    /// Write the whole upload to a new, uniquely named file
    fn persist(&self, upload: &UploadedImage) -> Result<ScratchFile>;

    /// Remove a persisted file. Failures are logged, never raised.
    fn release(&self, file: &ScratchFile);
}

/// Scratch files in a local directory
#[derive(Debug, Clone)]
pub struct DiskScratchStore {
    dir: PathBuf,
}

impl DiskScratchStore {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| anyhow::anyhow!("cannot create scratch dir {dir:?}: {e}"))?;
        Ok(DiskScratchStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        // create_new: a name collision is an error, never an overwrite
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

impl ScratchStore for DiskScratchStore {
    fn persist(&self, upload: &UploadedImage) -> Result<ScratchFile> {
        let id = Uuid::new_v4();
        let path = self.dir.join(format!("{id}.{}", upload.extension));

        if let Err(source) = Self::write(&path, &upload.bytes) {
            // do not leave a partial file behind
            let _ = fs::remove_file(&path);
            return Err(ClassifyError::Write { path, source });
        }

        debug!("persisted {} bytes to {path:?}", upload.bytes.len());
        Ok(ScratchFile {
            path,
            id,
            extension: upload.extension.clone(),
        })
    }

    fn release(&self, file: &ScratchFile) {
        match fs::remove_file(&file.path) {
            Ok(()) => debug!("removed scratch file {:?}", file.path),
            Err(e) => warn!("failed to remove scratch file {:?}: {e}", file.path),
        }
    }
}

/// Holds a scratch file for the duration of a request and releases it
/// exactly once, on drop, whichever way the request ends
pub struct ScratchLease {
    store: Arc<dyn ScratchStore>,
    file: ScratchFile,
}

impl ScratchLease {
    pub fn acquire(store: Arc<dyn ScratchStore>, upload: &UploadedImage) -> Result<Self> {
        let file = store.persist(upload)?;
        Ok(ScratchLease { store, file })
    }

    pub fn file(&self) -> &ScratchFile {
        &self.file
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        self.store.release(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test::{scratch_dir, CountingStore};
    use std::collections::HashSet;

    fn upload(bytes: &[u8]) -> UploadedImage {
        UploadedImage {
            bytes: bytes.to_vec(),
            original_filename: "temp.jpeg".into(),
            extension: "jpeg".into(),
        }
    }

    #[test]
    fn test_persist_and_release() {
        let dir = scratch_dir();
        let store = DiskScratchStore::new(&dir).unwrap();

        let file = store.persist(&upload(b"hello")).unwrap();
        assert_eq!(file.path, dir.join(format!("{}.jpeg", file.id)));
        assert_eq!(fs::read(&file.path).unwrap(), b"hello");

        store.release(&file);
        assert!(!file.path.exists());

        // a second release only logs
        store.release(&file);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_names_never_repeat() {
        let dir = scratch_dir();
        let store = DiskScratchStore::new(&dir).unwrap();

        // same original filename and bytes every time
        let files: Vec<_> = (0..64)
            .map(|_| store.persist(&upload(b"same")).unwrap())
            .collect();
        let ids: HashSet<_> = files.iter().map(|f| f.id).collect();
        assert_eq!(ids.len(), files.len());

        files.iter().for_each(|f| store.release(f));
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_write_failure() {
        let dir = scratch_dir();
        let store = DiskScratchStore::new(&dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        match store.persist(&upload(b"lost")) {
            Err(ClassifyError::Write { path, .. }) => assert!(path.starts_with(&dir)),
            other => panic!("expected Write error, got {other:?}"),
        }
    }

    #[test]
    fn test_lease_releases_once() {
        let dir = scratch_dir();
        let store = Arc::new(CountingStore::new(&dir));

        let path = {
            let lease = ScratchLease::acquire(store.clone(), &upload(b"x")).unwrap();
            assert!(lease.file().path.exists());
            lease.file().path.clone()
        };

        assert!(!path.exists());
        assert_eq!(store.persisted(), 1);
        assert_eq!(store.released(), 1);
        fs::remove_dir_all(dir).unwrap();
    }
}
