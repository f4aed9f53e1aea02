//! Ephemeral working directories for stage execution.
//!
//! Every sandbox is a numbered directory under one process-lifetime temp
//! root, owned by exactly one stage execution. Snapshots record the mtime
//! of every file inside a box; diffing the snapshots taken around a
//! subprocess run identifies the files it produced or touched.

use crate::model::StorageId;
use crate::submission::collect_files;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

/// Relative path of every sandbox file, mapped to its last-modified time.
pub type Snapshot = BTreeMap<String, SystemTime>;

const DELETE_ATTEMPTS: u32 = 5;
const DELETE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox {0} does not exist")]
    NotFound(StorageId),
    #[error("path {0:?} escapes the sandbox")]
    InvalidPath(String),
    #[error("sandbox i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Difference between two snapshots of the same box.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SandboxDiff {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

pub fn diff(before: &Snapshot, after: &Snapshot) -> SandboxDiff {
    let mut diff = SandboxDiff::default();
    for (path, mtime) in after {
        match before.get(path) {
            None => diff.created.push(path.clone()),
            Some(old) if old != mtime => diff.updated.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            diff.deleted.push(path.clone());
        }
    }
    diff
}

/// Allocates and tears down sandboxes under a single temp root that is
/// removed when the manager drops.
pub struct SandboxManager {
    root: TempDir,
    next_id: AtomicU64,
}

impl SandboxManager {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            root: tempfile::tempdir()?,
            next_id: AtomicU64::new(0),
        })
    }

    pub async fn create(&self) -> Result<StorageId, SandboxError> {
        let id = StorageId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        tokio::fs::create_dir_all(self.box_dir(id)).await?;
        debug!(sandbox = %id, "created sandbox");
        Ok(id)
    }

    /// Absolute path of the box, for use as a subprocess working directory.
    pub async fn path(&self, id: StorageId) -> Result<PathBuf, SandboxError> {
        self.existing_box(id).await
    }

    pub async fn put_file(
        &self,
        id: StorageId,
        relative_path: &str,
        bytes: &[u8],
    ) -> Result<(), SandboxError> {
        let dir = self.existing_box(id).await?;
        let target = dir.join(validate_relative(relative_path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(())
    }

    pub async fn get_file(
        &self,
        id: StorageId,
        relative_path: &str,
    ) -> Result<Vec<u8>, SandboxError> {
        let dir = self.existing_box(id).await?;
        let target = dir.join(validate_relative(relative_path)?);
        Ok(tokio::fs::read(&target).await?)
    }

    pub async fn list_files(
        &self,
        id: StorageId,
    ) -> Result<Vec<(String, SystemTime)>, SandboxError> {
        Ok(self.walk(id).await?.into_iter().collect())
    }

    pub async fn take_snapshot(&self, id: StorageId) -> Result<Snapshot, SandboxError> {
        self.walk(id).await
    }

    /// Remove the box directory. Idempotent; retries briefly because the OS
    /// can still hold files open right after a subprocess exits.
    pub async fn delete(&self, id: StorageId) -> Result<(), SandboxError> {
        let dir = self.box_dir(id);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    debug!(sandbox = %id, "deleted sandbox");
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) if attempt < DELETE_ATTEMPTS => {
                    warn!(sandbox = %id, attempt, "sandbox delete failed, retrying: {e}");
                    tokio::time::sleep(DELETE_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn box_dir(&self, id: StorageId) -> PathBuf {
        self.root.path().join(id.to_string())
    }

    async fn existing_box(&self, id: StorageId) -> Result<PathBuf, SandboxError> {
        let dir = self.box_dir(id);
        if tokio::fs::try_exists(&dir).await? {
            Ok(dir)
        } else {
            Err(SandboxError::NotFound(id))
        }
    }

    async fn walk(&self, id: StorageId) -> Result<Snapshot, SandboxError> {
        let dir = self.existing_box(id).await?;
        let mut snapshot = Snapshot::new();
        for (relative, absolute) in collect_files(&dir)? {
            let mtime = tokio::fs::metadata(&absolute).await?.modified()?;
            snapshot.insert(relative, mtime);
        }
        Ok(snapshot)
    }
}

/// Accept only plain relative paths. Absolute paths, `..`, and `.` are all
/// rejected so a box can never reach outside its own directory.
fn validate_relative(raw: &str) -> Result<PathBuf, SandboxError> {
    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            _ => return Err(SandboxError::InvalidPath(raw.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(SandboxError::InvalidPath(raw.to_string()));
    }
    Ok(clean)
}
