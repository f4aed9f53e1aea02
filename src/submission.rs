//! Read-only access to student submission folders.
//!
//! Submission folders are populated by the ingestion collaborator; this
//! module only reads them: locating the single C source the build stage
//! expects, and hashing the whole tree so later runs can tell whether the
//! submission changed.

use crate::layout::Layout;
use crate::model::StudentId;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("no submission folder for student {0}")]
    NotFound(StudentId),
    #[error("no .c source file in the submission")]
    NoSource,
    #[error("more than one .c source file in the submission: {}", .0.join(", "))]
    MultipleSources(Vec<String>),
    #[error("submission i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accessor for the per-student submission trees under the durable layout.
#[derive(Debug, Clone)]
pub struct SubmissionStore {
    layout: Layout,
}

impl SubmissionStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn folder(&self, student: &StudentId) -> PathBuf {
        self.layout.submission_dir(student)
    }

    pub async fn exists(&self, student: &StudentId) -> bool {
        tokio::fs::try_exists(self.folder(student))
            .await
            .unwrap_or(false)
    }

    /// Hash the submission tree: SHA-256 over the sorted relative paths and
    /// file contents, folded to the leading eight bytes. Any content or
    /// rename change yields a different value.
    pub async fn checksum(&self, student: &StudentId) -> Result<u64, SubmissionError> {
        let folder = self.folder(student);
        if !tokio::fs::try_exists(&folder).await.unwrap_or(false) {
            return Err(SubmissionError::NotFound(student.clone()));
        }
        let files = collect_files(&folder)?;
        let mut hasher = Sha256::new();
        for (relative, absolute) in &files {
            hasher.update(relative.as_bytes());
            hasher.update([0u8]);
            hasher.update(std::fs::read(absolute)?);
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        Ok(u64::from_be_bytes(word))
    }

    /// Find the one `.c` file the build stage compiles. Zero or several
    /// source files are explicit errors so the grader sees why a build
    /// failed.
    pub async fn find_single_c_source(
        &self,
        student: &StudentId,
    ) -> Result<PathBuf, SubmissionError> {
        let folder = self.folder(student);
        if !tokio::fs::try_exists(&folder).await.unwrap_or(false) {
            return Err(SubmissionError::NotFound(student.clone()));
        }
        let sources: Vec<(String, PathBuf)> = collect_files(&folder)?
            .into_iter()
            .filter(|(relative, _)| {
                Path::new(relative)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("c"))
            })
            .collect();
        if sources.len() > 1 {
            return Err(SubmissionError::MultipleSources(
                sources.into_iter().map(|(rel, _)| rel).collect(),
            ));
        }
        match sources.into_iter().next() {
            Some((_, absolute)) => Ok(absolute),
            None => Err(SubmissionError::NoSource),
        }
    }
}

/// Walk a directory tree, returning `/`-joined relative paths with their
/// absolute counterparts, sorted by relative path. The `/` separator keeps
/// checksums identical across platforms.
pub(crate) fn collect_files(root: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((relative, path));
            }
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}
