//! Identifier types used across the pipeline.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors produced when constructing validated identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid student id {0:?} (expected e.g. \"12A3456789B\")")]
    InvalidStudentId(String),
    #[error("testcase id must not be empty")]
    EmptyTestCaseId,
}

fn student_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{2}[A-Z]\d{7}[A-Z]$").expect("student id pattern"))
}

/// A validated student identifier: two digits, a letter, seven digits, a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if student_id_pattern().is_match(&id) {
            Ok(Self(id))
        } else {
            Err(IdError::InvalidStudentId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StudentId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StudentId> for String {
    fn from(value: StudentId) -> Self {
        value.0
    }
}

/// A free-form testcase name. Non-empty; otherwise unconstrained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestCaseId(String);

impl TestCaseId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            Err(IdError::EmptyTestCaseId)
        } else {
            Ok(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TestCaseId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TestCaseId> for String {
    fn from(value: TestCaseId) -> Self {
        value.0
    }
}

/// A file key inside a testcase config or stage result: either a relative
/// path, or one of the `STDIN` / `STDOUT` sentinels. The sentinel spellings
/// are reserved and never refer to on-disk files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FileId {
    Stdin,
    Stdout,
    File(String),
}

impl FileId {
    pub fn file(path: impl Into<String>) -> Self {
        Self::File(path.into())
    }

    /// True for the `STDIN`/`STDOUT` sentinels.
    pub fn is_special(&self) -> bool {
        !matches!(self, FileId::File(_))
    }

    /// The relative path for normal files, `None` for sentinels.
    pub fn as_path(&self) -> Option<&str> {
        match self {
            FileId::File(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileId::Stdin => f.write_str("STDIN"),
            FileId::Stdout => f.write_str("STDOUT"),
            FileId::File(path) => f.write_str(path),
        }
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        match value.as_str() {
            "STDIN" => FileId::Stdin,
            "STDOUT" => FileId::Stdout,
            _ => FileId::File(value),
        }
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<FileId> for String {
    fn from(value: FileId) -> Self {
        value.to_string()
    }
}

/// Opaque handle for one ephemeral sandbox directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageId(u64);

impl StorageId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "box_{}", self.0)
    }
}
