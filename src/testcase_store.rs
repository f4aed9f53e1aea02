//! Loading testcase configuration from the durable layout.
//!
//! Each testcase is a directory holding `execute_config.json` and
//! `test_config.json`. The file mtime rides along with every load; it is
//! the version token the rollback detector compares.

use crate::layout::Layout;
use crate::model::{ExecuteConfig, TestCaseConfig, TestCaseId, TestConfig};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TestCaseError {
    #[error("testcase i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad {file} for testcase {testcase}: {source}")]
    Parse {
        testcase: TestCaseId,
        file: &'static str,
        source: serde_json::Error,
    },
}

/// Accessor for the `testcases/` half of the durable layout.
#[derive(Debug, Clone)]
pub struct TestCaseStore {
    layout: Layout,
}

impl TestCaseStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// All configured testcase ids, sorted. A missing `testcases/` directory
    /// means no testcases.
    pub async fn list_ids(&self) -> Result<Vec<TestCaseId>, TestCaseError> {
        let dir = self.layout.testcases_dir();
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match TestCaseId::new(name) {
                Ok(id) => ids.push(id),
                Err(e) => warn!("skipping unusable testcase directory: {e}"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load a testcase's execute config with the config file's mtime.
    /// `None` when the testcase (or the file) does not exist.
    pub async fn load_execute_config(
        &self,
        testcase: &TestCaseId,
    ) -> Result<Option<(ExecuteConfig, DateTime<Utc>)>, TestCaseError> {
        self.load_config(testcase, &self.layout.execute_config_path(testcase), "execute_config.json")
            .await
    }

    /// Load a testcase's test config with the config file's mtime.
    pub async fn load_test_config(
        &self,
        testcase: &TestCaseId,
    ) -> Result<Option<(TestConfig, DateTime<Utc>)>, TestCaseError> {
        self.load_config(testcase, &self.layout.test_config_path(testcase), "test_config.json")
            .await
    }

    /// Both halves together; `None` when either file is missing.
    pub async fn load(
        &self,
        testcase: &TestCaseId,
    ) -> Result<Option<TestCaseConfig>, TestCaseError> {
        let Some((execute, _)) = self.load_execute_config(testcase).await? else {
            return Ok(None);
        };
        let Some((test, _)) = self.load_test_config(testcase).await? else {
            return Ok(None);
        };
        Ok(Some(TestCaseConfig { execute, test }))
    }

    pub async fn execute_config_mtime(
        &self,
        testcase: &TestCaseId,
    ) -> Result<Option<DateTime<Utc>>, TestCaseError> {
        file_mtime(&self.layout.execute_config_path(testcase)).await
    }

    pub async fn test_config_mtime(
        &self,
        testcase: &TestCaseId,
    ) -> Result<Option<DateTime<Utc>>, TestCaseError> {
        file_mtime(&self.layout.test_config_path(testcase)).await
    }

    async fn load_config<T: DeserializeOwned>(
        &self,
        testcase: &TestCaseId,
        path: &Path,
        file: &'static str,
    ) -> Result<Option<(T, DateTime<Utc>)>, TestCaseError> {
        // Sample the mtime before reading: an edit racing the read then
        // shows up as a version mismatch instead of passing unnoticed.
        let Some(mtime) = file_mtime(path).await? else {
            return Ok(None);
        };
        let raw = tokio::fs::read(path).await?;
        let config = serde_json::from_slice(&raw).map_err(|source| TestCaseError::Parse {
            testcase: testcase.clone(),
            file,
            source,
        })?;
        Ok(Some((config, mtime)))
    }
}

async fn file_mtime(path: &Path) -> Result<Option<DateTime<Utc>>, TestCaseError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
