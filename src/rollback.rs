//! Staleness detection for recorded results.
//!
//! Each stage records a version indicator for its inputs (the submission
//! checksum for Build, config file mtimes for Execute and Test). The
//! detector compares those against the current inputs and names the
//! earliest stage-type whose recorded result no longer holds; everything
//! from that stage to the end of the path must be invalidated.

use crate::model::{StagePath, StagePathResult, StageResult, StageType, StudentId};
use crate::store::{ResultStore, StoreError};
use crate::submission::{SubmissionError, SubmissionStore};
use crate::testcase_store::{TestCaseError, TestCaseStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    TestCase(#[from] TestCaseError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

pub struct RollbackDetector {
    store: Arc<ResultStore>,
    submissions: SubmissionStore,
    testcases: TestCaseStore,
}

impl RollbackDetector {
    pub fn new(
        store: Arc<ResultStore>,
        submissions: SubmissionStore,
        testcases: TestCaseStore,
    ) -> Self {
        Self {
            store,
            submissions,
            testcases,
        }
    }

    /// The earliest stage-type of the path whose recorded result is stale,
    /// or `None` when everything recorded still reflects current inputs.
    ///
    /// `retry_failed_compile` gates the compile-failure rule: a recorded
    /// compile failure forces a re-build only when the failure predates the
    /// current run, otherwise every pass would restart the same path.
    pub async fn detect(
        &self,
        student: &StudentId,
        status: &StagePathResult,
        retry_failed_compile: bool,
    ) -> Result<Option<StageType>, RollbackError> {
        // Submission changed since Build recorded its checksum. A missing
        // Build row with later rows behind it is an orphaned suffix and is
        // treated the same way.
        match status.get_by_type(StageType::Build) {
            Some(StageResult::BuildSuccess {
                submission_folder_checksum,
                ..
            }) => {
                // A vanished folder counts as changed; other hashing
                // failures surface as errors rather than a rollback.
                let current = match self.submissions.checksum(student).await {
                    Ok(checksum) => Some(checksum),
                    Err(SubmissionError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                if current != Some(*submission_folder_checksum) {
                    debug!(student = %student, "submission checksum changed");
                    return Ok(Some(StageType::Build));
                }
            }
            None | Some(_) => {
                if status.iter().skip(1).any(|(_, row)| row.is_some()) {
                    debug!(student = %student, "rows recorded past an unbuilt prefix");
                    return Ok(Some(StageType::Build));
                }
            }
        }

        if retry_failed_compile {
            if let Some(StageResult::CompileFailure { .. }) =
                status.get_by_type(StageType::Compile)
            {
                return Ok(Some(StageType::Build));
            }
        }

        let Some(testcase) = status.path().testcase_id() else {
            return Ok(None);
        };

        if let Some(StageResult::ExecuteSuccess {
            execute_config_mtime,
            ..
        }) = status.get_by_type(StageType::Execute)
        {
            let current = self.testcases.execute_config_mtime(testcase).await?;
            if current != Some(*execute_config_mtime) {
                debug!(student = %student, testcase = %testcase, "execute config changed");
                return Ok(Some(StageType::Execute));
            }
        }

        if let Some(StageResult::TestSuccess {
            test_config_mtime, ..
        }) = status.get_by_type(StageType::Test)
        {
            let current = self.testcases.test_config_mtime(testcase).await?;
            if current != Some(*test_config_mtime) {
                debug!(student = %student, testcase = %testcase, "test config changed");
                return Ok(Some(StageType::Test));
            }
        }

        Ok(None)
    }

    /// Delete rows from the end of the path backwards, stopping once the
    /// named stage-type's slot has been cleared. Missing rows are fine.
    pub async fn rollback(
        &self,
        student: &StudentId,
        path: &StagePath,
        from: StageType,
    ) -> Result<(), RollbackError> {
        info!(student = %student, path = %path, from = %from, "rolling back");
        for stage in path.stages().iter().rev() {
            match self.store.delete(student, stage).await {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            if stage.stage_type() == from {
                break;
            }
        }
        Ok(())
    }
}
