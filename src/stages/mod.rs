//! Stage executors, one narrow use-case per pipeline stage.
//!
//! Every executor follows the same arc: gather inputs and run, then persist
//! exactly one result row for its (student, stage) key. Domain failures of any kind
//! are captured into the matching Failure variant. Only result-store errors
//! propagate, because a stage whose outcome cannot be persisted leaves the
//! pipeline with no record to drive on.

mod build;
mod compile;
mod execute;
mod test;

use crate::config::GraderConfig;
use crate::layout::Layout;
use crate::model::{Stage, StorageId, StudentId};
use crate::runner::{CompilerRunner, ProgramRunner};
use crate::sandbox::SandboxManager;
use crate::store::{ResultStore, StoreError};
use crate::submission::SubmissionStore;
use crate::testcase_store::TestCaseStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared collaborators for all four stage executors.
pub struct StageExecutors {
    store: Arc<ResultStore>,
    layout: Layout,
    submissions: SubmissionStore,
    testcases: TestCaseStore,
    sandboxes: SandboxManager,
    compiler: CompilerRunner,
    programs: ProgramRunner,
}

impl StageExecutors {
    pub fn new(config: &GraderConfig, store: Arc<ResultStore>) -> std::io::Result<Self> {
        let layout = Layout::new(&config.data_root);
        Ok(Self {
            store,
            submissions: SubmissionStore::new(layout.clone()),
            testcases: TestCaseStore::new(layout.clone()),
            sandboxes: SandboxManager::new()?,
            compiler: CompilerRunner::new(
                &config.compiler_path,
                Duration::from_secs(config.compile_timeout_secs),
            ),
            programs: ProgramRunner::new(),
            layout,
        })
    }

    /// Run one stage for one student and persist its result row.
    pub async fn dispatch(&self, student: &StudentId, stage: &Stage) -> Result<(), StoreError> {
        info!(student = %student, stage = %stage, "dispatching stage");
        let result = match stage {
            Stage::Build => build::run(self, student).await,
            Stage::Compile => compile::run(self, student).await,
            Stage::Execute(testcase) => execute::run(self, student, testcase).await,
            Stage::Test(testcase) => test::run(self, student, testcase).await?,
        };
        self.store.put(&result).await
    }

    /// Teardown failure must not overwrite a stage's real outcome, so it is
    /// only logged.
    async fn release(&self, sandbox: StorageId) {
        if let Err(e) = self.sandboxes.delete(sandbox).await {
            warn!(sandbox = %sandbox, "failed to release sandbox: {e}");
        }
    }
}
