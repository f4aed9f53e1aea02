//! Pipeline driver: runs every stage path of one student to a fixed point.
//!
//! Each pass walks the unfinished paths, applies rollback where recorded
//! results went stale, and dispatches at most one stage per path. A path
//! whose status stops changing is abandoned for the run so a permanently
//! failing stage cannot spin the loop. A rollback from Build clears every
//! path, not just the one that noticed: the shared prefix underpins all of
//! them, and per-testcase rows recorded against the old artifact must not
//! survive a rebuild.

use crate::config::GraderConfig;
use crate::layout::Layout;
use crate::model::{list_paths, Stage, StagePath, StageType, StudentId};
use crate::rollback::{RollbackDetector, RollbackError};
use crate::stages::StageExecutors;
use crate::store::{ResultStore, StoreError};
use crate::submission::{SubmissionError, SubmissionStore};
use crate::testcase_store::{TestCaseError, TestCaseStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Cooperative cancellation handle, checked between stage dispatches.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("grading stopped by request")]
    Stopped,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    TestCase(#[from] TestCaseError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

impl From<RollbackError> for DriverError {
    fn from(e: RollbackError) -> Self {
        match e {
            RollbackError::Store(e) => Self::Store(e),
            RollbackError::TestCase(e) => Self::TestCase(e),
            RollbackError::Submission(e) => Self::Submission(e),
        }
    }
}

/// Counts reported after a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSummary {
    /// Paths whose every stage is recorded successful.
    pub finished_paths: usize,
    /// Paths abandoned because a pass changed nothing for them.
    pub stalled_paths: usize,
    pub total_paths: usize,
}

/// Progress notifications emitted whenever a path finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    pub student_id: StudentId,
    pub finished_paths: usize,
    pub total_paths: usize,
    /// Last stage of the path whose completion is being reported.
    pub stage: Stage,
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, progress: TaskProgress);
}

/// Sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

#[async_trait]
impl ProgressSink for NullProgress {
    async fn on_progress(&self, _progress: TaskProgress) {}
}

pub struct PipelineDriver {
    layout: Layout,
    store: Arc<ResultStore>,
    executors: StageExecutors,
    detector: RollbackDetector,
    testcases: TestCaseStore,
    progress: Arc<dyn ProgressSink>,
}

impl PipelineDriver {
    pub fn new(config: &GraderConfig, store: Arc<ResultStore>) -> std::io::Result<Self> {
        let layout = Layout::new(&config.data_root);
        Ok(Self {
            executors: StageExecutors::new(config, store.clone())?,
            detector: RollbackDetector::new(
                store.clone(),
                SubmissionStore::new(layout.clone()),
                TestCaseStore::new(layout.clone()),
            ),
            testcases: TestCaseStore::new(layout.clone()),
            layout,
            store,
            progress: Arc::new(NullProgress),
        })
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Grade one student: drive every stage path until it is finished or a
    /// pass makes no progress on it.
    pub async fn grade(
        &self,
        student: &StudentId,
        stop: &StopFlag,
    ) -> Result<DriverSummary, DriverError> {
        let testcase_ids = self.testcases.list_ids().await?;
        let paths = list_paths(&testcase_ids);
        let total = paths.len();
        info!(student = %student, paths = total, "grading run started");

        let mut finished = vec![false; total];
        let mut stalled = vec![false; total];
        // A compile failure recorded before this run forces a re-build once;
        // re-running it forever would never terminate.
        let mut dispatched_compile = false;

        while finished
            .iter()
            .zip(&stalled)
            .any(|(f, s)| !f && !s)
        {
            if stop.is_stopped() {
                return Err(DriverError::Stopped);
            }

            for index in 0..paths.len() {
                if finished[index] || stalled[index] {
                    continue;
                }
                if stop.is_stopped() {
                    return Err(DriverError::Stopped);
                }
                let path = &paths[index];

                let mut status = self.store.get_path(student, path).await?;
                let detected = self
                    .detector
                    .detect(student, &status, !dispatched_compile)
                    .await?;
                if let Some(from) = detected {
                    if from == StageType::Build {
                        self.rollback_every_path(student, &paths).await?;
                        finished.fill(false);
                        stalled.fill(false);
                    } else {
                        self.detector.rollback(student, path, from).await?;
                    }
                    status = self.store.get_path(student, path).await?;
                }
                let baseline = status.status_snapshot();

                let next = match status.next_stage() {
                    None => {
                        finished[index] = true;
                        self.emit_progress(student, path, &finished, total).await;
                        continue;
                    }
                    Some(stage) => stage.clone(),
                };
                if next.stage_type() == StageType::Compile {
                    dispatched_compile = true;
                }
                self.executors.dispatch(student, &next).await?;

                let refreshed = self.store.get_path(student, path).await?;
                if refreshed.all_success() {
                    finished[index] = true;
                    self.emit_progress(student, path, &finished, total).await;
                } else if refreshed.status_snapshot() == baseline {
                    debug!(student = %student, path = %path, "no progress, abandoning path");
                    stalled[index] = true;
                }
            }
        }

        let summary = DriverSummary {
            finished_paths: finished.iter().filter(|f| **f).count(),
            stalled_paths: stalled.iter().filter(|s| **s).count(),
            total_paths: total,
        };
        info!(
            student = %student,
            finished = summary.finished_paths,
            stalled = summary.stalled_paths,
            "grading run ended"
        );
        Ok(summary)
    }

    /// Remove every derived artifact for the student: result rows, the
    /// timestamp, the normalized source, and the executable. The submission
    /// folder stays.
    pub async fn clear_student(&self, student: &StudentId) -> Result<(), DriverError> {
        self.store.clear_student(student).await?;
        for dir in [
            self.layout.build_dir(student),
            self.layout.artifact_dir(student),
        ] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(DriverError::Store(e.into())),
            }
        }
        info!(student = %student, "cleared derived state");
        Ok(())
    }

    async fn rollback_every_path(
        &self,
        student: &StudentId,
        paths: &[StagePath],
    ) -> Result<(), DriverError> {
        for path in paths {
            self.detector
                .rollback(student, path, StageType::Build)
                .await?;
        }
        Ok(())
    }

    async fn emit_progress(
        &self,
        student: &StudentId,
        path: &StagePath,
        finished: &[bool],
        total: usize,
    ) {
        let done = finished.iter().filter(|f| **f).count();
        if let Some(stage) = path.stages().last() {
            self.progress
                .on_progress(TaskProgress {
                    student_id: student.clone(),
                    finished_paths: done,
                    total_paths: total,
                    stage: stage.clone(),
                })
                .await;
        }
    }
}
