//! Task manager: a bounded pool of per-student grading runs.
//!
//! Tasks queue up and a supervisor tick promotes them into running workers,
//! never more than `max_workers` at once. Each worker drives one student
//! through the pipeline; each holds its own stop flag so a kill lands
//! between stage dispatches rather than mid-write.

use crate::config::GraderConfig;
use crate::driver::{DriverError, PipelineDriver, StopFlag};
use crate::model::StudentId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum TaskOperationError {
    #[error("student {0} is already scheduled")]
    AlreadyScheduled(StudentId),
}

/// One grading request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingTask {
    pub student_id: StudentId,
}

impl GradingTask {
    pub fn new(student_id: StudentId) -> Self {
        Self { student_id }
    }
}

struct RunningTask {
    stop: StopFlag,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PoolState {
    queued: VecDeque<GradingTask>,
    running: HashMap<StudentId, RunningTask>,
}

struct Inner {
    driver: Arc<PipelineDriver>,
    max_workers: usize,
    state: Mutex<PoolState>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("task pool state poisoned")
    }

    /// Drop finished workers and promote queued tasks into free slots.
    /// Only the supervisor loop calls this, so workers start on its tick.
    fn pump(&self) {
        let mut state = self.lock();
        state.running.retain(|_, task| !task.handle.is_finished());

        while state.running.len() < self.max_workers {
            let Some(task) = state.queued.pop_front() else {
                break;
            };
            let student = task.student_id.clone();
            let stop = StopFlag::new();
            let handle = tokio::spawn(run_task(
                self.driver.clone(),
                student.clone(),
                stop.clone(),
            ));
            info!(student = %student, "grading task started");
            state.running.insert(student, RunningTask { stop, handle });
        }
    }
}

async fn run_task(driver: Arc<PipelineDriver>, student: StudentId, stop: StopFlag) {
    match driver.grade(&student, &stop).await {
        Ok(summary) => info!(
            student = %student,
            finished = summary.finished_paths,
            stalled = summary.stalled_paths,
            "grading task ended"
        ),
        Err(DriverError::Stopped) => warn!(student = %student, "grading task stopped"),
        Err(e) => error!(student = %student, "grading task failed: {e}"),
    }
}

pub struct TaskManager {
    inner: Arc<Inner>,
    supervisor: JoinHandle<()>,
}

impl TaskManager {
    pub fn new(config: &GraderConfig, driver: PipelineDriver) -> Self {
        let inner = Arc::new(Inner {
            driver: Arc::new(driver),
            max_workers: config.max_workers,
            state: Mutex::new(PoolState::default()),
        });

        let tick = Duration::from_millis(config.supervisor_tick_ms);
        let supervisor = tokio::spawn({
            let inner = inner.clone();
            async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    interval.tick().await;
                    inner.pump();
                }
            }
        });

        Self { inner, supervisor }
    }

    /// Queue one grading task. A student can hold at most one slot, queued
    /// or running.
    pub fn enqueue(&self, task: GradingTask) -> Result<(), TaskOperationError> {
        let mut state = self.inner.lock();
        let student = &task.student_id;
        let scheduled = state.running.contains_key(student)
            || state.queued.iter().any(|t| &t.student_id == student);
        if scheduled {
            return Err(TaskOperationError::AlreadyScheduled(student.clone()));
        }
        info!(student = %student, "grading task queued");
        state.queued.push_back(task);
        Ok(())
    }

    /// Queued plus running tasks.
    pub fn get_task_count(&self) -> usize {
        let state = self.inner.lock();
        state.queued.len() + state.running.len()
    }

    pub fn get_running_task_count(&self) -> usize {
        self.inner.lock().running.len()
    }

    /// Stop every task: queued ones are dropped, running ones get their
    /// stop flag set and their worker aborted.
    pub fn kill_all_tasks(&self) {
        let mut state = self.inner.lock();
        let dropped = state.queued.len();
        state.queued.clear();
        let stopped = state.running.len();
        for (_, task) in state.running.drain() {
            task.stop.stop();
            task.handle.abort();
        }
        info!(dropped, stopped, "killed all grading tasks");
    }

    /// Kill everything and stop the supervisor.
    pub fn shutdown(self) {
        self.kill_all_tasks();
        self.supervisor.abort();
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::store::ResultStore;

    fn sid(raw: &str) -> StudentId {
        StudentId::new(raw).unwrap()
    }

    fn manager(root: &std::path::Path, max_workers: usize) -> (TaskManager, Arc<ResultStore>) {
        let mut config = GraderConfig::new(root);
        config.max_workers = max_workers;
        config.supervisor_tick_ms = 20;
        let store = Arc::new(ResultStore::new(Layout::new(root)));
        let driver = PipelineDriver::new(&config, store.clone()).unwrap();
        (TaskManager::new(&config, driver), store)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn rejects_a_student_already_scheduled() {
        let root = tempfile::tempdir().unwrap();
        let (manager, _store) = manager(root.path(), 1);

        // Two distinct students schedule fine; a duplicate of one is refused.
        manager.enqueue(GradingTask::new(sid("12A3456789B"))).unwrap();
        manager.enqueue(GradingTask::new(sid("12A3456789C"))).unwrap();
        let err = manager
            .enqueue(GradingTask::new(sid("12A3456789C")))
            .unwrap_err();
        assert!(matches!(err, TaskOperationError::AlreadyScheduled(_)));
    }

    #[tokio::test]
    async fn drains_the_queue_through_a_single_slot() {
        let root = tempfile::tempdir().unwrap();
        let (manager, store) = manager(root.path(), 1);

        let students = [sid("12A3456789B"), sid("12A3456789C"), sid("12A3456789D")];
        for student in &students {
            manager.enqueue(GradingTask::new(student.clone())).unwrap();
        }

        wait_until(|| manager.get_task_count() == 0).await;
        for student in &students {
            // Every task ran far enough to record its build attempt.
            assert!(store.get_timestamp(student).await.unwrap().is_some());
        }
        manager.shutdown();
    }

    #[tokio::test]
    async fn kill_all_clears_queued_and_running() {
        let root = tempfile::tempdir().unwrap();
        let (manager, _store) = manager(root.path(), 1);

        manager.enqueue(GradingTask::new(sid("12A3456789B"))).unwrap();
        manager.enqueue(GradingTask::new(sid("12A3456789C"))).unwrap();
        manager.kill_all_tasks();
        assert_eq!(manager.get_task_count(), 0);

        // The slot frees up for new work afterwards.
        manager.enqueue(GradingTask::new(sid("12A3456789B"))).unwrap();
        wait_until(|| manager.get_task_count() == 0).await;
        manager.shutdown();
    }
}
