//! Durable result store: one JSON file per (student, stage) row.
//!
//! All operations take the owning student's lock for their whole duration,
//! so two tasks touching the same student serialize while different
//! students proceed in parallel. Writes go through a temp file and a rename
//! so a crash can never leave a half-serialized row behind.
//!
//! This module does NOT:
//! - Decide when rows are stale (the rollback detector does)
//! - Enforce stage ordering on writes (stage executors do)

use crate::layout::Layout;
use crate::model::{Stage, StagePath, StagePathResult, StageResult, StudentId};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no result for student {student} at stage {stage}")]
    NotFound { student: StudentId, stage: String },
    #[error("result store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("result store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lazily-populated map of per-student async locks.
#[derive(Default)]
struct LockTable {
    inner: Mutex<HashMap<StudentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    fn handle(&self, student: &StudentId) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("student lock table poisoned");
        map.entry(student.clone()).or_default().clone()
    }
}

/// JSON-per-file result store rooted at the durable layout.
pub struct ResultStore {
    layout: Layout,
    locks: LockTable,
}

impl ResultStore {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            locks: LockTable::default(),
        }
    }

    /// Upsert the row for the result's (student, stage) key and advance the
    /// student's timestamp.
    pub async fn put(&self, result: &StageResult) -> Result<(), StoreError> {
        let student = result.student_id().clone();
        let stage = result.stage();
        let lock = self.locks.handle(&student);
        let _guard = lock.lock().await;

        let path = self.layout.result_path(&student, &stage);
        write_json_atomic(&path, result).await?;
        self.bump_timestamp(&student).await?;
        debug!(student = %student, stage = %stage, "stored stage result");
        Ok(())
    }

    pub async fn get(&self, student: &StudentId, stage: &Stage) -> Result<StageResult, StoreError> {
        let lock = self.locks.handle(student);
        let _guard = lock.lock().await;
        self.read_row(student, stage)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                student: student.clone(),
                stage: stage.serialized_name(),
            })
    }

    pub async fn exists(&self, student: &StudentId, stage: &Stage) -> Result<bool, StoreError> {
        let lock = self.locks.handle(student);
        let _guard = lock.lock().await;
        let path = self.layout.result_path(student, stage);
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Remove one row. `NotFound` when it does not exist; the timestamp
    /// advances only on an actual removal.
    pub async fn delete(&self, student: &StudentId, stage: &Stage) -> Result<(), StoreError> {
        let lock = self.locks.handle(student);
        let _guard = lock.lock().await;

        let path = self.layout.result_path(student, stage);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.bump_timestamp(student).await?;
                debug!(student = %student, stage = %stage, "deleted stage result");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                student: student.clone(),
                stage: stage.serialized_name(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Last mutation time for the student, `None` before any mutation.
    /// Reads never move it.
    pub async fn get_timestamp(
        &self,
        student: &StudentId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let lock = self.locks.handle(student);
        let _guard = lock.lock().await;
        Ok(self.read_timestamp(student).await)
    }

    /// Every slot of a stage path in one locked read; missing rows stay
    /// explicit `None`.
    pub async fn get_path(
        &self,
        student: &StudentId,
        path: &StagePath,
    ) -> Result<StagePathResult, StoreError> {
        let lock = self.locks.handle(student);
        let _guard = lock.lock().await;

        let mut slots = Vec::with_capacity(path.len());
        for stage in path.stages() {
            slots.push(self.read_row(student, stage).await?);
        }
        Ok(StagePathResult::new(path.clone(), slots))
    }

    /// Drop every row and the timestamp for a student. Idempotent.
    pub async fn clear_student(&self, student: &StudentId) -> Result<(), StoreError> {
        let lock = self.locks.handle(student);
        let _guard = lock.lock().await;

        remove_if_exists_dir(&self.layout.results_dir(student)).await?;
        remove_if_exists_file(&self.layout.timestamp_path(student)).await?;
        debug!(student = %student, "cleared stored results");
        Ok(())
    }

    async fn read_row(
        &self,
        student: &StudentId,
        stage: &Stage,
    ) -> Result<Option<StageResult>, StoreError> {
        let path = self.layout.result_path(student, stage);
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_timestamp(&self, student: &StudentId) -> Option<DateTime<Utc>> {
        let path = self.layout.timestamp_path(student);
        let raw = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(student = %student, "unreadable timestamp row, treating as absent: {e}");
                None
            }
        }
    }

    /// Advance the student's timestamp. Clamped to stay strictly above the
    /// previous value even when the clock is coarse or stepped backwards.
    async fn bump_timestamp(&self, student: &StudentId) -> Result<(), StoreError> {
        let now = Utc::now();
        let next = match self.read_timestamp(student).await {
            Some(last) if last >= now => last + Duration::nanoseconds(1),
            _ => now,
        };
        write_json_atomic(&self.layout.timestamp_path(student), &next).await
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists_dir(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists_file(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestCaseId;

    fn sid(raw: &str) -> StudentId {
        StudentId::new(raw).unwrap()
    }

    fn tid(raw: &str) -> TestCaseId {
        TestCaseId::new(raw).unwrap()
    }

    fn store() -> (tempfile::TempDir, ResultStore) {
        let root = tempfile::tempdir().unwrap();
        let store = ResultStore::new(Layout::new(root.path()));
        (root, store)
    }

    fn build_success(student: &StudentId, checksum: u64) -> StageResult {
        StageResult::BuildSuccess {
            student_id: student.clone(),
            submission_folder_checksum: checksum,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_root, store) = store();
        let student = sid("12A3456789B");
        let result = build_success(&student, 7);
        store.put(&result).await.unwrap();
        assert_eq!(store.get(&student, &Stage::Build).await.unwrap(), result);
        assert!(store.exists(&student, &Stage::Build).await.unwrap());
    }

    #[tokio::test]
    async fn repeated_put_is_idempotent_and_advances_timestamp() {
        let (_root, store) = store();
        let student = sid("12A3456789B");
        let result = build_success(&student, 7);

        store.put(&result).await.unwrap();
        let first_ts = store.get_timestamp(&student).await.unwrap().unwrap();
        let first = store.get(&student, &Stage::Build).await.unwrap();

        store.put(&result).await.unwrap();
        let second_ts = store.get_timestamp(&student).await.unwrap().unwrap();
        let second = store.get(&student, &Stage::Build).await.unwrap();

        assert_eq!(first, second);
        assert!(second_ts > first_ts, "timestamp must strictly advance");
    }

    #[tokio::test]
    async fn reads_do_not_touch_the_timestamp() {
        let (_root, store) = store();
        let student = sid("12A3456789B");
        store.put(&build_success(&student, 1)).await.unwrap();
        let ts = store.get_timestamp(&student).await.unwrap();

        let _ = store.get(&student, &Stage::Build).await.unwrap();
        let _ = store.exists(&student, &Stage::Compile).await.unwrap();
        assert_eq!(store.get_timestamp(&student).await.unwrap(), ts);
    }

    #[tokio::test]
    async fn students_are_isolated() {
        let (_root, store) = store();
        let a = sid("12A3456789B");
        let b = sid("12A3456789C");

        store.put(&build_success(&a, 1)).await.unwrap();
        assert!(store.get_timestamp(&b).await.unwrap().is_none());
        assert!(matches!(
            store.get(&b, &Stage::Build).await,
            Err(StoreError::NotFound { .. })
        ));

        let a_ts = store.get_timestamp(&a).await.unwrap();
        store.put(&build_success(&b, 2)).await.unwrap();
        assert_eq!(store.get_timestamp(&a).await.unwrap(), a_ts);
    }

    #[tokio::test]
    async fn delete_requires_presence_and_advances_timestamp() {
        let (_root, store) = store();
        let student = sid("12A3456789B");

        assert!(matches!(
            store.delete(&student, &Stage::Build).await,
            Err(StoreError::NotFound { .. })
        ));

        store.put(&build_success(&student, 1)).await.unwrap();
        let before = store.get_timestamp(&student).await.unwrap().unwrap();
        store.delete(&student, &Stage::Build).await.unwrap();
        let after = store.get_timestamp(&student).await.unwrap().unwrap();

        assert!(after > before);
        assert!(!store.exists(&student, &Stage::Build).await.unwrap());
    }

    #[tokio::test]
    async fn get_path_keeps_missing_slots_explicit() {
        let (_root, store) = store();
        let student = sid("12A3456789B");
        let path = StagePath::for_testcase(tid("t1"));

        store.put(&build_success(&student, 1)).await.unwrap();
        let status = store.get_path(&student, &path).await.unwrap();

        let slots: Vec<bool> = status.iter().map(|(_, r)| r.is_some()).collect();
        assert_eq!(slots, vec![true, false, false, false]);
        assert_eq!(status.next_stage(), Some(&Stage::Compile));
    }

    #[tokio::test]
    async fn shared_prefix_is_visible_on_every_path() {
        let (_root, store) = store();
        let student = sid("12A3456789B");
        store.put(&build_success(&student, 1)).await.unwrap();
        store
            .put(&StageResult::CompileSuccess {
                student_id: student.clone(),
                output: "ok".into(),
            })
            .await
            .unwrap();
        store
            .put(&StageResult::ExecuteFailure {
                student_id: student.clone(),
                testcase_id: tid("t1"),
                reason: "timeout".into(),
            })
            .await
            .unwrap();

        let p1 = store
            .get_path(&student, &StagePath::for_testcase(tid("t1")))
            .await
            .unwrap();
        let p2 = store
            .get_path(&student, &StagePath::for_testcase(tid("t2")))
            .await
            .unwrap();

        assert!(p1.get(&Stage::Build).is_some());
        assert!(p2.get(&Stage::Build).is_some());
        assert!(p1.get(&Stage::Compile).is_some());
        assert!(p2.get(&Stage::Compile).is_some());
        assert!(p1.get(&Stage::Execute(tid("t1"))).is_some());
        assert!(p2.get(&Stage::Execute(tid("t2"))).is_none());
    }

    #[tokio::test]
    async fn clear_student_removes_everything_and_is_idempotent() {
        let (_root, store) = store();
        let student = sid("12A3456789B");
        store.put(&build_success(&student, 1)).await.unwrap();

        store.clear_student(&student).await.unwrap();
        assert!(!store.exists(&student, &Stage::Build).await.unwrap());
        assert!(store.get_timestamp(&student).await.unwrap().is_none());

        store.clear_student(&student).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_puts_on_different_students_both_land() {
        let (_root, store) = store();
        let store = Arc::new(store);
        let a = sid("12A3456789B");
        let b = sid("12A3456789C");

        let row_a = build_success(&a, 1);
        let row_b = build_success(&b, 2);
        let (ra, rb) = tokio::join!(store.put(&row_a), store.put(&row_b));
        ra.unwrap();
        rb.unwrap();

        assert!(store.exists(&a, &Stage::Build).await.unwrap());
        assert!(store.exists(&b, &Stage::Build).await.unwrap());
    }
}
