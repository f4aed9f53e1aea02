//! Concrete paths of the durable store under the data root.
//!
//! Pure path arithmetic; nothing here touches the filesystem. The layout:
//!
//! ```text
//! <data_root>/
//!   students/<student_id>/
//!     submission/        populated by the ingestion collaborator
//!     build/main.c       normalized source produced by the build stage
//!     artifact/main      executable produced by the compile stage
//!     results/<stage>.json
//!     timestamp.json
//!   testcases/<testcase_id>/
//!     execute_config.json
//!     test_config.json
//! ```

use crate::model::{Stage, StudentId, TestCaseId};
use std::path::{Path, PathBuf};

/// File name the build stage writes its normalized source under.
pub const BUILD_SOURCE_FILE: &str = "main.c";

/// File name of the compiled per-student executable.
pub const EXECUTABLE_FILE: &str = "main";

/// Path layout rooted at one data directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn students_dir(&self) -> PathBuf {
        self.root.join("students")
    }

    pub fn student_dir(&self, student: &StudentId) -> PathBuf {
        self.students_dir().join(student.as_str())
    }

    pub fn submission_dir(&self, student: &StudentId) -> PathBuf {
        self.student_dir(student).join("submission")
    }

    pub fn build_dir(&self, student: &StudentId) -> PathBuf {
        self.student_dir(student).join("build")
    }

    pub fn build_source_path(&self, student: &StudentId) -> PathBuf {
        self.build_dir(student).join(BUILD_SOURCE_FILE)
    }

    pub fn artifact_dir(&self, student: &StudentId) -> PathBuf {
        self.student_dir(student).join("artifact")
    }

    pub fn executable_path(&self, student: &StudentId) -> PathBuf {
        self.artifact_dir(student).join(EXECUTABLE_FILE)
    }

    pub fn results_dir(&self, student: &StudentId) -> PathBuf {
        self.student_dir(student).join("results")
    }

    pub fn result_path(&self, student: &StudentId, stage: &Stage) -> PathBuf {
        self.results_dir(student)
            .join(format!("{}.json", stage.serialized_name()))
    }

    pub fn timestamp_path(&self, student: &StudentId) -> PathBuf {
        self.student_dir(student).join("timestamp.json")
    }

    pub fn testcases_dir(&self) -> PathBuf {
        self.root.join("testcases")
    }

    pub fn testcase_dir(&self, testcase: &TestCaseId) -> PathBuf {
        self.testcases_dir().join(testcase.as_str())
    }

    pub fn execute_config_path(&self, testcase: &TestCaseId) -> PathBuf {
        self.testcase_dir(testcase).join("execute_config.json")
    }

    pub fn test_config_path(&self, testcase: &TestCaseId) -> PathBuf {
        self.testcase_dir(testcase).join("test_config.json")
    }
}
