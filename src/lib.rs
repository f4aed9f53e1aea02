//! Staged grading pipeline for student C submissions.
//!
//! A submission moves through `Build -> Compile -> Execute(t) -> Test(t)`,
//! one stage path per testcase. Every stage outcome is written to a durable
//! JSON store, so a rerun only redoes work whose inputs changed: the
//! [`rollback`] module compares stored checksums and config mtimes against
//! the filesystem and deletes exactly the rows that went stale.
//!
//! Execution happens in throwaway sandbox directories ([`sandbox`]), program
//! output is matched token by token against expected answers ([`matcher`]),
//! and the [`manager`] runs many students through the pipeline on a bounded
//! worker pool. The embedding application talks to [`TaskManager`],
//! [`PipelineDriver`] and [`ResultStore`]; the rest is machinery.

pub mod config;
pub mod driver;
pub mod layout;
pub mod logging;
pub mod manager;
pub mod matcher;
pub mod model;
pub mod rollback;
pub mod runner;
pub mod sandbox;
pub mod stages;
pub mod store;
pub mod submission;
pub mod testcase_store;
pub mod text;

pub use config::{ConfigError, GraderConfig};
pub use driver::{
    DriverError, DriverSummary, NullProgress, PipelineDriver, ProgressSink, StopFlag, TaskProgress,
};
pub use manager::{GradingTask, TaskManager, TaskOperationError};
pub use model::{
    FileId, Stage, StagePath, StagePathResult, StageResult, StageType, StudentId, TestCaseId,
};
pub use store::{ResultStore, StoreError};
