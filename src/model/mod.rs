//! Core value types of the grading pipeline.
//!
//! Everything in here is plain data: identifiers, stages and stage paths,
//! stage results, and testcase configuration. No I/O happens in this module.

pub mod bytes;
pub mod ids;
pub mod result;
pub mod stage;
pub mod testcase;

pub use bytes::FileBytes;
pub use ids::{FileId, IdError, StorageId, StudentId, TestCaseId};
pub use result::{
    testcase_accepted, MatchResult, MatchedToken, StagePathResult, StageResult, StageStatus,
    TestResultEntry,
};
pub use stage::{list_paths, Stage, StagePath, StageType};
pub use testcase::{ExecuteConfig, ExecuteOptions, ExpectedToken, TestCaseConfig, TestConfig, TestOptions};
