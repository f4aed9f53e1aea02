//! Stage results as persisted by the result store.
//!
//! One record per (student, stage) key, eight variants in total. The JSON
//! form carries a `"type"` discriminator so records can be inspected and
//! migrated without knowing the producing code.

use super::bytes::FileBytes;
use super::ids::{FileId, StudentId, TestCaseId};
use super::stage::{Stage, StagePath, StageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One matched token: where it sits in the actual text and which expected
/// token it satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedToken {
    /// Byte offset of the token's first byte in the actual text.
    pub begin: usize,
    /// Byte offset one past the token's last byte.
    pub end: usize,
    /// Index into the expected-token list.
    pub expected_index: usize,
}

/// Outcome of matching one file's actual text against its expected tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched_tokens: Vec<MatchedToken>,
    /// Expected-token indices that no actual token satisfied.
    pub nonmatched_tokens: Vec<usize>,
}

impl MatchResult {
    pub fn is_accepted(&self) -> bool {
        self.nonmatched_tokens.is_empty()
    }
}

/// Per-file test outcome inside a TestSuccess record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum TestResultEntry {
    /// Expected but the program produced no such file.
    Absent,
    /// Produced but not listed in the expected outputs.
    Unexpected,
    /// Present on both sides; carries the token-match outcome.
    Tested { match_result: MatchResult },
}

impl TestResultEntry {
    /// Whether this entry lets the testcase pass. `Absent` never does.
    pub fn is_acceptable(&self) -> bool {
        match self {
            TestResultEntry::Absent => false,
            TestResultEntry::Unexpected => true,
            TestResultEntry::Tested { match_result } => match_result.is_accepted(),
        }
    }
}

/// A testcase is accepted iff every file entry is acceptable.
pub fn testcase_accepted(entries: &BTreeMap<FileId, TestResultEntry>) -> bool {
    entries.values().all(|e| e.is_acceptable())
}

/// The durable record for one (student, stage) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageResult {
    BuildSuccess {
        student_id: StudentId,
        submission_folder_checksum: u64,
    },
    BuildFailure {
        student_id: StudentId,
        reason: String,
    },
    CompileSuccess {
        student_id: StudentId,
        output: String,
    },
    CompileFailure {
        student_id: StudentId,
        reason: String,
        output: String,
    },
    ExecuteSuccess {
        student_id: StudentId,
        testcase_id: TestCaseId,
        execute_config_mtime: DateTime<Utc>,
        output_files: BTreeMap<FileId, FileBytes>,
    },
    ExecuteFailure {
        student_id: StudentId,
        testcase_id: TestCaseId,
        reason: String,
    },
    TestSuccess {
        student_id: StudentId,
        testcase_id: TestCaseId,
        test_config_mtime: DateTime<Utc>,
        test_result_output_files: BTreeMap<FileId, TestResultEntry>,
    },
    TestFailure {
        student_id: StudentId,
        testcase_id: TestCaseId,
        reason: String,
    },
}

impl StageResult {
    pub fn student_id(&self) -> &StudentId {
        match self {
            StageResult::BuildSuccess { student_id, .. }
            | StageResult::BuildFailure { student_id, .. }
            | StageResult::CompileSuccess { student_id, .. }
            | StageResult::CompileFailure { student_id, .. }
            | StageResult::ExecuteSuccess { student_id, .. }
            | StageResult::ExecuteFailure { student_id, .. }
            | StageResult::TestSuccess { student_id, .. }
            | StageResult::TestFailure { student_id, .. } => student_id,
        }
    }

    /// The stage this record belongs to, reconstructed from the variant and
    /// its testcase id.
    pub fn stage(&self) -> Stage {
        match self {
            StageResult::BuildSuccess { .. } | StageResult::BuildFailure { .. } => Stage::Build,
            StageResult::CompileSuccess { .. } | StageResult::CompileFailure { .. } => {
                Stage::Compile
            }
            StageResult::ExecuteSuccess { testcase_id, .. }
            | StageResult::ExecuteFailure { testcase_id, .. } => {
                Stage::Execute(testcase_id.clone())
            }
            StageResult::TestSuccess { testcase_id, .. }
            | StageResult::TestFailure { testcase_id, .. } => Stage::Test(testcase_id.clone()),
        }
    }

    pub fn stage_type(&self) -> StageType {
        self.stage().stage_type()
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StageResult::BuildSuccess { .. }
                | StageResult::CompileSuccess { .. }
                | StageResult::ExecuteSuccess { .. }
                | StageResult::TestSuccess { .. }
        )
    }
}

/// Condensed status of one slot in a stage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Missing,
    Success,
    Failure,
}

/// The aggregate view of one stage path: every stage of the path paired with
/// its stored result, missing slots explicit.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePathResult {
    path: StagePath,
    slots: Vec<Option<StageResult>>,
}

impl StagePathResult {
    /// Pair a path with its result slots. `slots` must align with
    /// `path.stages()`.
    pub fn new(path: StagePath, slots: Vec<Option<StageResult>>) -> Self {
        debug_assert_eq!(path.len(), slots.len());
        Self { path, slots }
    }

    pub fn path(&self) -> &StagePath {
        &self.path
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stage, Option<&StageResult>)> {
        self.path
            .stages()
            .iter()
            .zip(self.slots.iter().map(|s| s.as_ref()))
    }

    pub fn get(&self, stage: &Stage) -> Option<&StageResult> {
        self.iter()
            .find(|(s, _)| *s == stage)
            .and_then(|(_, r)| r)
    }

    pub fn get_by_type(&self, stage_type: StageType) -> Option<&StageResult> {
        self.iter()
            .find(|(s, _)| s.stage_type() == stage_type)
            .and_then(|(_, r)| r)
    }

    pub fn all_success(&self) -> bool {
        self.slots
            .iter()
            .all(|s| s.as_ref().is_some_and(|r| r.is_success()))
    }

    /// The first stage not recorded as a success; `None` when all succeeded.
    pub fn next_stage(&self) -> Option<&Stage> {
        self.iter()
            .find(|(_, r)| !r.is_some_and(|r| r.is_success()))
            .map(|(s, _)| s)
    }

    /// Per-slot status vector, used to detect whether a dispatch changed
    /// anything.
    pub fn status_snapshot(&self) -> Vec<StageStatus> {
        self.slots
            .iter()
            .map(|s| match s {
                None => StageStatus::Missing,
                Some(r) if r.is_success() => StageStatus::Success,
                Some(_) => StageStatus::Failure,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> StudentId {
        StudentId::new("12A3456789B").unwrap()
    }

    fn tid(s: &str) -> TestCaseId {
        TestCaseId::new(s).unwrap()
    }

    #[test]
    fn results_carry_type_discriminator() {
        let result = StageResult::BuildSuccess {
            student_id: sid(),
            submission_folder_checksum: 42,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "build_success");
        assert_eq!(json["submission_folder_checksum"], 42);
    }

    #[test]
    fn execute_success_round_trips_with_bytes() {
        let mut output_files = BTreeMap::new();
        output_files.insert(FileId::Stdout, FileBytes::from("hello\n"));
        output_files.insert(FileId::file("out.txt"), FileBytes::new(vec![0u8, 255]));
        let result = StageResult::ExecuteSuccess {
            student_id: sid(),
            testcase_id: tid("t1"),
            execute_config_mtime: Utc::now(),
            output_files,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: StageResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.stage(), Stage::Execute(tid("t1")));
    }

    #[test]
    fn test_entries_use_name_discriminator() {
        let entry = TestResultEntry::Tested {
            match_result: MatchResult {
                matched_tokens: vec![MatchedToken {
                    begin: 0,
                    end: 1,
                    expected_index: 0,
                }],
                nonmatched_tokens: vec![],
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["name"], "tested");
        assert_eq!(
            serde_json::to_value(&TestResultEntry::Absent).unwrap()["name"],
            "absent"
        );
        assert_eq!(
            serde_json::to_value(&TestResultEntry::Unexpected).unwrap()["name"],
            "unexpected"
        );
    }

    #[test]
    fn acceptance_requires_every_entry_acceptable() {
        let tested_ok = TestResultEntry::Tested {
            match_result: MatchResult {
                matched_tokens: vec![],
                nonmatched_tokens: vec![],
            },
        };
        let tested_bad = TestResultEntry::Tested {
            match_result: MatchResult {
                matched_tokens: vec![],
                nonmatched_tokens: vec![1],
            },
        };

        let mut entries = BTreeMap::new();
        entries.insert(FileId::Stdout, tested_ok.clone());
        entries.insert(FileId::file("extra.txt"), TestResultEntry::Unexpected);
        assert!(testcase_accepted(&entries));

        entries.insert(FileId::file("missing.txt"), TestResultEntry::Absent);
        assert!(!testcase_accepted(&entries));

        let mut entries = BTreeMap::new();
        entries.insert(FileId::Stdout, tested_bad);
        assert!(!testcase_accepted(&entries));
    }

    #[test]
    fn path_result_helpers() {
        let path = StagePath::for_testcase(tid("t1"));
        let build = StageResult::BuildSuccess {
            student_id: sid(),
            submission_folder_checksum: 1,
        };
        let compile = StageResult::CompileFailure {
            student_id: sid(),
            reason: "exit status 1".into(),
            output: "boom".into(),
        };
        let status = StagePathResult::new(
            path.clone(),
            vec![Some(build.clone()), Some(compile), None, None],
        );

        assert!(!status.all_success());
        assert_eq!(status.next_stage(), Some(&Stage::Compile));
        assert_eq!(status.get(&Stage::Build), Some(&build));
        assert_eq!(status.get(&Stage::Test(tid("t1"))), None);
        assert_eq!(
            status.status_snapshot(),
            vec![
                StageStatus::Success,
                StageStatus::Failure,
                StageStatus::Missing,
                StageStatus::Missing,
            ]
        );
    }

    #[test]
    fn all_success_path_has_no_next_stage() {
        let path = StagePath::prefix_only();
        let status = StagePathResult::new(
            path,
            vec![
                Some(StageResult::BuildSuccess {
                    student_id: sid(),
                    submission_folder_checksum: 9,
                }),
                Some(StageResult::CompileSuccess {
                    student_id: sid(),
                    output: String::new(),
                }),
            ],
        );
        assert!(status.all_success());
        assert_eq!(status.next_stage(), None);
    }
}
