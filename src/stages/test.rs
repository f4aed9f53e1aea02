//! Test stage: compare the execute stage's captured outputs against the
//! testcase's expected tokens, file by file.

use super::StageExecutors;
use crate::matcher;
use crate::model::{Stage, StageResult, StudentId, TestCaseId, TestResultEntry};
use crate::store::StoreError;
use crate::text;
use std::collections::BTreeMap;
use tracing::info;

pub(super) async fn run(
    cx: &StageExecutors,
    student: &StudentId,
    testcase: &TestCaseId,
) -> Result<StageResult, StoreError> {
    let failure = |reason: String| {
        info!(student = %student, testcase = %testcase, reason, "test failed");
        StageResult::TestFailure {
            student_id: student.clone(),
            testcase_id: testcase.clone(),
            reason,
        }
    };

    let execute_row = match cx
        .store
        .get(student, &Stage::Execute(testcase.clone()))
        .await
    {
        Ok(row) => row,
        Err(StoreError::NotFound { .. }) => {
            return Ok(failure("execute result not recorded".to_string()))
        }
        Err(e) => return Err(e),
    };
    let output_files = match execute_row {
        StageResult::ExecuteSuccess { output_files, .. } => output_files,
        _ => return Ok(failure("execute stage did not succeed".to_string())),
    };

    let (config, config_mtime) = match cx.testcases.load_test_config(testcase).await {
        Ok(Some(loaded)) => loaded,
        Ok(None) => return Ok(failure("testcase has no test config".to_string())),
        Err(e) => return Ok(failure(e.to_string())),
    };

    // Union of expected and produced file ids. Expected-only entries become
    // Absent and produced-only ones Unexpected; the rest run the matcher.
    let mut entries = BTreeMap::new();
    for (id, expected) in &config.expected_output_files {
        let entry = match output_files.get(id) {
            None => TestResultEntry::Absent,
            Some(bytes) => match text::decode_text(bytes.as_slice()) {
                Ok(actual) => TestResultEntry::Tested {
                    match_result: matcher::match_tokens(&actual, expected, &config.options),
                },
                Err(e) => return Ok(failure(format!("output {id} undecodable: {e}"))),
            },
        };
        entries.insert(id.clone(), entry);
    }
    for id in output_files.keys() {
        if !config.expected_output_files.contains_key(id) {
            entries.insert(id.clone(), TestResultEntry::Unexpected);
        }
    }

    Ok(StageResult::TestSuccess {
        student_id: student.clone(),
        testcase_id: testcase.clone(),
        test_config_mtime: config_mtime,
        test_result_output_files: entries,
    })
}
