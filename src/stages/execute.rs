//! Execute stage: run the compiled program against one testcase's inputs
//! and capture everything it produced.

use super::StageExecutors;
use crate::layout;
use crate::model::{ExecuteConfig, FileBytes, FileId, StageResult, StorageId, StudentId, TestCaseId};
use crate::sandbox;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Reserved sandbox name the captured stdout is written under so the
/// snapshot diff picks it up like any produced file.
const STDOUT_CAPTURE_FILE: &str = "__stdout__";

pub(super) async fn run(
    cx: &StageExecutors,
    student: &StudentId,
    testcase: &TestCaseId,
) -> StageResult {
    let failure = |reason: String| {
        info!(student = %student, testcase = %testcase, reason, "execute failed");
        StageResult::ExecuteFailure {
            student_id: student.clone(),
            testcase_id: testcase.clone(),
            reason,
        }
    };

    let (config, config_mtime) = match cx.testcases.load_execute_config(testcase).await {
        Ok(Some(loaded)) => loaded,
        Ok(None) => return failure("testcase has no execute config".to_string()),
        Err(e) => return failure(e.to_string()),
    };

    let sandbox = match cx.sandboxes.create().await {
        Ok(id) => id,
        Err(e) => return failure(format!("failed to allocate sandbox: {e}")),
    };
    let outcome = execute_in_sandbox(cx, student, &config, sandbox).await;
    cx.release(sandbox).await;

    match outcome {
        Ok(output_files) => StageResult::ExecuteSuccess {
            student_id: student.clone(),
            testcase_id: testcase.clone(),
            execute_config_mtime: config_mtime,
            output_files,
        },
        Err(reason) => failure(reason),
    }
}

async fn execute_in_sandbox(
    cx: &StageExecutors,
    student: &StudentId,
    config: &ExecuteConfig,
    sandbox: StorageId,
) -> Result<BTreeMap<FileId, FileBytes>, String> {
    let cwd = cx
        .sandboxes
        .path(sandbox)
        .await
        .map_err(|e| e.to_string())?;
    let executable = cwd.join(layout::EXECUTABLE_FILE);
    tokio::fs::copy(cx.layout.executable_path(student), &executable)
        .await
        .map_err(|e| format!("compiled executable unavailable: {e}"))?;

    for (id, bytes) in &config.input_files {
        if let Some(relative) = id.as_path() {
            cx.sandboxes
                .put_file(sandbox, relative, bytes.as_slice())
                .await
                .map_err(|e| format!("failed to stage input {id}: {e}"))?;
        }
    }

    let before = cx
        .sandboxes
        .take_snapshot(sandbox)
        .await
        .map_err(|e| e.to_string())?;

    let timeout = Duration::from_secs(config.options.timeout_secs);
    let run = cx
        .programs
        .run(&executable, &cwd, config.stdin_bytes(), timeout)
        .await
        .map_err(|e| e.reason)?;

    cx.sandboxes
        .put_file(sandbox, STDOUT_CAPTURE_FILE, run.stdout.as_bytes())
        .await
        .map_err(|e| format!("failed to capture stdout: {e}"))?;
    let after = cx
        .sandboxes
        .take_snapshot(sandbox)
        .await
        .map_err(|e| e.to_string())?;

    let mut output_files = BTreeMap::new();
    for relative in sandbox::diff(&before, &after).created {
        let bytes = cx
            .sandboxes
            .get_file(sandbox, &relative)
            .await
            .map_err(|e| format!("failed to read produced file {relative}: {e}"))?;
        let id = if relative == STDOUT_CAPTURE_FILE {
            FileId::Stdout
        } else {
            FileId::file(relative)
        };
        output_files.insert(id, FileBytes::new(bytes));
    }
    Ok(output_files)
}
