//! Compile stage: stage the normalized source into a sandbox, run the
//! compiler, and keep the produced executable in durable storage.

use super::StageExecutors;
use crate::layout;
use crate::model::{StageResult, StorageId, StudentId};
use crate::runner::CompileError;
use tracing::info;

pub(super) async fn run(cx: &StageExecutors, student: &StudentId) -> StageResult {
    let sandbox = match cx.sandboxes.create().await {
        Ok(id) => id,
        Err(e) => {
            return failure(student, format!("failed to allocate sandbox: {e}"), String::new())
        }
    };

    let outcome = compile_in_sandbox(cx, student, sandbox).await;
    cx.release(sandbox).await;

    match outcome {
        Ok(output) => StageResult::CompileSuccess {
            student_id: student.clone(),
            output,
        },
        Err(e) => failure(student, e.reason, e.output),
    }
}

fn failure(student: &StudentId, reason: String, output: String) -> StageResult {
    info!(student = %student, reason, "compile failed");
    StageResult::CompileFailure {
        student_id: student.clone(),
        reason,
        output,
    }
}

async fn compile_in_sandbox(
    cx: &StageExecutors,
    student: &StudentId,
    sandbox: StorageId,
) -> Result<String, CompileError> {
    let infra = |reason: String| CompileError {
        reason,
        output: String::new(),
    };

    let source = tokio::fs::read(cx.layout.build_source_path(student))
        .await
        .map_err(|e| infra(format!("build stage source unavailable: {e}")))?;
    cx.sandboxes
        .put_file(sandbox, layout::BUILD_SOURCE_FILE, &source)
        .await
        .map_err(|e| infra(format!("failed to stage source: {e}")))?;

    let cwd = cx
        .sandboxes
        .path(sandbox)
        .await
        .map_err(|e| infra(e.to_string()))?;
    let compiled = cx.compiler.compile(layout::BUILD_SOURCE_FILE, &cwd).await?;

    // A zero exit with no artifact still fails; the executable is the
    // stage's whole point.
    let produced = cwd.join(layout::EXECUTABLE_FILE);
    if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
        return Err(CompileError {
            reason: "compiler exited cleanly but produced no executable".to_string(),
            output: compiled.output,
        });
    }

    let dest = cx.layout.executable_path(student);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| infra(format!("failed to create artifact directory: {e}")))?;
    }
    // fs::copy carries permission bits, so the executable stays executable.
    tokio::fs::copy(&produced, &dest)
        .await
        .map_err(|e| infra(format!("failed to store executable: {e}")))?;

    Ok(compiled.output)
}
