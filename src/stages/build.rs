//! Build stage: find the single C source and store its decoded, normalized
//! text along with the submission folder's checksum.

use super::StageExecutors;
use crate::model::{StageResult, StudentId};
use crate::text;
use anyhow::Context;
use tracing::info;

pub(super) async fn run(cx: &StageExecutors, student: &StudentId) -> StageResult {
    match try_build(cx, student).await {
        Ok(checksum) => StageResult::BuildSuccess {
            student_id: student.clone(),
            submission_folder_checksum: checksum,
        },
        Err(e) => {
            let reason = format!("{e:#}");
            info!(student = %student, reason, "build failed");
            StageResult::BuildFailure {
                student_id: student.clone(),
                reason,
            }
        }
    }
}

async fn try_build(cx: &StageExecutors, student: &StudentId) -> anyhow::Result<u64> {
    let source_path = cx.submissions.find_single_c_source(student).await?;
    let checksum = cx
        .submissions
        .checksum(student)
        .await
        .context("failed to checksum submission folder")?;

    let raw = tokio::fs::read(&source_path)
        .await
        .with_context(|| format!("failed to read source {}", source_path.display()))?;
    let decoded = text::decode_text(&raw).context("source file")?;
    let normalized = text::normalize_newlines(&decoded);

    let dest = cx.layout.build_source_path(student);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("failed to create build directory")?;
    }
    tokio::fs::write(&dest, normalized)
        .await
        .context("failed to write normalized source")?;

    Ok(checksum)
}
