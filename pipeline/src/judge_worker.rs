//! Judge worker loop: pop a submission id, compile and run it against its
//! problem's test cases, and write exactly one terminal verdict. Internal
//! failures become `Judge Error`; `Pending` must never leak.

use crate::context::AppContext;
use crate::error::PipelineError;
use crate::queue::JUDGE_QUEUE;
use anyhow::Result;
use judge_engine::{classify, Executor};
use shared::{Submission, TestCase, Verdict};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub async fn run(app: Arc<AppContext>, worker_id: usize) {
    tracing::info!(worker_id, "judge worker started");
    loop {
        let mut consumer = match app.queue.consumer().await {
            Ok(consumer) => consumer,
            Err(err) => {
                tracing::error!(worker_id, "queue connection failed: {err:#}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };
        loop {
            let submission_id = match consumer.pop(JUDGE_QUEUE).await {
                Ok(id) => id,
                Err(err) => {
                    tracing::error!(worker_id, "queue pop failed: {err:#}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    break;
                }
            };
            process_submission(&app, submission_id).await;
        }
    }
}

async fn process_submission(app: &AppContext, submission_id: i64) {
    let submission = match app.db.get_submission(submission_id).await {
        Ok(Some(submission)) => submission,
        Ok(None) => {
            // Crash-window message for a row that no longer exists.
            tracing::warn!(submission_id, "submission missing from store; dropping");
            return;
        }
        Err(err) => {
            tracing::error!(submission_id, "loading submission failed: {err:#}");
            requeue_for_redelivery(app, submission_id).await;
            return;
        }
    };

    let test_cases = match app.db.get_test_cases(submission.problem_id).await {
        Ok(test_cases) => test_cases,
        Err(err) => {
            tracing::error!(submission_id, "loading test cases failed: {err:#}");
            requeue_for_redelivery(app, submission_id).await;
            return;
        }
    };

    let verdict = evaluate(app, &submission, &test_cases).await;
    match app.db.update_verdict(submission_id, &verdict).await {
        Ok(()) => tracing::info!(submission_id, verdict = %verdict, "verdict recorded"),
        Err(err) => {
            // The write is idempotent, so redelivery is safe.
            tracing::error!(submission_id, "verdict write failed: {err:#}");
            requeue_for_redelivery(app, submission_id).await;
        }
    }
}

async fn requeue_for_redelivery(app: &AppContext, submission_id: i64) {
    if let Err(err) = app.queue.requeue(JUDGE_QUEUE, submission_id).await {
        tracing::error!(submission_id, "requeue failed, message lost: {err:#}");
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
}

/// Always lands on a terminal verdict label.
async fn evaluate(app: &AppContext, submission: &Submission, test_cases: &[TestCase]) -> String {
    if test_cases.is_empty() {
        return Verdict::JudgeError.with_reason("No test cases");
    }

    let source_code = load_source(app, submission).await;
    match judge_in_sandbox(app, &source_code, test_cases).await {
        Ok(verdict) => verdict,
        Err(setup) => {
            tracing::error!(submission_id = submission.id, "{setup}");
            let reason = match &setup {
                PipelineError::SandboxSetup(reason) => reason.as_str(),
                _ => "Sandbox failure",
            };
            Verdict::JudgeError.with_reason(reason)
        }
    }
}

/// Work-dir lifecycle around the sandbox run. Setup failures carry the
/// verdict-facing reason; the underlying cause is logged where it occurs.
async fn judge_in_sandbox(
    app: &AppContext,
    source_code: &str,
    test_cases: &[TestCase],
) -> Result<String, PipelineError> {
    let work_dir = std::env::temp_dir().join(format!("judge_{}", Uuid::new_v4()));
    if let Err(err) = tokio::fs::create_dir_all(&work_dir).await {
        tracing::error!("work directory {} unavailable: {err}", work_dir.display());
        return Err(PipelineError::SandboxSetup("Storage unavailable".into()));
    }

    let outcome = judge_in_dir(app, source_code, test_cases, &work_dir).await;

    if let Err(err) = tokio::fs::remove_dir_all(&work_dir).await {
        tracing::warn!("work directory cleanup failed: {err}");
    }

    outcome.map_err(|err| {
        tracing::error!("sandbox orchestration failed: {err:#}");
        PipelineError::SandboxSetup("Sandbox failure".into())
    })
}

async fn judge_in_dir(
    app: &AppContext,
    source_code: &str,
    test_cases: &[TestCase],
    work_dir: &Path,
) -> Result<String> {
    let executor = Executor::new(app.judge_config.clone());

    let compiled = executor.compile(source_code, work_dir).await?;
    if !compiled.success {
        return Ok(Verdict::CompilationError.as_str().to_string());
    }

    // Test cases arrive in ascending id order; the first failure decides.
    for test_case in test_cases {
        let report = executor
            .execute(&compiled.binary, work_dir, test_case.input.as_bytes())
            .await?;
        let verdict = classify(&report, &test_case.expected_output);
        if verdict != Verdict::Accepted {
            return Ok(verdict.as_str().to_string());
        }
    }
    Ok(Verdict::Accepted.as_str().to_string())
}

/// The materialized file wins when storage is configured; the row is the
/// fallback.
async fn load_source(app: &AppContext, submission: &Submission) -> String {
    if let Some(dir) = app.config.submission_storage_path.as_deref() {
        let path = dir.join(format!("{}.{}", submission.id, app.language().extension));
        match tokio::fs::read_to_string(&path).await {
            Ok(source) => return source,
            Err(err) => {
                tracing::debug!(
                    "materialized source {} unavailable ({err}); using stored row",
                    path.display()
                );
            }
        }
    }
    submission.source_code.clone()
}
