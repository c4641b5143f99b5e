//! Submission intake as a local saga: an ordered list of steps, each with a
//! compensation. The runner executes steps in order; on the first failure it
//! compensates the already-completed steps in reverse and hands the original
//! error back. Compensation failures are logged, never propagated.

use crate::context::AppContext;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

pub struct Step<C> {
    pub name: &'static str,
    pub execute: for<'a> fn(&'a mut C) -> StepFuture<'a>,
    pub compensate: for<'a> fn(&'a mut C) -> StepFuture<'a>,
}

/// Drives the steps; see the module docs for the failure contract.
pub async fn run_saga<C>(ctx: &mut C, steps: &[Step<C>]) -> Result<()> {
    let mut completed = 0;
    for step in steps {
        match (step.execute)(ctx).await {
            Ok(()) => completed += 1,
            Err(err) => {
                tracing::warn!("intake step '{}' failed: {err:#}", step.name);
                for done in steps[..completed].iter().rev() {
                    if let Err(comp_err) = (done.compensate)(ctx).await {
                        tracing::error!(
                            "compensation for '{}' failed: {comp_err:#}",
                            done.name
                        );
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

struct IntakeCtx<'a> {
    app: &'a AppContext,
    problem_id: i64,
    source_code: &'a str,
    submission_id: Option<i64>,
    stored_file: Option<PathBuf>,
}

/// Accept a submission: persist it, optionally materialize its source on
/// disk, and place its id on both work queues in one atomic push. Either the
/// returned id is fully visible everywhere, or no observable state remains.
pub async fn submit(
    app: &AppContext,
    problem_id: i64,
    source_code: &str,
) -> Result<i64, PipelineError> {
    if source_code.trim().is_empty() {
        return Err(PipelineError::InvalidInput("source code is empty".into()));
    }

    let mut ctx = IntakeCtx {
        app,
        problem_id,
        source_code,
        submission_id: None,
        stored_file: None,
    };
    let steps: [Step<IntakeCtx>; 3] = [
        Step {
            name: "persist submission row",
            execute: persist_row,
            compensate: delete_row,
        },
        Step {
            name: "materialize source file",
            execute: materialize_source,
            compensate: remove_materialized,
        },
        Step {
            name: "enqueue for judging and plagiarism",
            execute: enqueue_both,
            compensate: no_compensation,
        },
    ];

    run_saga(&mut ctx, &steps)
        .await
        .map_err(PipelineError::TransientStorage)?;
    ctx.submission_id.ok_or_else(|| {
        PipelineError::TransientStorage(anyhow::anyhow!("intake finished without an id"))
    })
}

fn persist_row<'a, 'b>(ctx: &'a mut IntakeCtx<'b>) -> StepFuture<'a> {
    Box::pin(async move {
        let id = ctx
            .app
            .db
            .insert_submission(ctx.problem_id, ctx.source_code)
            .await?;
        ctx.submission_id = Some(id);
        tracing::debug!(submission_id = id, "submission row persisted");
        Ok(())
    })
}

fn delete_row<'a, 'b>(ctx: &'a mut IntakeCtx<'b>) -> StepFuture<'a> {
    Box::pin(async move {
        if let Some(id) = ctx.submission_id.take() {
            ctx.app.db.delete_submission(id).await?;
            tracing::debug!(submission_id = id, "submission row rolled back");
        }
        Ok(())
    })
}

/// Best effort: a failed write logs a warning and the saga proceeds; the
/// judge worker falls back to the database row.
fn materialize_source<'a, 'b>(ctx: &'a mut IntakeCtx<'b>) -> StepFuture<'a> {
    Box::pin(async move {
        let Some(dir) = ctx.app.config.submission_storage_path.as_deref() else {
            return Ok(());
        };
        let Some(id) = ctx.submission_id else {
            return Ok(());
        };
        let path = dir.join(format!("{id}.{}", ctx.app.language().extension));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, ctx.source_code.as_bytes()).await
        }
        .await;
        match written {
            Ok(()) => ctx.stored_file = Some(path),
            Err(err) => {
                tracing::warn!("failed to materialize source at {}: {err}", path.display());
            }
        }
        Ok(())
    })
}

fn remove_materialized<'a, 'b>(ctx: &'a mut IntakeCtx<'b>) -> StepFuture<'a> {
    Box::pin(async move {
        if let Some(path) = ctx.stored_file.take() {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("removing materialized source {}", path.display()))?;
        }
        Ok(())
    })
}

fn enqueue_both<'a, 'b>(ctx: &'a mut IntakeCtx<'b>) -> StepFuture<'a> {
    Box::pin(async move {
        let Some(id) = ctx.submission_id else {
            anyhow::bail!("no submission id to enqueue");
        };
        ctx.app.queue.enqueue_submission(id).await
    })
}

fn no_compensation<'a, 'b>(_ctx: &'a mut IntakeCtx<'b>) -> StepFuture<'a> {
    Box::pin(async { Ok(()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TraceCtx {
        log: Vec<&'static str>,
        fail_on: Option<&'static str>,
    }

    fn exec_named<'a>(ctx: &'a mut TraceCtx, name: &'static str) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.log.push(name);
            if ctx.fail_on == Some(name) {
                anyhow::bail!("{name} exploded");
            }
            Ok(())
        })
    }

    fn undo_named<'a>(ctx: &'a mut TraceCtx, name: &'static str) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.log.push(name);
            Ok(())
        })
    }

    fn exec_first(ctx: &mut TraceCtx) -> StepFuture<'_> {
        exec_named(ctx, "first")
    }
    fn exec_second(ctx: &mut TraceCtx) -> StepFuture<'_> {
        exec_named(ctx, "second")
    }
    fn exec_third(ctx: &mut TraceCtx) -> StepFuture<'_> {
        exec_named(ctx, "third")
    }
    fn undo_first(ctx: &mut TraceCtx) -> StepFuture<'_> {
        undo_named(ctx, "undo first")
    }
    fn undo_second(ctx: &mut TraceCtx) -> StepFuture<'_> {
        undo_named(ctx, "undo second")
    }
    fn undo_third(ctx: &mut TraceCtx) -> StepFuture<'_> {
        undo_named(ctx, "undo third")
    }

    fn three_steps() -> Vec<Step<TraceCtx>> {
        vec![
            Step {
                name: "first",
                execute: exec_first,
                compensate: undo_first,
            },
            Step {
                name: "second",
                execute: exec_second,
                compensate: undo_second,
            },
            Step {
                name: "third",
                execute: exec_third,
                compensate: undo_third,
            },
        ]
    }

    #[tokio::test]
    async fn success_runs_every_step_once_in_order() {
        let mut ctx = TraceCtx::default();
        run_saga(&mut ctx, &three_steps()).await.unwrap();
        assert_eq!(ctx.log, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn failure_compensates_completed_steps_in_reverse() {
        let mut ctx = TraceCtx {
            fail_on: Some("third"),
            ..Default::default()
        };
        let err = run_saga(&mut ctx, &three_steps()).await.unwrap_err();
        assert!(err.to_string().contains("third"));
        assert_eq!(
            ctx.log,
            vec!["first", "second", "third", "undo second", "undo first"]
        );
    }

    #[tokio::test]
    async fn first_step_failure_compensates_nothing() {
        let mut ctx = TraceCtx {
            fail_on: Some("first"),
            ..Default::default()
        };
        run_saga(&mut ctx, &three_steps()).await.unwrap_err();
        assert_eq!(ctx.log, vec!["first"]);
    }
}
