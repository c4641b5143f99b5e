//! Plagiarism worker loop: fingerprint each submission, keep the
//! per-problem similarity index current, and store a report for every
//! candidate pair whose blended score clears the threshold.

use crate::context::AppContext;
use crate::queue::PLAGIARISM_QUEUE;
use anyhow::Result;
use plagiarism_engine::{fingerprint, score, Fingerprint, Similarity};
use shared::Submission;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(app: Arc<AppContext>) {
    tracing::info!("plagiarism worker started");
    loop {
        let mut consumer = match app.queue.consumer().await {
            Ok(consumer) => consumer,
            Err(err) => {
                tracing::error!("queue connection failed: {err:#}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };
        loop {
            let submission_id = match consumer.pop(PLAGIARISM_QUEUE).await {
                Ok(id) => id,
                Err(err) => {
                    tracing::error!("queue pop failed: {err:#}");
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
            tracing::debug!(submission_id, "submission missing from store; dropping");
            return;
        }
        Err(err) => {
            tracing::error!(submission_id, "loading submission failed: {err:#}");
            if let Err(requeue_err) = app.queue.requeue(PLAGIARISM_QUEUE, submission_id).await {
                tracing::error!(submission_id, "requeue failed, message lost: {requeue_err:#}");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            return;
        }
    };

    // A failure here loses only this submission's analysis, never the loop.
    if let Err(err) = analyze(app, &submission).await {
        tracing::error!(submission_id, "plagiarism analysis failed: {err:#}");
    }
}

async fn analyze(app: &AppContext, submission: &Submission) -> Result<()> {
    let query_fp = fingerprint_of(app, submission);

    let index_handle = app.lsh.for_problem(submission.problem_id);
    let mut guard = index_handle.lock().await;
    if !guard.initialized {
        let existing = app.db.list_problem_submissions(submission.problem_id).await?;
        for row in &existing {
            if row.id == submission.id {
                continue;
            }
            let row_fp = fingerprint_of(app, row);
            guard.index.add(row.id, &row_fp);
        }
        guard.initialized = true;
        tracing::info!(
            problem_id = submission.problem_id,
            submissions = existing.len(),
            "similarity index built from persisted submissions"
        );
    }
    guard.index.add(submission.id, &query_fp);
    let candidates = guard.index.candidates(&query_fp);
    drop(guard);

    for candidate in candidates {
        if candidate.submission_id == submission.id {
            continue;
        }
        if let Err(err) = score_pair(app, submission, candidate.submission_id, &query_fp).await {
            tracing::warn!(
                "scoring {} against {} failed: {err:#}",
                submission.id,
                candidate.submission_id
            );
        }
    }
    Ok(())
}

fn fingerprint_of(app: &AppContext, submission: &Submission) -> Arc<Fingerprint> {
    if let Some(cached) = app.fingerprints.get(submission.id) {
        return cached;
    }
    let computed = Arc::new(fingerprint(&submission.source_code));
    app.fingerprints.insert(submission.id, computed.clone());
    computed
}

async fn score_pair(
    app: &AppContext,
    submission: &Submission,
    other_id: i64,
    query_fp: &Fingerprint,
) -> Result<()> {
    let other_fp = match app.fingerprints.get(other_id) {
        Some(cached) => cached,
        None => {
            let Some(other) = app.db.get_submission(other_id).await? else {
                // Candidate deleted since it was indexed; nothing to score.
                return Ok(());
            };
            let computed = Arc::new(fingerprint(&other.source_code));
            app.fingerprints.insert(other_id, computed.clone());
            computed
        }
    };

    let scores = score(query_fp, &other_fp);
    if scores.blended < app.config.plagiarism_threshold {
        return Ok(());
    }

    let (first, second) = ordered_pair(submission.id, other_id);
    let oriented = if first == submission.id {
        scores
    } else {
        swap_containments(scores)
    };
    app.db.upsert_report(first, second, &oriented).await?;
    tracing::info!(
        submission_a = first,
        submission_b = second,
        similarity = oriented.blended,
        "plagiarism report recorded"
    );
    Ok(())
}

/// Reports always store the smaller id first.
pub fn ordered_pair(x: i64, y: i64) -> (i64, i64) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

/// The stored containments are relative to the ordered pair, not to which
/// submission happened to be queried.
fn swap_containments(scores: Similarity) -> Similarity {
    Similarity {
        containment_a_in_b: scores.containment_b_in_a,
        containment_b_in_a: scores.containment_a_in_b,
        ..scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_ordered_ascending() {
        assert_eq!(ordered_pair(3, 9), (3, 9));
        assert_eq!(ordered_pair(9, 3), (3, 9));
        assert_eq!(ordered_pair(5, 5), (5, 5));
    }

    #[test]
    fn containments_follow_the_ordered_pair() {
        let scores = Similarity {
            jaccard: 0.5,
            containment_a_in_b: 0.9,
            containment_b_in_a: 0.3,
            blended: 0.74,
        };
        let swapped = swap_containments(scores);
        assert_eq!(swapped.containment_a_in_b, 0.3);
        assert_eq!(swapped.containment_b_in_a, 0.9);
        assert_eq!(swapped.jaccard, 0.5);
        assert_eq!(swapped.blended, 0.74);
    }
}
