use anyhow::{Context, Result};
use plagiarism_engine::Similarity;
use rand::Rng;
use shared::{Submission, TestCase};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;

const CONNECT_ATTEMPTS: u32 = 5;
const MAX_SERIALIZABLE_ATTEMPTS: u32 = 5;
const STATEMENT_TIMEOUT_MS: &str = "30000";

/// Tables the pipeline owns or reads. Created on first boot when absent;
/// an existing three-column `plagiarism_reports` is upgraded in place.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS problems (
        id          BIGSERIAL PRIMARY KEY,
        title       TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        difficulty  TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS test_cases (
        id              BIGSERIAL PRIMARY KEY,
        problem_id      BIGINT NOT NULL REFERENCES problems(id) ON DELETE CASCADE,
        input           TEXT NOT NULL,
        expected_output TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS submissions (
        id          BIGSERIAL PRIMARY KEY,
        problem_id  BIGINT NOT NULL,
        source_code TEXT NOT NULL,
        verdict     TEXT NOT NULL DEFAULT 'Pending',
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS plagiarism_reports (
        id           BIGSERIAL PRIMARY KEY,
        submission_a BIGINT NOT NULL,
        submission_b BIGINT NOT NULL,
        similarity   DOUBLE PRECISION NOT NULL,
        UNIQUE (submission_a, submission_b)
    )
    "#,
];

const REPORT_UPGRADES: &[&str] = &[
    "ALTER TABLE plagiarism_reports ADD COLUMN IF NOT EXISTS jaccard_similarity DOUBLE PRECISION NOT NULL DEFAULT 0",
    "ALTER TABLE plagiarism_reports ADD COLUMN IF NOT EXISTS containment_a_in_b DOUBLE PRECISION NOT NULL DEFAULT 0",
    "ALTER TABLE plagiarism_reports ADD COLUMN IF NOT EXISTS containment_b_in_a DOUBLE PRECISION NOT NULL DEFAULT 0",
    "ALTER TABLE plagiarism_reports ADD COLUMN IF NOT EXISTS created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()",
];

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Bounded pool with a per-statement timeout. Startup retries briefly;
    /// an unreachable database after that is fatal to the caller.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .context("parsing DATABASE_URL")?
            .options([("statement_timeout", STATEMENT_TIMEOUT_MS)]);

        let mut attempt = 0;
        let pool = loop {
            attempt += 1;
            let pool_options = PgPoolOptions::new()
                .max_connections(25)
                .min_connections(5)
                .max_lifetime(Duration::from_secs(30 * 60))
                .idle_timeout(Duration::from_secs(5 * 60))
                .acquire_timeout(Duration::from_secs(30));
            match pool_options.connect_with(options.clone()).await {
                Ok(pool) => break pool,
                Err(err) if attempt < CONNECT_ATTEMPTS => {
                    tracing::warn!("database unreachable (attempt {attempt}): {err}");
                    tokio::time::sleep(Duration::from_secs(2 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err).context("connecting to database"),
            }
        };

        Ok(Database { pool })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("creating core tables")?;
        }
        for statement in REPORT_UPGRADES {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("upgrading plagiarism_reports columns")?;
        }
        Ok(())
    }

    /// Serializable insert with retry on serialization failures and
    /// deadlocks. Returns the new monotonic submission id.
    pub async fn insert_submission(&self, problem_id: i64, source_code: &str) -> Result<i64> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_insert_submission(problem_id, source_code).await {
                Ok(id) => return Ok(id),
                Err(err)
                    if attempt < MAX_SERIALIZABLE_ATTEMPTS && is_serialization_failure(&err) =>
                {
                    let backoff = serialization_backoff(attempt);
                    tracing::debug!(
                        attempt,
                        "serialization failure inserting submission, backing off {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err).context("inserting submission"),
            }
        }
    }

    async fn try_insert_submission(
        &self,
        problem_id: i64,
        source_code: &str,
    ) -> sqlx::Result<i64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO submissions (problem_id, source_code, verdict, created_at)
            VALUES ($1, $2, 'Pending', NOW())
            RETURNING id
            "#,
        )
        .bind(problem_id)
        .bind(source_code)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Compensation for a failed intake; never called on the success path.
    pub async fn delete_submission(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM submissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting submission")?;
        Ok(())
    }

    pub async fn get_submission(&self, id: i64) -> Result<Option<Submission>> {
        let submission = sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("loading submission")?;
        Ok(submission)
    }

    /// Ascending id order: users observe the verdict of the first failing
    /// test, so this ordering is part of the contract.
    pub async fn get_test_cases(&self, problem_id: i64) -> Result<Vec<TestCase>> {
        let test_cases = sqlx::query_as::<_, TestCase>(
            "SELECT * FROM test_cases WHERE problem_id = $1 ORDER BY id",
        )
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await
        .context("loading test cases")?;
        Ok(test_cases)
    }

    /// Idempotent by design: re-judging after a crash overwrites.
    pub async fn update_verdict(&self, id: i64, verdict: &str) -> Result<()> {
        sqlx::query("UPDATE submissions SET verdict = $1 WHERE id = $2")
            .bind(verdict)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("writing verdict")?;
        Ok(())
    }

    /// Every persisted submission of one problem, for the lazy index build.
    pub async fn list_problem_submissions(&self, problem_id: i64) -> Result<Vec<Submission>> {
        let submissions = sqlx::query_as::<_, Submission>(
            "SELECT * FROM submissions WHERE problem_id = $1 ORDER BY id",
        )
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await
        .context("listing problem submissions")?;
        Ok(submissions)
    }

    /// Upsert keyed on the ordered pair; re-runs overwrite the scores.
    pub async fn upsert_report(
        &self,
        submission_a: i64,
        submission_b: i64,
        scores: &Similarity,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plagiarism_reports
                (submission_a, submission_b, similarity, jaccard_similarity,
                 containment_a_in_b, containment_b_in_a, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (submission_a, submission_b) DO UPDATE SET
                similarity = EXCLUDED.similarity,
                jaccard_similarity = EXCLUDED.jaccard_similarity,
                containment_a_in_b = EXCLUDED.containment_a_in_b,
                containment_b_in_a = EXCLUDED.containment_b_in_a,
                created_at = NOW()
            "#,
        )
        .bind(submission_a)
        .bind(submission_b)
        .bind(scores.blended)
        .bind(scores.jaccard)
        .bind(scores.containment_a_in_b)
        .bind(scores.containment_b_in_a)
        .execute(&self.pool)
        .await
        .context("upserting plagiarism report")?;
        Ok(())
    }
}

/// Serialization failures and deadlocks are worth retrying; constraint and
/// syntax errors are not.
pub fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

fn serialization_backoff(attempt: u32) -> Duration {
    let base_ms: u64 = rand::thread_rng().gen_range(50..100);
    Duration::from_millis(base_ms) * 2u32.pow(attempt.saturating_sub(1).min(4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_but_stays_bounded() {
        for attempt in 1..=MAX_SERIALIZABLE_ATTEMPTS {
            let backoff = serialization_backoff(attempt);
            assert!(backoff >= Duration::from_millis(50));
            assert!(backoff <= Duration::from_millis(100 * 16));
        }
        let first = serialization_backoff(1);
        assert!(first < Duration::from_millis(200));
    }

    #[test]
    fn non_database_errors_are_not_retryable() {
        assert!(!is_serialization_failure(&sqlx::Error::RowNotFound));
        assert!(!is_serialization_failure(&sqlx::Error::PoolClosed));
    }
}
