use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Problem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub difficulty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TestCase {
    pub id: i64,
    pub problem_id: i64,
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Submission {
    pub id: i64,
    pub problem_id: i64,
    pub source_code: String,
    pub verdict: String,
    pub created_at: DateTime<Utc>,
}

/// A stored similarity hit between two submissions of the same problem.
/// The pair is always ordered so `submission_a < submission_b`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlagiarismReport {
    pub id: i64,
    pub submission_a: i64,
    pub submission_b: i64,
    pub similarity: f64,
    pub jaccard_similarity: f64,
    pub containment_a_in_b: f64,
    pub containment_b_in_a: f64,
    pub created_at: DateTime<Utc>,
}
