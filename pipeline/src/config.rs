use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Everything the pipeline reads from the environment, resolved once at
/// boot. Missing connection URLs are fatal; tunables fall back to defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    /// Directory for materialized submission sources; `None` disables the
    /// on-disk copy and the judge reads straight from the database row.
    pub submission_storage_path: Option<PathBuf>,
    pub time_limit_seconds: u64,
    pub memory_limit_mb: u64,
    pub judge_user: String,
    pub plagiarism_threshold: f64,
    pub fp_cache_max_entries: usize,
    pub fp_cache_ttl: Duration,
    pub lsh_tables: usize,
    pub lsh_band_size_hint: usize,
    pub judge_workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL must be set")?;

        let submission_storage_path = match std::env::var("SUBMISSION_STORAGE_PATH") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => Some(PathBuf::from("/app/submissions")),
        };

        let judge_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Ok(Config {
            database_url,
            redis_url,
            submission_storage_path,
            time_limit_seconds: env_or("JUDGE_TIME_LIMIT_SECONDS", 2),
            memory_limit_mb: env_or("JUDGE_MEMORY_LIMIT_MB", 256),
            judge_user: std::env::var("JUDGE_USER").unwrap_or_else(|_| "nobody".to_string()),
            plagiarism_threshold: env_or(
                "PLAGIARISM_THRESHOLD",
                plagiarism_engine::similarity::DEFAULT_THRESHOLD,
            ),
            fp_cache_max_entries: env_or("FP_CACHE_MAX_ENTRIES", 10_000),
            fp_cache_ttl: Duration::from_secs(env_or("FP_CACHE_TTL", 30 * 60)),
            lsh_tables: env_or("LSH_TABLES", plagiarism_engine::DEFAULT_TABLE_COUNT),
            lsh_band_size_hint: env_or("LSH_BAND_SIZE_HINT", 10),
            judge_workers,
        })
    }
}

fn env_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
