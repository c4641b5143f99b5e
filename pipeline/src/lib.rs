pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod intake;
pub mod judge_worker;
pub mod plagiarism_worker;
pub mod queue;

pub use config::Config;
pub use context::AppContext;
pub use database::Database;
pub use error::PipelineError;
pub use intake::submit;
pub use queue::Queue;

use std::sync::Arc;
use std::time::Duration;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Spawn the judge pool, the plagiarism worker, and the cache sweeper, then
/// supervise them. Worker loops only return on panic or abort.
pub async fn run(app: Arc<AppContext>) -> anyhow::Result<()> {
    let mut tasks = tokio::task::JoinSet::new();

    for worker_id in 0..app.config.judge_workers {
        let app = app.clone();
        tasks.spawn(async move { judge_worker::run(app, worker_id).await });
    }
    {
        let app = app.clone();
        tasks.spawn(async move { plagiarism_worker::run(app).await });
    }
    {
        let app = app.clone();
        tasks.spawn(async move { sweep_fingerprint_cache(app).await });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            tracing::error!("worker task aborted: {err}");
        }
    }
    Ok(())
}

async fn sweep_fingerprint_cache(app: Arc<AppContext>) {
    let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let removed = app.fingerprints.sweep_expired();
        if removed > 0 {
            tracing::debug!(removed, "expired fingerprint cache entries swept");
        }
    }
}
