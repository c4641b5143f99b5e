use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline::{AppContext, Config, Database, PipelineError, Queue};

/// Boot failures exit the process non-zero under the `Fatal` kind.
fn fatal(err: anyhow::Error) -> anyhow::Error {
    anyhow::Error::new(PipelineError::Fatal(format!("{err:#}")))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(fatal)?;
    let db = Database::connect(&config.database_url).await.map_err(fatal)?;
    db.ensure_schema().await.map_err(fatal)?;
    let queue = Queue::new(&config.redis_url).map_err(fatal)?;
    queue.verify_connectivity().await.map_err(fatal)?;

    let app = Arc::new(AppContext::new(config, db, queue).map_err(fatal)?);

    tracing::info!(
        judge_workers = app.config.judge_workers,
        "starting judging pipeline"
    );
    pipeline::run(app).await
}
