use anyhow::{Context, Result};
use redis::AsyncCommands;

pub const JUDGE_QUEUE: &str = "judge_queue";
pub const PLAGIARISM_QUEUE: &str = "plagiarism_queue";

/// Thin wrapper over the queue broker. Payloads are bare decimal submission
/// ids; delivery is at-least-once and consumers tolerate duplicates.
#[derive(Clone)]
pub struct Queue {
    client: redis::Client,
}

impl Queue {
    /// An unparseable broker URL is a boot failure.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("parsing queue broker URL")?;
        Ok(Queue { client })
    }

    pub async fn verify_connectivity(&self) -> Result<()> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .context("connecting to queue broker")?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .context("pinging queue broker")?;
        Ok(())
    }

    /// One atomic round trip placing the id on both work queues. Either
    /// both consumers will see the submission or neither does.
    pub async fn enqueue_submission(&self, submission_id: i64) -> Result<()> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .context("connecting to queue broker")?;
        let payload = submission_id.to_string();
        redis::pipe()
            .atomic()
            .lpush(JUDGE_QUEUE, &payload)
            .ignore()
            .lpush(PLAGIARISM_QUEUE, &payload)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .context("enqueueing submission")?;
        Ok(())
    }

    /// Put an id back for redelivery after a transient worker failure.
    pub async fn requeue(&self, queue: &str, submission_id: i64) -> Result<()> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .context("connecting to queue broker")?;
        let _: () = conn
            .lpush(queue, submission_id.to_string())
            .await
            .context("requeueing submission")?;
        Ok(())
    }

    /// Blocking pops park the whole connection, so each consumer owns one.
    pub async fn consumer(&self) -> Result<QueueConsumer> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .context("connecting queue consumer")?;
        Ok(QueueConsumer { conn })
    }
}

pub struct QueueConsumer {
    conn: redis::aio::Connection,
}

impl QueueConsumer {
    /// Waits indefinitely for the next id on `queue`.
    pub async fn pop(&mut self, queue: &str) -> Result<i64> {
        let (_, payload): (String, String) = self
            .conn
            .brpop(queue, 0.0)
            .await
            .context("blocking pop from queue")?;
        parse_submission_id(&payload)
    }
}

pub fn parse_submission_id(payload: &str) -> Result<i64> {
    payload
        .trim()
        .parse::<i64>()
        .with_context(|| format!("malformed queue payload: {payload:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_are_decimal_ids() {
        assert_eq!(parse_submission_id("42").unwrap(), 42);
        assert_eq!(parse_submission_id(" 17\n").unwrap(), 17);
    }

    #[test]
    fn garbage_payloads_are_rejected() {
        assert!(parse_submission_id("").is_err());
        assert!(parse_submission_id("abc").is_err());
        assert!(parse_submission_id("12.5").is_err());
    }

    #[test]
    fn broker_url_must_parse() {
        assert!(Queue::new("redis://localhost:6379").is_ok());
        assert!(Queue::new("rediss://secure-host:6380").is_ok());
        assert!(Queue::new("not a url").is_err());
    }
}
