//! Redis-backed queue adapter.
//!
//! Non-blocking commands go through one auto-reconnecting
//! [`ConnectionManager`]. Blocking claims run on dedicated multiplexed
//! connections checked out from a small free list: a `BRPOPLPUSH` parks its
//! connection server-side, and sharing the manager would stall every other
//! worker's commands behind it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::RedisError;
use tokio::sync::Mutex;
use tracing::{debug, info};

use pulse_core::{Error, JobQueue, Result};

/// Queue adapter over Redis lists.
#[derive(Clone)]
pub struct RedisQueue {
    inner: Arc<RedisQueueInner>,
}

struct RedisQueueInner {
    client: redis::Client,
    commands: ConnectionManager,
    /// Idle connections reserved for blocking claims.
    blocking: Mutex<Vec<MultiplexedConnection>>,
}

fn queue_err(op: &'static str) -> impl Fn(RedisError) -> Error {
    move |e| Error::Queue(format!("{op} failed: {e}"))
}

impl RedisQueue {
    /// Connect to Redis at `url` and verify the connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let start = Instant::now();
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("Invalid Redis URL: {e}")))?;
        let commands = ConnectionManager::new(client.clone())
            .await
            .map_err(queue_err("connect"))?;

        let queue = Self {
            inner: Arc::new(RedisQueueInner {
                client,
                commands,
                blocking: Mutex::new(Vec::new()),
            }),
        };
        queue.ping().await?;

        info!(
            subsystem = "queue",
            component = "redis",
            op = "connect",
            duration_ms = start.elapsed().as_millis() as u64,
            "Connected to Redis"
        );
        Ok(queue)
    }

    async fn checkout(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.inner.blocking.lock().await.pop() {
            return Ok(conn);
        }
        debug!(subsystem = "queue", op = "checkout", "Opening blocking connection");
        self.inner
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(queue_err("connect"))
    }

    async fn checkin(&self, conn: MultiplexedConnection) {
        self.inner.blocking.lock().await.push(conn);
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn claim(
        &self,
        source: &str,
        destination: &str,
        wait: Duration,
    ) -> Result<Option<String>> {
        let mut conn = self.checkout().await?;
        // A zero timeout blocks forever in Redis.
        let wait_secs = wait.as_secs().max(1);

        // If this future is dropped mid-wait the connection goes with it and
        // is not returned to the free list. An entry moved just before the
        // drop stays in processing until the recovery sweep picks it up.
        let claimed: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(source)
            .arg(destination)
            .arg(wait_secs)
            .query_async(&mut conn)
            .await
            .map_err(queue_err("BRPOPLPUSH"))?;

        self.checkin(conn).await;
        Ok(claimed)
    }

    async fn remove(&self, list: &str, entry: &str) -> Result<bool> {
        let mut conn = self.inner.commands.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(list)
            .arg(1)
            .arg(entry)
            .query_async(&mut conn)
            .await
            .map_err(queue_err("LREM"))?;
        Ok(removed > 0)
    }

    async fn push_head(&self, list: &str, entry: &str) -> Result<()> {
        let mut conn = self.inner.commands.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(list)
            .arg(entry)
            .query_async(&mut conn)
            .await
            .map_err(queue_err("LPUSH"))?;
        Ok(())
    }

    async fn range_all(&self, list: &str) -> Result<Vec<String>> {
        let mut conn = self.inner.commands.clone();
        redis::cmd("LRANGE")
            .arg(list)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(queue_err("LRANGE"))
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value.as_str());
        }
        let mut conn = self.inner.commands.clone();
        let _: i64 = cmd
            .query_async(&mut conn)
            .await
            .map_err(queue_err("HSET"))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.inner.commands.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(queue_err("PING"))?;
        Ok(())
    }
}
