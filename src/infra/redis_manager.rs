//! Redis Manager - queue and result operations of the worker
//!
//! - Job queue operations (BLPOP)
//! - Result storage and publishing

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{info, warn};

use crate::jobs::{JobResult, WorkerJob};

/// Redis key constants
pub mod keys {
    /// Run job queue key
    pub const JOB_QUEUE: &str = "exercise:queue";

    /// Result key prefix (for polling)
    pub const RESULT_PREFIX: &str = "exercise:result:";

    /// Result channel (for pub/sub)
    pub const RESULT_CHANNEL: &str = "exercise:results";
}

const RESULT_EXPIRY_SECS: u64 = 3600; // 1 hour

pub struct RedisManager {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisManager {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = get_connection_with_retry(&client).await?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self { client, conn })
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Block until the next parseable job arrives, reconnecting on failure
    pub async fn pop_job(&mut self) -> Result<WorkerJob> {
        loop {
            let result: Option<(String, String)> =
                match self.conn.blpop(keys::JOB_QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                        self.reconnect().await?;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match serde_json::from_str::<WorkerJob>(&job_data) {
                    Ok(job) => return Ok(job),
                    Err(e) => {
                        warn!("Failed to parse job data: {}. Data: {}", e, job_data);
                        continue;
                    }
                }
            }
        }
    }

    /// Store a run result with a 1-hour expiration and publish it
    pub async fn store_job_result(&mut self, result: &JobResult) -> Result<()> {
        self.store_result(
            &format!("{}{}", keys::RESULT_PREFIX, result.job_id),
            keys::RESULT_CHANNEL,
            result,
        )
        .await
    }

    async fn store_result<T: Serialize>(&mut self, key: &str, channel: &str, result: &T) -> Result<()> {
        let json = serde_json::to_string(result)?;

        if let Err(e) = self
            .conn
            .set_ex::<_, _, ()>(key, &json, RESULT_EXPIRY_SECS)
            .await
        {
            warn!("Failed to store result: {}. Reconnecting...", e);
            self.reconnect().await?;
            self.conn
                .set_ex::<_, _, ()>(key, &json, RESULT_EXPIRY_SECS)
                .await?;
        }

        // No subscribers is not an error
        let _ = self.conn.publish::<_, _, ()>(channel, &json).await;

        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.conn = get_connection_with_retry(&self.client).await?;
        Ok(())
    }
}

async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!("Failed to connect to Redis: {}. Retrying in 3 seconds...", e);
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
