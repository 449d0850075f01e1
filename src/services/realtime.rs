//! Live job output, kept in Redis while a job runs

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::job::realtime_key,
    repository::jobs::JobsRepository,
    runner::OutputSink,
};

/// Realtime entries outlive a crashed job by at most a day
const REALTIME_TTL_SECONDS: u64 = 24 * 3600;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Redis backed store for output of running jobs. Without a Redis URL every
/// call is a no-op and output goes straight to the job row.
#[derive(Clone)]
pub struct RealtimeService {
    client: Option<Client>,
}

impl RealtimeService {
    /// Connect to Redis when a URL is configured
    pub async fn new(url: Option<&str>) -> AppResult<Self> {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return Ok(Self::disabled());
        };

        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;

        // Test connection
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis connection test failed: {}", e)))?;

        Ok(Self { client: Some(client) })
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    async fn connection(&self, client: &Client) -> AppResult<redis::aio::MultiplexedConnection> {
        client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get Redis connection: {}", e)))
    }

    pub async fn store(&self, job_id: i32, output: &RealtimeOutput) -> AppResult<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        let mut conn = self.connection(client).await?;
        let payload = serde_json::to_string(output)
            .map_err(|e| AppError::Internal(format!("Failed to encode realtime output: {}", e)))?;
        conn.set_ex::<_, _, ()>(realtime_key(job_id), payload, REALTIME_TTL_SECONDS)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store realtime output in Redis: {}", e)))?;
        Ok(())
    }

    pub async fn fetch(&self, job_id: i32) -> AppResult<Option<RealtimeOutput>> {
        let Some(client) = &self.client else {
            return Ok(None);
        };
        let mut conn = self.connection(client).await?;
        let payload: Option<String> = conn
            .get(realtime_key(job_id))
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read realtime output from Redis: {}", e)))?;
        Ok(payload.and_then(|p| serde_json::from_str(&p).ok()))
    }

    pub async fn clear(&self, job_id: i32) -> AppResult<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        let mut conn = self.connection(client).await?;
        let _: () = conn
            .del(realtime_key(job_id))
            .await
            .map_err(|e| AppError::Internal(format!("Failed to delete realtime output from Redis: {}", e)))?;
        Ok(())
    }
}

/// Forwards snapshots of a running job to Redis, or to the job row when
/// Redis is not configured
pub struct JobOutputSink {
    pub job_id: i32,
    pub realtime: RealtimeService,
    pub jobs: JobsRepository,
}

#[async_trait]
impl OutputSink for JobOutputSink {
    async fn snapshot(&self, stdout: &str, stderr: &str) {
        let result = if self.realtime.is_enabled() {
            let output = RealtimeOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            };
            self.realtime.store(self.job_id, &output).await
        } else {
            self.jobs.set_output(self.job_id, stdout, stderr).await
        };
        if let Err(e) = result {
            tracing::warn!("Failed to record live output of job {}: {}", self.job_id, e);
        }
    }
}

/// Output to show for a job: live output while it runs, else the stored one
pub fn pick_output(stored: Option<&str>, live: Option<&str>, terminal: bool) -> Option<String> {
    if !terminal {
        if let Some(live) = live.filter(|l| !l.is_empty()) {
            return Some(live.to_string());
        }
    }
    stored.map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_service_is_noop() {
        let service = RealtimeService::new(None).await.unwrap();
        assert!(!service.is_enabled());
        service.store(3, &RealtimeOutput::default()).await.unwrap();
        assert_eq!(service.fetch(3).await.unwrap(), None);
        service.clear(3).await.unwrap();
    }

    #[test]
    fn test_pick_output() {
        assert_eq!(pick_output(Some("old"), Some("live"), false).as_deref(), Some("live"));
        assert_eq!(pick_output(Some("old"), Some("live"), true).as_deref(), Some("old"));
        assert_eq!(pick_output(Some("old"), Some(""), false).as_deref(), Some("old"));
        assert_eq!(pick_output(None, None, false), None);
    }
}
