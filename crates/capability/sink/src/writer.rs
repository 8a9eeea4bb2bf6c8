//! 批量写入（带重试）

use crate::error::WriteError;
use domain::{Backoff, ParsedMetric};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uns_storage::MetricStore;
use uns_telemetry::PipelineMetrics;

/// 写入重试策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    /// 总尝试次数（含首次）。
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
        }
    }
}

pub struct BatchWriter {
    store: Arc<dyn MetricStore>,
    policy: WritePolicy,
    metrics: Arc<PipelineMetrics>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn MetricStore>, policy: WritePolicy, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            store,
            policy,
            metrics,
        }
    }

    /// 以单条语句写入整批；失败按指数退避重试，耗尽后返回 `WriteError::Exhausted`。
    pub async fn write(&self, batch: &[ParsedMetric]) -> Result<u64, WriteError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started_at = Instant::now();
            match self.store.insert_metrics(batch).await {
                Ok(rows) => {
                    let latency_ms = started_at.elapsed().as_millis() as u64;
                    self.metrics.record_batch_written(rows as usize, latency_ms);
                    info!(
                        target: "uns.sink",
                        rows,
                        attempt,
                        latency_ms,
                        "batch_written"
                    );
                    return Ok(rows);
                }
                Err(err) if attempt >= max_attempts => {
                    self.metrics.record_write_failure();
                    error!(
                        target: "uns.sink",
                        rows = batch.len(),
                        attempts = attempt,
                        error = %err,
                        "batch_write_exhausted"
                    );
                    return Err(WriteError::Exhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => {
                    self.metrics.record_write_retry();
                    let delay = self.policy.backoff.delay(attempt - 1);
                    warn!(
                        target: "uns.sink",
                        rows = batch.len(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "batch_write_failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
