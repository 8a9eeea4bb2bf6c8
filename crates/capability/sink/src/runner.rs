//! 消费主循环
//!
//! 拉取 → 解析 → 攒批 → 写入 → 提交位点。批次达到条数上限或存在时间
//! 超过 `batch_max_age` 时落库；写入成功后提交批次最后一条记录的位点。
//! 写入重试耗尽视为致命错误，循环返回 `SinkError`，位点保持不动。

use crate::batch::Batch;
use crate::commit::OffsetCommitter;
use crate::error::SinkError;
use crate::parser;
use crate::writer::{BatchWriter, WritePolicy};
use domain::Backoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uns_config::{HistorianConfig, StartPosition};
use uns_storage::MAX_ROWS_PER_INSERT;
use uns_stream::{StartFrom, StreamConsumer, StreamRecord};
use uns_telemetry::PipelineMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSettings {
    /// 单批最大条数，取值范围 `1..=MAX_ROWS_PER_INSERT`。
    pub batch_size: usize,
    pub batch_max_age: Duration,
    pub poll_timeout: Duration,
    /// 消费错误后的等待策略。
    pub consumer_backoff: Backoff,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_max_age: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(1),
            consumer_backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
        }
    }
}

impl SinkSettings {
    pub fn from_config(config: &HistorianConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_max_age: Duration::from_millis(config.batch_max_age_ms),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            ..Self::default()
        }
        .normalized()
    }

    /// 把批次大小限制在单条 INSERT 可承载的范围内。
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(1, MAX_ROWS_PER_INSERT);
        self
    }
}

pub fn write_policy_from_config(config: &HistorianConfig) -> WritePolicy {
    WritePolicy {
        max_attempts: config.write_max_attempts.max(1),
        backoff: Backoff::new(
            Duration::from_millis(config.write_backoff_base_ms),
            Duration::from_millis(config.write_backoff_max_ms),
        ),
    }
}

/// 没有已提交位点时的消费起点。
pub fn start_from(position: StartPosition) -> StartFrom {
    match position {
        StartPosition::Earliest => StartFrom::Earliest,
        StartPosition::Latest => StartFrom::Latest,
    }
}

/// 等待停止信号；`Ref` 读锁在返回前释放。
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub struct SinkRunner<C> {
    consumer: C,
    writer: BatchWriter,
    committer: OffsetCommitter,
    settings: SinkSettings,
    metrics: Arc<PipelineMetrics>,
    batch: Batch,
    consumer_failures: u32,
}

impl<C: StreamConsumer> SinkRunner<C> {
    pub fn new(
        consumer: C,
        writer: BatchWriter,
        committer: OffsetCommitter,
        settings: SinkSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            consumer,
            writer,
            committer,
            settings: settings.normalized(),
            metrics,
            batch: Batch::new(),
            consumer_failures: 0,
        }
    }

    pub fn committed(&self) -> Option<i64> {
        self.committer.committed()
    }

    /// 运行直到 `shutdown` 置为 `true`；退出前落库剩余批次。
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SinkError> {
        info!(
            target: "uns.sink",
            batch_size = self.settings.batch_size,
            batch_max_age_ms = self.settings.batch_max_age.as_millis() as u64,
            "sink_started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let polled = tokio::select! {
                _ = stopped(&mut shutdown) => break,
                polled = self.consumer.poll(self.settings.poll_timeout) => polled,
            };
            match polled {
                Ok(Some(record)) => {
                    self.consumer_failures = 0;
                    self.accept(record);
                }
                Ok(None) => {}
                Err(err) => {
                    let delay = self.settings.consumer_backoff.delay(self.consumer_failures);
                    self.consumer_failures = self.consumer_failures.saturating_add(1);
                    warn!(
                        target: "uns.sink",
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "consumer_poll_failed"
                    );
                    tokio::select! {
                        _ = stopped(&mut shutdown) => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            if self.batch.is_full(self.settings.batch_size)
                || self.batch.is_expired(self.settings.batch_max_age)
            {
                self.flush().await?;
            }
        }

        self.flush().await?;
        info!(
            target: "uns.sink",
            committed = ?self.committer.committed(),
            "sink_stopped"
        );
        Ok(())
    }

    fn accept(&mut self, record: StreamRecord) {
        self.metrics.record_consumed();
        match parser::parse(&record.payload) {
            Ok(metric) => self.batch.push(record.offset, Some(metric)),
            Err(err) => {
                self.metrics.record_parse_failure();
                warn!(
                    target: "uns.sink",
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %err,
                    "record_dropped"
                );
                self.batch.push(record.offset, None);
            }
        }
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let (metrics, last_offset) = self.batch.take();
        if !metrics.is_empty() {
            self.writer.write(&metrics).await?;
        }
        let Some(offset) = last_offset else {
            return Ok(());
        };
        // 已落库的批次在提交失败后会在重启时重放。
        if let Err(err) = self.committer.commit(offset).await {
            warn!(
                target: "uns.sink",
                offset,
                error = %err,
                "offset_commit_failed"
            );
            return Ok(());
        }
        debug!(target: "uns.sink", rows = metrics.len(), offset, "batch_flushed");
        Ok(())
    }
}
