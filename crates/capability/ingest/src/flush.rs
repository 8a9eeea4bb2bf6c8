//! 定时 flush：取空队列 → 映射 topic → 逐条发布
//!
//! 发布失败只记录日志并丢弃该条记录，不中断本轮剩余记录；
//! 总线确认之后的可靠性由总线自身保证。

use crate::error::PublishError;
use crate::publish::{Publisher, encode_payload};
use crate::queue::BatchingQueue;
use crate::connection::stopped;
use crate::topic::TopicMapper;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uns_config::EnrichmentConfig;
use uns_telemetry::PipelineMetrics;

/// 单轮 flush 结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub drained: usize,
    pub published: usize,
    pub failed: usize,
}

pub struct FlushCycle {
    queue: Arc<BatchingQueue>,
    mapper: TopicMapper,
    publisher: Arc<dyn Publisher>,
    line: String,
    enrichment: EnrichmentConfig,
    metrics: Arc<PipelineMetrics>,
    publish_timeout: Duration,
}

impl FlushCycle {
    pub fn new(
        queue: Arc<BatchingQueue>,
        mapper: TopicMapper,
        publisher: Arc<dyn Publisher>,
        line: impl Into<String>,
        enrichment: EnrichmentConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            queue,
            mapper,
            publisher,
            line: line.into(),
            enrichment,
            metrics,
            publish_timeout: Duration::from_secs(5),
        }
    }

    /// 单条发布的等待上限；超时按发布失败处理。
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// 执行一轮 flush；队列为空时不做任何事。
    pub async fn flush_once(&self) -> FlushReport {
        let records = self.queue.drain();
        if records.is_empty() {
            return FlushReport::default();
        }
        self.metrics.record_flush_cycle();

        let mut report = FlushReport {
            drained: records.len(),
            ..FlushReport::default()
        };
        for record in &records {
            let metric = self.mapper.mapped_name(&record.point_name);
            let topic = self.mapper.map(&record.point_name);
            let result = match encode_payload(record, &metric, &self.line, &self.enrichment) {
                Ok(payload) => {
                    tokio::time::timeout(self.publish_timeout, self.publisher.publish(&topic, payload))
                        .await
                        .unwrap_or(Err(PublishError::Timeout(self.publish_timeout)))
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => {
                    report.published += 1;
                    self.metrics.record_publish_success();
                }
                Err(err) => {
                    report.failed += 1;
                    self.metrics.record_publish_failure();
                    warn!(
                        target: "uns.ingest",
                        point = %record.point_name,
                        topic = %topic,
                        error = %err,
                        "publish_failed_record_dropped"
                    );
                }
            }
        }

        if report.failed > 0 {
            info!(
                target: "uns.ingest",
                drained = report.drained,
                published = report.published,
                failed = report.failed,
                "flush_completed"
            );
        } else {
            debug!(target: "uns.ingest", drained = report.drained, "flush_completed");
        }
        report
    }

    /// 按固定间隔 flush；收到停止信号后再 flush 一次然后退出。
    pub fn spawn(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cycle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cycle.flush_once().await;
                    }
                    _ = stopped(&mut shutdown) => break,
                }
            }
            let report = cycle.flush_once().await;
            info!(
                target: "uns.ingest",
                drained = report.drained,
                published = report.published,
                failed = report.failed,
                "final_flush_completed"
            );
        })
    }
}
