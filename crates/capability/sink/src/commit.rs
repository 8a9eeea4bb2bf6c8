//! 位点提交
//!
//! 位点只在批次写入成功后前移；提交的是批次最后一条记录的位点，
//! 重启后从该位点 + 1 继续消费。

use domain::ConsumerPosition;
use std::sync::Arc;
use tracing::{debug, info};
use uns_storage::{OffsetStore, StorageError};
use uns_stream::StartFrom;
use uns_telemetry::PipelineMetrics;

pub struct OffsetCommitter {
    store: Arc<dyn OffsetStore>,
    group_id: String,
    topic: String,
    partition: i32,
    committed: Option<i64>,
    metrics: Arc<PipelineMetrics>,
}

impl OffsetCommitter {
    pub fn new(
        store: Arc<dyn OffsetStore>,
        group_id: impl Into<String>,
        topic: impl Into<String>,
        partition: i32,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            group_id: group_id.into(),
            topic: topic.into(),
            partition,
            committed: None,
            metrics,
        }
    }

    /// 读取已提交位点，换算出消费起点；没有提交记录时使用 `fallback`。
    pub async fn resume_from(&mut self, fallback: StartFrom) -> Result<StartFrom, StorageError> {
        let position = self
            .store
            .load(&self.group_id, &self.topic, self.partition)
            .await?;
        let start = match position {
            Some(position) => {
                self.committed = Some(position.offset);
                StartFrom::Offset(position.next_offset())
            }
            None => fallback,
        };
        info!(
            target: "uns.sink",
            group_id = %self.group_id,
            topic = %self.topic,
            partition = self.partition,
            committed = ?self.committed,
            start = ?start,
            "consumer_position_loaded"
        );
        Ok(start)
    }

    pub async fn commit(&mut self, offset: i64) -> Result<(), StorageError> {
        let position = ConsumerPosition {
            group_id: self.group_id.clone(),
            topic: self.topic.clone(),
            partition: self.partition,
            offset,
        };
        self.store.commit(&position).await?;
        self.committed = Some(offset);
        self.metrics.record_offset_committed();
        debug!(
            target: "uns.sink",
            topic = %self.topic,
            partition = self.partition,
            offset,
            "offset_committed"
        );
        Ok(())
    }

    pub fn committed(&self) -> Option<i64> {
        self.committed
    }
}
