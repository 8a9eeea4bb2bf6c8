//! 存储接口定义

use crate::error::StorageError;
use async_trait::async_trait;
use domain::{ConsumerPosition, ParsedMetric};

/// 时序指标写入。
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// 以单条多行 INSERT 写入整批指标，返回写入行数。
    ///
    /// 要么整批成功，要么整批失败；空批次直接返回 0。
    async fn insert_metrics(&self, metrics: &[ParsedMetric]) -> Result<u64, StorageError>;
}

/// 消费位点持久化。
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// 读取已提交位点（最后一条已落库记录的位点）。
    async fn load(
        &self,
        group_id: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<ConsumerPosition>, StorageError>;

    async fn commit(&self, position: &ConsumerPosition) -> Result<(), StorageError>;
}
