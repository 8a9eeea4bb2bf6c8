//! 批量发布队列
//!
//! 多个生产者（订阅分发、初始读取）并发写入，flush 周期作为唯一消费者整体取走。
//! 两次 flush 之间同一点位只保留最新值：新值到达时移除旧值并追加到队尾，
//! 因此队列长度不会超过订阅点位数。

use domain::PendingRecord;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uns_telemetry::PipelineMetrics;

pub struct BatchingQueue {
    records: Mutex<Vec<PendingRecord>>,
    metrics: Arc<PipelineMetrics>,
}

impl BatchingQueue {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            metrics,
        }
    }

    /// 入队；不阻塞、不失败。
    pub fn enqueue(&self, record: PendingRecord) {
        let mut records = self.lock();
        if let Some(index) = records
            .iter()
            .position(|existing| existing.point_name == record.point_name)
        {
            records.remove(index);
            self.metrics.record_coalesced();
        }
        records.push(record);
        self.metrics.record_enqueued();
    }

    /// 原子地取走全部记录（按入队顺序）。
    pub fn drain(&self) -> Vec<PendingRecord> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
