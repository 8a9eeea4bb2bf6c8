//! 时序写入内存实现
//!
//! 用于本地测试：记录每次写入的行和语句数，可注入失败。

use crate::error::StorageError;
use crate::traits::MetricStore;
use domain::ParsedMetric;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// 时序写入内存存储
#[derive(Default)]
pub struct InMemoryMetricStore {
    rows: RwLock<Vec<ParsedMetric>>,
    statements: AtomicUsize,
    attempts: AtomicUsize,
    failures_left: AtomicU32,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来的 `count` 次写入失败。
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// 已写入的全部行（按写入顺序）。
    pub fn rows(&self) -> Vec<ParsedMetric> {
        self.rows.read().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 成功执行的 INSERT 语句数。
    pub fn statements(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    /// 写入调用次数（含失败）。
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn insert_metrics(&self, metrics: &[ParsedMetric]) -> Result<u64, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::new("connection reset by peer"));
        }
        if metrics.is_empty() {
            return Ok(0);
        }
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StorageError::new("metric store lock poisoned"))?;
        rows.extend_from_slice(metrics);
        self.statements.fetch_add(1, Ordering::SeqCst);
        Ok(metrics.len() as u64)
    }
}
