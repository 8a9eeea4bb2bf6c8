//! 内存消息日志（测试与本地回放）

use crate::{ConsumerError, StartFrom, StreamConsumer, StreamRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

struct LogInner {
    topic: String,
    partition: i32,
    records: Mutex<Vec<(Vec<u8>, DateTime<Utc>)>>,
    appended: Notify,
}

/// 追加写的单分区日志；可以有多个独立的消费者。
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<LogInner>,
}

impl MemoryLog {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            inner: Arc::new(LogInner {
                topic: topic.into(),
                partition,
                records: Mutex::new(Vec::new()),
                appended: Notify::new(),
            }),
        }
    }

    /// 追加一条记录，返回其位点。
    pub fn append(&self, payload: impl Into<Vec<u8>>) -> i64 {
        let offset = {
            let mut records = self.lock();
            records.push((payload.into(), Utc::now()));
            records.len() as i64 - 1
        };
        self.inner.appended.notify_waiters();
        offset
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn consumer(&self, start: StartFrom) -> MemoryLogConsumer {
        let next_offset = match start {
            StartFrom::Earliest => 0,
            StartFrom::Latest => self.len() as i64,
            StartFrom::Offset(offset) => offset.max(0),
        };
        MemoryLogConsumer {
            log: self.clone(),
            next_offset,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Vec<u8>, DateTime<Utc>)>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record_at(&self, offset: i64) -> Option<StreamRecord> {
        let index = usize::try_from(offset).ok()?;
        let records = self.lock();
        let (payload, timestamp) = records.get(index)?;
        Some(StreamRecord {
            topic: self.inner.topic.clone(),
            partition: self.inner.partition,
            offset,
            payload: payload.clone(),
            timestamp: Some(*timestamp),
        })
    }
}

pub struct MemoryLogConsumer {
    log: MemoryLog,
    next_offset: i64,
}

impl MemoryLogConsumer {
    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    fn take_next(&mut self) -> Option<StreamRecord> {
        let record = self.log.record_at(self.next_offset)?;
        self.next_offset += 1;
        Some(record)
    }
}

#[async_trait]
impl StreamConsumer for MemoryLogConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>, ConsumerError> {
        let log = self.log.clone();
        let appended = log.inner.appended.notified();
        tokio::pin!(appended);
        // 先登记唤醒再检查，避免错过检查与等待之间的追加。
        appended.as_mut().enable();
        if let Some(record) = self.take_next() {
            return Ok(Some(record));
        }
        let _ = tokio::time::timeout(timeout, appended).await;
        Ok(self.take_next())
    }
}
