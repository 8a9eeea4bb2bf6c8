//! 消息流消费
//!
//! `poll` 每次返回零或一条记录，不自动提交位点；位点由落库链路在写入成功后提交。

mod kafka;
mod memory;

pub use kafka::{KafkaConsumerConfig, KafkaPartitionConsumer};
pub use memory::{MemoryLog, MemoryLogConsumer};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// 消费错误（可重试）。
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("stream closed")]
    Closed,
}

/// 一条消息记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// 没有已提交位点时的起始位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    Earliest,
    Latest,
    /// 从指定位点开始（含）。
    Offset(i64),
}

/// 消息流消费者。
#[async_trait]
pub trait StreamConsumer: Send {
    /// 等待至多 `timeout`，返回下一条记录；超时返回 `Ok(None)`。
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>, ConsumerError>;
}
