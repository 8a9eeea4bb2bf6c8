//! 基于 rskafka 的单分区消费者
//!
//! rskafka 不提供消费组，位点由调用方持久化；这里只负责从给定位点顺序拉取。

use crate::{ConsumerError, StartFrom, StreamConsumer, StreamRecord};
use async_trait::async_trait;
use rskafka::client::ClientBuilder;
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

/// Kafka 消费配置。
#[derive(Debug, Clone)]
pub struct KafkaConsumerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub partition: i32,
    pub start: StartFrom,
    /// 单次拉取的最大字节数。
    pub fetch_max_bytes: i32,
}

impl KafkaConsumerConfig {
    pub fn new(brokers: Vec<String>, topic: impl Into<String>, partition: i32) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            partition,
            start: StartFrom::Earliest,
            fetch_max_bytes: 1024 * 1024,
        }
    }
}

pub struct KafkaPartitionConsumer {
    client: PartitionClient,
    topic: String,
    partition: i32,
    start: StartFrom,
    next_offset: Option<i64>,
    fetch_max_bytes: i32,
    buffer: VecDeque<StreamRecord>,
}

impl KafkaPartitionConsumer {
    pub async fn connect(config: KafkaConsumerConfig) -> Result<Self, ConsumerError> {
        let client = ClientBuilder::new(config.brokers.clone())
            .build()
            .await
            .map_err(|e| ConsumerError::Connection(e.to_string()))?;
        let partition_client = client
            .partition_client(
                config.topic.clone(),
                config.partition,
                UnknownTopicHandling::Retry,
            )
            .await
            .map_err(|e| {
                ConsumerError::Connection(format!("failed to get partition client: {}", e))
            })?;
        info!(
            target: "uns.stream",
            brokers = ?config.brokers,
            topic = %config.topic,
            partition = config.partition,
            start = ?config.start,
            "kafka_consumer_connected"
        );
        let next_offset = match config.start {
            StartFrom::Offset(offset) => Some(offset),
            StartFrom::Earliest | StartFrom::Latest => None,
        };
        Ok(Self {
            client: partition_client,
            topic: config.topic,
            partition: config.partition,
            start: config.start,
            next_offset,
            fetch_max_bytes: config.fetch_max_bytes.max(1),
            buffer: VecDeque::new(),
        })
    }

    async fn resolve_offset(&mut self) -> Result<i64, ConsumerError> {
        if let Some(offset) = self.next_offset {
            return Ok(offset);
        }
        let at = match self.start {
            StartFrom::Latest => OffsetAt::Latest,
            _ => OffsetAt::Earliest,
        };
        let offset = self
            .client
            .get_offset(at)
            .await
            .map_err(|e| ConsumerError::Fetch(format!("failed to get offset: {}", e)))?;
        info!(
            target: "uns.stream",
            topic = %self.topic,
            partition = self.partition,
            offset,
            "kafka_start_offset_resolved"
        );
        self.next_offset = Some(offset);
        Ok(offset)
    }
}

#[async_trait]
impl StreamConsumer for KafkaPartitionConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>, ConsumerError> {
        if let Some(record) = self.buffer.pop_front() {
            return Ok(Some(record));
        }

        let offset = self.resolve_offset().await?;
        let max_wait_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let (records, high_watermark) = self
            .client
            .fetch_records(offset, 1..self.fetch_max_bytes, max_wait_ms)
            .await
            .map_err(|e| ConsumerError::Fetch(e.to_string()))?;
        debug!(
            target: "uns.stream",
            offset,
            fetched = records.len(),
            high_watermark,
            "kafka_fetch"
        );

        for record_and_offset in records {
            // 压缩批次可能带回请求位点之前的记录。
            if record_and_offset.offset < offset {
                continue;
            }
            self.next_offset = Some(record_and_offset.offset + 1);
            let record = record_and_offset.record;
            self.buffer.push_back(StreamRecord {
                topic: self.topic.clone(),
                partition: self.partition,
                offset: record_and_offset.offset,
                payload: record.value.unwrap_or_default(),
                timestamp: Some(record.timestamp),
            });
        }
        Ok(self.buffer.pop_front())
    }
}
