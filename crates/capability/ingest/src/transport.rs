//! 数据源传输边界
//!
//! 连接管理器与订阅管理器只通过 [`SourceTransport`] 访问数据源。
//! 传输层的异步回调全部改为通道：健康状态写入 `install_health_handler`
//! 登记的通道，变化通知写入 `create_subscription` 传入的有界通道。

use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::PointValue;
use std::collections::HashMap;
use tokio::sync::mpsc;

pub type SessionId = u64;
pub type SubscriptionId = u64;

/// 单个监控项参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoringParameters {
    pub sampling_interval_ms: u64,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

impl MonitoringParameters {
    /// 只保留每个点位的最新值（队列深度 1，溢出丢弃最旧值）。
    pub fn latest_only(sampling_interval_ms: u64) -> Self {
        Self {
            sampling_interval_ms,
            queue_size: 1,
            discard_oldest: true,
        }
    }
}

/// 监控项。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItem {
    pub wire_id: String,
    pub parameters: MonitoringParameters,
}

/// 订阅请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub publishing_interval_ms: u64,
    pub items: Vec<MonitoredItem>,
}

/// 数据变化通知。
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subscription_id: SubscriptionId,
    pub wire_id: String,
    pub value: PointValue,
    pub source_timestamp: DateTime<Utc>,
}

/// 传输层健康状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Good,
    Bad(String),
}

impl HealthStatus {
    pub fn is_good(&self) -> bool {
        matches!(self, HealthStatus::Good)
    }
}

/// 数据源传输抽象。
#[async_trait]
pub trait SourceTransport: Send + Sync {
    /// 登记被动健康回调；传输层在 keep-alive 状态变化时写入。
    fn install_health_handler(&self, handler: mpsc::UnboundedSender<HealthStatus>);

    async fn open_session(&self) -> Result<SessionId, TransportError>;

    /// 使用传输层自身的会话恢复机制重连，返回恢复后的会话。
    async fn resume_session(&self, session: SessionId) -> Result<SessionId, TransportError>;

    async fn close_session(&self) -> Result<(), TransportError>;

    /// 一次性读取，返回 wire_id → 值。
    async fn read(&self, wire_ids: &[String])
    -> Result<HashMap<String, PointValue>, TransportError>;

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
        notifications: mpsc::Sender<Notification>,
    ) -> Result<SubscriptionId, TransportError>;

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), TransportError>;
}
