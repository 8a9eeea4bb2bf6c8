//! 采集链路错误类型

/// 数据源传输层错误。
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("session not open")]
    NoSession,
    #[error("read error: {0}")]
    Read(String),
    #[error("subscription error: {0}")]
    Subscription(String),
}

/// 连接错误（可重试，不在本层致命）。
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    Transport(#[from] TransportError),
    #[error("connect cancelled by shutdown")]
    Cancelled,
}

/// 订阅错误（非致命，下一次健康信号时重试）。
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("source not connected")]
    NotConnected,
    #[error("unknown data point: {0}")]
    UnknownPoint(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// 发布错误（单条记录，记录日志后丢弃）。
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("payload error: {0}")]
    Payload(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("publish timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// 采集链路启动错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}
