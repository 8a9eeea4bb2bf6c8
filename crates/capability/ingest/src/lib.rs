//! 链路 A：数据源 → 订阅 → 批量队列 → topic 映射 → 总线发布
//!
//! 所有可变状态由 [`IngestContext`] 持有并在构造时注入，不使用进程级全局状态。

pub mod connection;
pub mod error;
pub mod flush;
pub mod publish;
pub mod queue;
pub mod service;
pub mod subscription;
pub mod topic;
pub mod transport;

pub use connection::{Connected, ConnectionManager, LinkStatus};
pub use error::{ConnectionError, IngestError, PublishError, SubscriptionError, TransportError};
pub use flush::{FlushCycle, FlushReport};
pub use publish::{MqttPublisher, MqttPublisherConfig, Publisher, encode_payload};
pub use queue::BatchingQueue;
pub use service::{IngestContext, IngestSettings};
pub use subscription::{SubscriptionHandle, SubscriptionManager};
pub use topic::{TopicMapper, normalize_name};
pub use transport::{
    HealthStatus, MonitoredItem, MonitoringParameters, Notification, SessionId, SourceTransport,
    SubscriptionId, SubscriptionRequest,
};
