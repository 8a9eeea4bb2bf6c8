//! 协议错误类型定义

use uns_ingest::TransportError;

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误（连接已不可用）
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 异常响应
    #[error("modbus exception: {0}")]
    Exception(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 尚未建立连接
    #[error("not connected")]
    NotConnected,
}

impl ProtocolError {
    /// 是否意味着底层连接已失效。
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::Connection(_) | ProtocolError::Io(_) | ProtocolError::Timeout(_)
        )
    }
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::NotConnected => TransportError::NoSession,
            ProtocolError::Connection(_) => TransportError::Connection(err.to_string()),
            other => TransportError::Read(other.to_string()),
        }
    }
}
