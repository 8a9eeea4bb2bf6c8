//! 落库链路错误类型

use uns_storage::StorageError;

/// 单条记录解析失败（记录日志后丢弃，不影响后续记录）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("payload is not a JSON object: {0}")]
    InvalidJson(String),
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("missing value")]
    MissingValue,
    #[error("unsupported value: {0}")]
    InvalidValue(String),
}

/// 批量写入失败（重试耗尽，整批致命）。
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("batch write failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// 落库链路终止错误。
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("offset store error: {0}")]
    Offsets(#[from] StorageError),
}
