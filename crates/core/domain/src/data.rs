use chrono::{DateTime, Utc};

/// 点位值类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Numeric,
    Text,
}

/// 点位值。
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Numeric(f64),
    Text(String),
}

impl PointValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PointValue::Numeric(_) => ValueKind::Numeric,
            PointValue::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Numeric(v) => Some(*v),
            PointValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PointValue::Numeric(_) => None,
            PointValue::Text(v) => Some(v.as_str()),
        }
    }
}

impl std::fmt::Display for PointValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointValue::Numeric(v) => write!(f, "{}", v),
            PointValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// 点位标识：命名空间 + 符号名。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointId {
    pub namespace: u16,
    pub name: String,
}

impl PointId {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// 传输层使用的字符串标识（`ns=2;s=Process.Temperature`）。
    pub fn wire_id(&self) -> String {
        format!("ns={};s={}", self.namespace, self.name)
    }
}

/// 数据点最新状态（由订阅管理器持有）。
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub id: PointId,
    pub value: PointValue,
    pub kind: ValueKind,
    pub changed_at: DateTime<Utc>,
}

/// 待发布记录：入队后不可变，由一次 flush 消费。
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub point_name: String,
    pub value: PointValue,
    pub timestamp: DateTime<Utc>,
}

/// 数据源连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// 解析后的指标记录，numeric_value 与 text_value 恰有一个为 Some。
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMetric {
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub line: String,
    pub numeric_value: Option<f64>,
    pub text_value: Option<String>,
    pub production_order: Option<String>,
    pub article: Option<String>,
    pub machine_name: Option<String>,
    pub plant: Option<String>,
}

/// 消费位点：`offset` 为最后一条已安全落库记录的位点。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerPosition {
    pub group_id: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl ConsumerPosition {
    /// 重启后应开始读取的位点。
    pub fn next_offset(&self) -> i64 {
        self.offset.saturating_add(1)
    }
}
