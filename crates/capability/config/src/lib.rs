//! 运行配置加载。
//!
//! 两个进程各自读取一组 `UNS_*` 环境变量，未设置时使用文档化的默认值：
//! - [`EdgeConfig`]：采集桥接（数据源 → 消息总线）
//! - [`HistorianConfig`]：落库（消息流 → 时序库）

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// UNS topic 层级（`{version}/{enterprise}/{site}/{area}/{line}/...`）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub version: String,
    pub enterprise: String,
    pub site: String,
    pub area: String,
    pub line: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            enterprise: "enterprise".to_string(),
            site: "site".to_string(),
            area: "area".to_string(),
            line: "filling-line-1".to_string(),
        }
    }
}

/// 随报文附带的上下文字段。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentConfig {
    pub plant: Option<String>,
    pub machine_name: Option<String>,
    pub production_order: Option<String>,
    pub article: Option<String>,
}

/// 采集桥接配置。
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub modbus_host: String,
    pub modbus_port: u16,
    pub modbus_unit_id: u8,
    pub sampling_interval_ms: u64,
    pub flush_interval_ms: u64,
    pub notification_channel_capacity: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_qos: u8,
    /// 单条发布与断开连接的等待上限。
    pub mqtt_publish_timeout_ms: u64,
    pub topic: TopicConfig,
    pub enrichment: EnrichmentConfig,
}

impl EdgeConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = TopicConfig::default();
        let topic = TopicConfig {
            version: read_string_with_default("UNS_TOPIC_VERSION", &defaults.version),
            enterprise: read_string_with_default("UNS_ENTERPRISE", &defaults.enterprise),
            site: read_string_with_default("UNS_SITE", &defaults.site),
            area: read_string_with_default("UNS_AREA", &defaults.area),
            line: read_string_with_default("UNS_LINE", &defaults.line),
        };

        Ok(Self {
            modbus_host: read_string_with_default("UNS_MODBUS_HOST", "127.0.0.1"),
            modbus_port: read_u16_with_default("UNS_MODBUS_PORT", 502)?,
            modbus_unit_id: read_u8_with_default("UNS_MODBUS_UNIT_ID", 1)?,
            sampling_interval_ms: read_positive_u64("UNS_SAMPLING_INTERVAL_MS", 1000)?,
            flush_interval_ms: read_positive_u64("UNS_FLUSH_INTERVAL_MS", 1000)?,
            notification_channel_capacity: read_positive_u64(
                "UNS_NOTIFICATION_CHANNEL_CAPACITY",
                1024,
            )? as usize,
            reconnect_base_ms: read_positive_u64("UNS_RECONNECT_BASE_MS", 5000)?,
            reconnect_max_ms: read_positive_u64("UNS_RECONNECT_MAX_MS", 60_000)?,
            mqtt_host: read_string_with_default("UNS_MQTT_HOST", "127.0.0.1"),
            mqtt_port: read_u16_with_default("UNS_MQTT_PORT", 1883)?,
            mqtt_username: read_optional("UNS_MQTT_USERNAME"),
            mqtt_password: read_optional("UNS_MQTT_PASSWORD"),
            mqtt_qos: read_u8_with_default("UNS_MQTT_QOS", 1)?,
            mqtt_publish_timeout_ms: read_positive_u64("UNS_MQTT_PUBLISH_TIMEOUT_MS", 5000)?,
            topic,
            enrichment: read_enrichment(),
        })
    }
}

/// 无已提交位点时的起始位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Earliest,
    Latest,
}

/// 落库配置。
#[derive(Debug, Clone)]
pub struct HistorianConfig {
    pub database_url: String,
    pub kafka_brokers: Vec<String>,
    pub kafka_topic: String,
    pub kafka_partition: i32,
    pub consumer_group: String,
    pub start_position: StartPosition,
    pub poll_timeout_ms: u64,
    pub batch_size: usize,
    pub batch_max_age_ms: u64,
    pub write_max_attempts: u32,
    pub write_backoff_base_ms: u64,
    pub write_backoff_max_ms: u64,
}

impl HistorianConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("UNS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("UNS_DATABASE_URL".to_string()))?;
        let kafka_brokers = read_string_with_default("UNS_KAFKA_BROKERS", "127.0.0.1:9092")
            .split(',')
            .map(|broker| broker.trim().to_string())
            .filter(|broker| !broker.is_empty())
            .collect::<Vec<_>>();
        if kafka_brokers.is_empty() {
            return Err(ConfigError::Invalid(
                "UNS_KAFKA_BROKERS".to_string(),
                "empty broker list".to_string(),
            ));
        }
        let start_position = match read_string_with_default("UNS_CONSUMER_START", "earliest")
            .to_ascii_lowercase()
            .as_str()
        {
            "earliest" => StartPosition::Earliest,
            "latest" => StartPosition::Latest,
            other => {
                return Err(ConfigError::Invalid(
                    "UNS_CONSUMER_START".to_string(),
                    other.to_string(),
                ));
            }
        };
        let write_max_attempts = read_positive_u64("UNS_WRITE_MAX_ATTEMPTS", 3)?;

        Ok(Self {
            database_url,
            kafka_brokers,
            kafka_topic: read_string_with_default("UNS_KAFKA_TOPIC", "uns.metrics"),
            kafka_partition: read_i32_with_default("UNS_KAFKA_PARTITION", 0)?,
            consumer_group: read_string_with_default("UNS_CONSUMER_GROUP", "uns-historian"),
            start_position,
            poll_timeout_ms: read_positive_u64("UNS_POLL_TIMEOUT_MS", 1000)?,
            batch_size: read_positive_u64("UNS_BATCH_SIZE", 100)? as usize,
            batch_max_age_ms: read_positive_u64("UNS_BATCH_MAX_AGE_MS", 5000)?,
            write_max_attempts: u32::try_from(write_max_attempts).map_err(|_| {
                ConfigError::Invalid(
                    "UNS_WRITE_MAX_ATTEMPTS".to_string(),
                    write_max_attempts.to_string(),
                )
            })?,
            write_backoff_base_ms: read_positive_u64("UNS_WRITE_BACKOFF_BASE_MS", 1000)?,
            write_backoff_max_ms: read_positive_u64("UNS_WRITE_BACKOFF_MAX_MS", 60_000)?,
        })
    }
}

fn read_enrichment() -> EnrichmentConfig {
    EnrichmentConfig {
        plant: read_optional("UNS_PLANT"),
        machine_name: read_optional("UNS_MACHINE_NAME"),
        production_order: read_optional("UNS_PRODUCTION_ORDER"),
        article: read_optional("UNS_ARTICLE"),
    }
}

fn read_string_with_default(key: &str, default: &str) -> String {
    read_optional(key).unwrap_or_else(|| default.to_string())
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_i32_with_default(key: &str, default: i32) -> Result<i32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<i32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 读取必须大于 0 的 u64（间隔、容量、批量大小等）。
fn read_positive_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
