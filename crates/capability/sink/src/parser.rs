//! 总线报文解析
//!
//! 报文为 JSON 对象：
//!
//! ```json
//! {"timestamp": "2025-01-15T10:30:45.123Z", "metric": "process_fill_volume_actual",
//!  "line": "filling-line-1", "value": 1003.5, "plant": "berlin"}
//! ```
//!
//! 值的类型判定：数字为数值；字符串先尝试按数值解析，失败则保留文本；
//! 布尔值保留为文本；非有限数值保留为文本。缺少时间戳时使用接收时间。

use crate::error::ParseError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use domain::ParsedMetric;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawMetric {
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    line: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    production_order: Option<String>,
    #[serde(default)]
    article: Option<String>,
    #[serde(default)]
    machine_name: Option<String>,
    #[serde(default)]
    plant: Option<String>,
}

pub fn parse(raw: &[u8]) -> Result<ParsedMetric, ParseError> {
    parse_at(raw, Utc::now())
}

/// 同 [`parse`]，缺少时间戳时使用 `received_at`。
pub fn parse_at(raw: &[u8], received_at: DateTime<Utc>) -> Result<ParsedMetric, ParseError> {
    let record: RawMetric =
        serde_json::from_slice(raw).map_err(|err| ParseError::InvalidJson(err.to_string()))?;

    let metric_name = required(record.metric, "metric")?;
    let line = required(record.line, "line")?;
    let timestamp = parse_timestamp(&record.timestamp)?.unwrap_or(received_at);
    let (numeric_value, text_value) = classify_value(record.value)?;

    Ok(ParsedMetric {
        timestamp,
        metric_name,
        line,
        numeric_value,
        text_value,
        production_order: optional(record.production_order),
        article: optional(record.article),
        machine_name: optional(record.machine_name),
        plant: optional(record.plant),
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ParseError> {
    optional(value).ok_or(ParseError::MissingField(field))
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 支持 RFC3339、无时区 ISO8601（按 UTC）与毫秒时间戳。
fn parse_timestamp(value: &Value) -> Result<Option<DateTime<Utc>>, ParseError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(Some(parsed.with_timezone(&Utc)));
            }
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| Some(Utc.from_utc_datetime(&naive)))
                .map_err(|_| ParseError::InvalidTimestamp(text.to_string()))
        }
        Value::Number(number) => number
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(Some)
            .ok_or_else(|| ParseError::InvalidTimestamp(number.to_string())),
        other => Err(ParseError::InvalidTimestamp(other.to_string())),
    }
}

fn classify_value(value: Value) -> Result<(Option<f64>, Option<String>), ParseError> {
    match value {
        Value::Null => Err(ParseError::MissingValue),
        Value::Number(number) => match number.as_f64() {
            Some(v) if v.is_finite() => Ok((Some(v), None)),
            _ => Ok((None, Some(number.to_string()))),
        },
        Value::String(text) => match text.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok((Some(v), None)),
            _ => Ok((None, Some(text))),
        },
        Value::Bool(flag) => Ok((None, Some(flag.to_string()))),
        other => Err(ParseError::InvalidValue(other.to_string())),
    }
}
