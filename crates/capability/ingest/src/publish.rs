//! 总线发布客户端

use crate::error::PublishError;
use async_trait::async_trait;
use chrono::SecondsFormat;
use domain::{PendingRecord, PointValue};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uns_config::EnrichmentConfig;

/// 发布器抽象。
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;

    /// 释放底层连接。
    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// MQTT 发布器配置。
#[derive(Debug, Clone)]
pub struct MqttPublisherConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
    /// 单条发布与断开连接的等待上限。
    pub publish_timeout: Duration,
}

/// MQTT 发布器实现。
///
/// `AsyncClient::publish` 只是把请求放进本地通道；broker 不可达时事件循环
/// 不再消费该通道。因此未连上 broker 时直接拒绝发布，其余等待都有上限。
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    publish_timeout: Duration,
    connected: Arc<AtomicBool>,
    eventloop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    pub fn connect(config: MqttPublisherConfig) -> Self {
        let client_id = format!("uns-edge-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let link = connected.clone();
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if !link.swap(true, Ordering::SeqCst) {
                            info!(target: "uns.publish", "mqtt_connected");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if link.swap(false, Ordering::SeqCst) {
                            warn!(target: "uns.publish", "mqtt_disconnected");
                        }
                        warn!(target: "uns.publish", "mqtt eventloop error: {}", err);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        info!(
            target: "uns.publish",
            host = %config.host,
            port = config.port,
            "mqtt_publisher_started"
        );
        Self {
            client,
            qos: qos_from_u8(config.qos),
            publish_timeout: config.publish_timeout,
            connected,
            eventloop: Mutex::new(Some(handle)),
        }
    }

    /// 最近一次 CONNACK 之后连接尚未出错。
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Unavailable("not connected to broker".to_string()));
        }
        debug!(target: "uns.publish", topic = %topic, payload_size = payload.len(), "mqtt_publish");
        match tokio::time::timeout(
            self.publish_timeout,
            self.client.publish(topic, self.qos, false, payload),
        )
        .await
        {
            Ok(result) => result.map_err(|err| PublishError::Publish(err.to_string())),
            Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
        }
    }

    async fn close(&self) -> Result<(), PublishError> {
        let handle = match self.eventloop.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return Ok(());
        };
        let result = if self.is_connected() {
            match tokio::time::timeout(self.publish_timeout, self.client.disconnect()).await {
                Ok(result) => {
                    // 给 DISCONNECT 报文留出发送时间。
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    result.map_err(|err| PublishError::Publish(err.to_string()))
                }
                Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
            }
        } else {
            Ok(())
        };
        handle.abort();
        self.connected.store(false, Ordering::SeqCst);
        result
    }
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[derive(Debug, serde::Serialize)]
struct BusPayload<'a> {
    timestamp: String,
    metric: &'a str,
    line: &'a str,
    value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    production_order: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    article: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    machine_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plant: Option<&'a str>,
}

/// 编码总线报文（与落库侧解析的 JSON 结构一致）。
pub fn encode_payload(
    record: &PendingRecord,
    metric: &str,
    line: &str,
    enrichment: &EnrichmentConfig,
) -> Result<Vec<u8>, PublishError> {
    let value = match &record.value {
        PointValue::Numeric(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(v.to_string())),
        PointValue::Text(v) => serde_json::Value::String(v.clone()),
    };
    let payload = BusPayload {
        timestamp: record
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        metric,
        line,
        value,
        production_order: enrichment.production_order.as_deref(),
        article: enrichment.article.as_deref(),
        machine_name: enrichment.machine_name.as_deref(),
        plant: enrichment.plant.as_deref(),
    };
    serde_json::to_vec(&payload).map_err(|err| PublishError::Payload(err.to_string()))
}
