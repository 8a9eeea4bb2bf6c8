//! 采集桥接进程：Modbus 数据源 → MQTT 总线。

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uns_config::EdgeConfig;
use uns_ingest::{IngestContext, IngestSettings, MqttPublisher, MqttPublisherConfig};
use uns_protocol::{ModbusTcpConfig, ModbusTransport};
use uns_telemetry::{PipelineMetrics, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = EdgeConfig::from_env()?;
    init_tracing();

    let metrics = Arc::new(PipelineMetrics::new());
    let publisher = Arc::new(MqttPublisher::connect(MqttPublisherConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        qos: config.mqtt_qos,
        publish_timeout: Duration::from_millis(config.mqtt_publish_timeout_ms),
    }));
    let transport = Arc::new(ModbusTransport::new(ModbusTcpConfig {
        host: config.modbus_host.clone(),
        port: config.modbus_port,
        unit_id: config.modbus_unit_id,
        ..ModbusTcpConfig::default()
    }));

    let context = IngestContext::new(
        transport,
        publisher,
        IngestSettings::from_config(&config),
        &config.topic,
        config.enrichment.clone(),
        metrics.clone(),
    );

    info!(
        target: "uns.edge",
        modbus_host = %config.modbus_host,
        modbus_port = config.modbus_port,
        mqtt_host = %config.mqtt_host,
        "edge_starting"
    );

    // 数据源长时间不可用时 start 会一直重试，收到退出信号即停止。
    let interrupted = tokio::select! {
        started = context.start() => {
            if let Err(err) = started {
                error!(target: "uns.edge", error = %err, "edge_start_failed");
                context.stop().await;
                return Err(err.into());
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if !interrupted {
        info!(target: "uns.edge", "edge_running");
        tokio::signal::ctrl_c().await?;
    }

    info!(target: "uns.edge", "edge_stopping");
    context.stop().await;
    let snapshot = metrics.snapshot();
    info!(
        target: "uns.edge",
        publish_success = snapshot.publish_success,
        publish_failure = snapshot.publish_failure,
        records_coalesced = snapshot.records_coalesced,
        "edge_stopped"
    );
    Ok(())
}
