//! 落库进程：MQTT 桥接后的 Kafka 主题 → PostgreSQL 时序表。

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use uns_config::HistorianConfig;
use uns_sink::{
    BatchWriter, OffsetCommitter, SinkRunner, SinkSettings, start_from, write_policy_from_config,
};
use uns_storage::{PgMetricStore, PgOffsetStore, connect_pool, ensure_schema};
use uns_stream::{KafkaConsumerConfig, KafkaPartitionConsumer};
use uns_telemetry::{PipelineMetrics, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = HistorianConfig::from_env()?;
    init_tracing();

    let pool = connect_pool(&config.database_url).await?;
    ensure_schema(&pool).await?;
    let metrics = Arc::new(PipelineMetrics::new());
    let store = Arc::new(PgMetricStore::new(pool.clone()));
    let offsets = Arc::new(PgOffsetStore::new(pool));

    let mut committer = OffsetCommitter::new(
        offsets,
        config.consumer_group.clone(),
        config.kafka_topic.clone(),
        config.kafka_partition,
        metrics.clone(),
    );
    let start = committer
        .resume_from(start_from(config.start_position))
        .await?;

    let mut consumer_config = KafkaConsumerConfig::new(
        config.kafka_brokers.clone(),
        config.kafka_topic.clone(),
        config.kafka_partition,
    );
    consumer_config.start = start;
    let consumer = KafkaPartitionConsumer::connect(consumer_config).await?;

    let writer = BatchWriter::new(store, write_policy_from_config(&config), metrics.clone());
    let mut runner = SinkRunner::new(
        consumer,
        writer,
        committer,
        SinkSettings::from_config(&config),
        metrics.clone(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: "uns.historian", "shutdown_requested");
        }
        let _ = stop_tx.send(true);
    });

    info!(
        target: "uns.historian",
        topic = %config.kafka_topic,
        partition = config.kafka_partition,
        group_id = %config.consumer_group,
        "historian_started"
    );
    let result = runner.run(stop_rx).await;
    let snapshot = metrics.snapshot();
    info!(
        target: "uns.historian",
        records_consumed = snapshot.records_consumed,
        parse_failures = snapshot.parse_failures,
        rows_written = snapshot.rows_written,
        offsets_committed = snapshot.offsets_committed,
        "historian_stopped"
    );
    if let Err(err) = result {
        error!(target: "uns.historian", error = %err, "historian_failed");
        return Err(err.into());
    }
    Ok(())
}
