mod support;

use domain::{ConnectionState, PointValue};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use support::{RecordingPublisher, ScriptedTransport, StallingPublisher, wait_until};
use uns_config::{EnrichmentConfig, TopicConfig};
use uns_ingest::{IngestContext, IngestSettings, MqttPublisher, MqttPublisherConfig, Publisher};
use uns_telemetry::PipelineMetrics;

fn context(
    transport: &Arc<ScriptedTransport>,
    publisher: Arc<dyn Publisher>,
    points: &[&str],
) -> IngestContext {
    let settings = IngestSettings {
        points: points.iter().map(|name| name.to_string()).collect::<BTreeSet<_>>(),
        flush_interval: Duration::from_secs(3_600),
        publish_timeout: Duration::from_secs(1),
        ..IngestSettings::default()
    };
    IngestContext::new(
        transport.clone(),
        publisher,
        settings,
        &TopicConfig::default(),
        EnrichmentConfig {
            machine_name: Some("filler-01".to_string()),
            ..EnrichmentConfig::default()
        },
        Arc::new(PipelineMetrics::new()),
    )
}

#[tokio::test]
async fn start_reads_subscribes_and_stop_flushes_everything() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_value("Process.FillVolume.Actual", PointValue::Numeric(1003.5));
    let publisher = Arc::new(RecordingPublisher::new());
    let context = context(
        &transport,
        publisher.clone(),
        &["Process.FillVolume.Actual", "Machine.Status"],
    );

    context.start().await.expect("start");
    assert_eq!(context.connection().state(), ConnectionState::Connected);
    assert_eq!(transport.created().len(), 1);
    assert_eq!(context.queue().len(), 1);

    transport
        .notify("Machine.Status", PointValue::Text("Running".to_string()))
        .await;
    context.stop().await;

    let published = publisher.published();
    assert_eq!(published.len(), 2);
    assert!(published[0].0.ends_with("/process_fill_volume_actual"));
    assert_eq!(published[0].1["value"], 1003.5);
    assert_eq!(published[0].1["machine_name"], "filler-01");
    assert!(published[1].0.ends_with("/machine_status"));
    assert_eq!(published[1].1["value"], "Running");

    assert_eq!(publisher.close_calls(), 1);
    assert_eq!(transport.closed_sessions(), 1);
    assert_eq!(transport.live_subscriptions(), 0);
    assert_eq!(context.connection().state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_a_pending_connect() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_next_opens(u32::MAX);
    let publisher = Arc::new(RecordingPublisher::new());
    let context = Arc::new(context(&transport, publisher.clone(), &["Process.Temperature"]));

    let starting = {
        let context = context.clone();
        tokio::spawn(async move { context.start().await })
    };
    wait_until(|| transport.open_attempts().len() >= 2).await;
    context.stop().await;

    let result = starting.await.expect("join");
    assert!(result.is_err());
    assert!(transport.created().is_empty());
    assert_eq!(publisher.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_returns_when_the_publisher_hangs() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_value("Process.Temperature", PointValue::Numeric(21.0));
    let publisher = Arc::new(StallingPublisher::new());
    let context = context(&transport, publisher.clone(), &["Process.Temperature"]);

    context.start().await.expect("start");
    assert_eq!(context.queue().len(), 1);
    context.stop().await;

    assert_eq!(publisher.publish_calls(), 1);
    assert_eq!(publisher.close_calls(), 1);
    assert_eq!(context.metrics().snapshot().publish_failure, 1);
    assert_eq!(context.connection().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn stop_returns_when_the_broker_is_unreachable() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let publisher = Arc::new(MqttPublisher::connect(MqttPublisherConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: None,
        password: None,
        qos: 1,
        publish_timeout: Duration::from_millis(200),
    }));
    let transport = Arc::new(ScriptedTransport::new());
    let context = context(&transport, publisher.clone(), &["Process.Temperature"]);

    context.start().await.expect("start");
    for n in 0..100 {
        context.queue().enqueue(domain::PendingRecord {
            point_name: format!("Process.Sample{n}"),
            value: PointValue::Numeric(n as f64),
            timestamp: chrono::Utc::now(),
        });
    }
    let report = tokio::time::timeout(Duration::from_secs(10), context.flush_cycle().flush_once())
        .await
        .expect("flush returns while the broker is down");
    assert_eq!(report.drained, 100);
    assert_eq!(report.published, 0);

    tokio::time::timeout(Duration::from_secs(10), context.stop())
        .await
        .expect("stop returns while the broker is down");
    assert_eq!(context.metrics().snapshot().publish_success, 0);
}
