use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use domain::{Backoff, ConsumerPosition, PendingRecord, PointValue};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uns_config::EnrichmentConfig;
use uns_sink::{
    BatchWriter, OffsetCommitter, SinkError, SinkRunner, SinkSettings, WriteError, WritePolicy,
};
use uns_storage::{
    InMemoryMetricStore, InMemoryOffsetStore, MetricStore, OffsetStore, StorageError,
};
use uns_stream::{MemoryLog, MemoryLogConsumer, StartFrom};
use uns_telemetry::PipelineMetrics;

const TOPIC: &str = "uns.metrics";
const GROUP: &str = "uns-historian";

type RunHandle = JoinHandle<(SinkRunner<MemoryLogConsumer>, Result<(), SinkError>)>;

fn payload(metric: &str, value: f64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "timestamp": "2025-01-15T10:30:45.123Z",
        "metric": metric,
        "line": "filling-line-1",
        "value": value,
    }))
    .unwrap()
}

fn settings(batch_size: usize) -> SinkSettings {
    SinkSettings {
        batch_size,
        batch_max_age: Duration::from_secs(60),
        poll_timeout: Duration::from_millis(100),
        consumer_backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(1)),
    }
}

async fn build(
    log: &MemoryLog,
    store: Arc<dyn MetricStore>,
    offsets: Arc<dyn OffsetStore>,
    metrics: &Arc<PipelineMetrics>,
    settings: SinkSettings,
) -> SinkRunner<MemoryLogConsumer> {
    let mut committer = OffsetCommitter::new(offsets, GROUP, TOPIC, 0, metrics.clone());
    let start = committer.resume_from(StartFrom::Earliest).await.unwrap();
    let writer = BatchWriter::new(
        store,
        WritePolicy {
            max_attempts: 3,
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
        },
        metrics.clone(),
    );
    SinkRunner::new(log.consumer(start), writer, committer, settings, metrics.clone())
}

fn spawn(mut runner: SinkRunner<MemoryLogConsumer>, shutdown: watch::Receiver<bool>) -> RunHandle {
    tokio::spawn(async move {
        let result = runner.run(shutdown).await;
        (runner, result)
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..3000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// 前 `healthy_commits` 次提交成功，之后全部失败。
struct FlakyOffsets {
    inner: Arc<InMemoryOffsetStore>,
    healthy_commits: usize,
    calls: AtomicUsize,
}

impl FlakyOffsets {
    fn new(inner: Arc<InMemoryOffsetStore>, healthy_commits: usize) -> Self {
        Self {
            inner,
            healthy_commits,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OffsetStore for FlakyOffsets {
    async fn load(
        &self,
        group_id: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<ConsumerPosition>, StorageError> {
        self.inner.load(group_id, topic, partition).await
    }

    async fn commit(&self, position: &ConsumerPosition) -> Result<(), StorageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.healthy_commits {
            return Err(StorageError::new("offset store unavailable"));
        }
        self.inner.commit(position).await
    }
}

#[tokio::test(start_paused = true)]
async fn transient_write_failures_commit_once_after_success() {
    let log = MemoryLog::new(TOPIC, 0);
    let store = Arc::new(InMemoryMetricStore::new());
    let offsets = Arc::new(InMemoryOffsetStore::new());
    let metrics = Arc::new(PipelineMetrics::new());
    store.fail_next(2);
    for n in 0..3 {
        log.append(payload("process_fill_volume_actual", n as f64));
    }

    let runner = build(&log, store.clone(), offsets.clone(), &metrics, settings(3)).await;
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn(runner, stop_rx);

    wait_until(|| !offsets.history().is_empty()).await;
    stop_tx.send(true).unwrap();
    let (runner, result) = handle.await.unwrap();
    result.unwrap();

    assert_eq!(store.attempts(), 3);
    assert_eq!(store.statements(), 1);
    assert_eq!(store.len(), 3);
    let history = offsets.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].offset, 2);
    assert_eq!(runner.committed(), Some(2));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.write_retries, 2);
    assert_eq!(snapshot.batches_written, 1);
    assert_eq!(snapshot.offsets_committed, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_write_is_fatal_and_commits_nothing() {
    let log = MemoryLog::new(TOPIC, 0);
    let store = Arc::new(InMemoryMetricStore::new());
    let offsets = Arc::new(InMemoryOffsetStore::new());
    let metrics = Arc::new(PipelineMetrics::new());
    store.fail_next(10);
    log.append(payload("a", 1.0));
    log.append(payload("b", 2.0));

    let mut runner = build(&log, store.clone(), offsets.clone(), &metrics, settings(2)).await;
    let (_stop_tx, stop_rx) = watch::channel(false);
    let result = runner.run(stop_rx).await;

    assert!(matches!(
        result,
        Err(SinkError::Write(WriteError::Exhausted { attempts: 3, .. }))
    ));
    assert!(store.is_empty());
    assert!(offsets.history().is_empty());
    assert_eq!(runner.committed(), None);
    assert_eq!(metrics.snapshot().write_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_records_are_dropped_and_committed_past() {
    let log = MemoryLog::new(TOPIC, 0);
    let store = Arc::new(InMemoryMetricStore::new());
    let offsets = Arc::new(InMemoryOffsetStore::new());
    let metrics = Arc::new(PipelineMetrics::new());
    log.append(payload("a", 1.0));
    log.append(b"{not json".to_vec());
    log.append(payload("b", 2.0));

    let runner = build(&log, store.clone(), offsets.clone(), &metrics, settings(2)).await;
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn(runner, stop_rx);

    wait_until(|| !offsets.history().is_empty()).await;
    stop_tx.send(true).unwrap();
    let (runner, result) = handle.await.unwrap();
    result.unwrap();

    let names: Vec<String> = store.rows().into_iter().map(|row| row.metric_name).collect();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(runner.committed(), Some(2));
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.records_consumed, 3);
    assert_eq!(snapshot.parse_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn restart_after_failed_commit_replays_without_loss() {
    let log = MemoryLog::new(TOPIC, 0);
    let store = Arc::new(InMemoryMetricStore::new());
    let positions = Arc::new(InMemoryOffsetStore::new());
    let metrics = Arc::new(PipelineMetrics::new());
    for n in 0..4 {
        log.append(payload(&format!("m{n}"), n as f64));
    }

    // 第一轮：第二批写入成功但位点提交失败，然后停机。
    let flaky = Arc::new(FlakyOffsets::new(positions.clone(), 1));
    let runner = build(&log, store.clone(), flaky.clone(), &metrics, settings(2)).await;
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn(runner, stop_rx);
    wait_until(|| store.len() == 4 && flaky.calls() == 2).await;
    stop_tx.send(true).unwrap();
    let (first, result) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(first.committed(), Some(1));

    // 第二轮：从已提交位点 + 1 继续，重放第二批。
    let runner = build(&log, store.clone(), positions.clone(), &metrics, settings(2)).await;
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn(runner, stop_rx);
    wait_until(|| store.len() == 6).await;
    wait_until(|| positions.history().len() == 2).await;
    stop_tx.send(true).unwrap();
    let (second, result) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(second.committed(), Some(3));

    let names: Vec<String> = store.rows().into_iter().map(|row| row.metric_name).collect();
    assert_eq!(names, vec!["m0", "m1", "m2", "m3", "m2", "m3"]);
}

#[tokio::test(start_paused = true)]
async fn bus_payload_lands_as_one_row() {
    let log = MemoryLog::new(TOPIC, 0);
    let store = Arc::new(InMemoryMetricStore::new());
    let offsets = Arc::new(InMemoryOffsetStore::new());
    let metrics = Arc::new(PipelineMetrics::new());

    let timestamp = Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 45).unwrap();
    let record = PendingRecord {
        point_name: "FillVolumeActual".to_string(),
        value: PointValue::Numeric(1003.5),
        timestamp,
    };
    let enrichment = EnrichmentConfig {
        plant: Some("berlin".to_string()),
        machine_name: Some("filler-01".to_string()),
        ..EnrichmentConfig::default()
    };
    let raw = uns_ingest::encode_payload(
        &record,
        "process_fill_volume_actual",
        "filling-line-1",
        &enrichment,
    )
    .unwrap();
    log.append(raw);

    let runner = build(&log, store.clone(), offsets.clone(), &metrics, settings(1)).await;
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn(runner, stop_rx);
    wait_until(|| !offsets.history().is_empty()).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().1.unwrap();

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(store.statements(), 1);
    let row = &rows[0];
    assert_eq!(row.timestamp, timestamp);
    assert_eq!(row.metric_name, "process_fill_volume_actual");
    assert_eq!(row.line, "filling-line-1");
    assert_eq!(row.numeric_value, Some(1003.5));
    assert_eq!(row.text_value, None);
    assert_eq!(row.plant.as_deref(), Some("berlin"));
    assert_eq!(row.machine_name.as_deref(), Some("filler-01"));
    assert_eq!(row.production_order, None);
}

#[tokio::test(start_paused = true)]
async fn partial_batch_flushes_after_max_age() {
    let log = MemoryLog::new(TOPIC, 0);
    let store = Arc::new(InMemoryMetricStore::new());
    let offsets = Arc::new(InMemoryOffsetStore::new());
    let metrics = Arc::new(PipelineMetrics::new());
    log.append(payload("a", 1.0));
    log.append(payload("b", 2.0));

    let aged = SinkSettings {
        batch_max_age: Duration::from_secs(5),
        ..settings(100)
    };
    let started = tokio::time::Instant::now();
    let runner = build(&log, store.clone(), offsets.clone(), &metrics, aged).await;
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn(runner, stop_rx);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(store.is_empty());

    wait_until(|| store.len() == 2).await;
    assert!(started.elapsed() >= Duration::from_secs(5));
    wait_until(|| !offsets.history().is_empty()).await;
    stop_tx.send(true).unwrap();
    let (runner, result) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(runner.committed(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_partial_batch() {
    let log = MemoryLog::new(TOPIC, 0);
    let store = Arc::new(InMemoryMetricStore::new());
    let offsets = Arc::new(InMemoryOffsetStore::new());
    let metrics = Arc::new(PipelineMetrics::new());
    for n in 0..3 {
        log.append(payload("a", n as f64));
    }

    let runner = build(&log, store.clone(), offsets.clone(), &metrics, settings(100)).await;
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = spawn(runner, stop_rx);
    wait_until(|| metrics.snapshot().records_consumed == 3).await;
    assert!(store.is_empty());

    stop_tx.send(true).unwrap();
    let (runner, result) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(runner.committed(), Some(2));
}
