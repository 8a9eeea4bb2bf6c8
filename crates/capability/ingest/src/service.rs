//! 采集链路上下文
//!
//! 持有链路 A 的全部可变状态（连接、订阅注册表、队列、flush 周期、指标），
//! 由调用方显式 `start` / `stop`。停机顺序：
//!
//! 1. 停止控制任务（健康监听、重连守护、重订阅）；
//! 2. 删除订阅并断开数据源；
//! 3. 分发任务处理完通道中剩余通知；
//! 4. flush 周期做最后一次 flush；
//! 5. 关闭发布客户端。

use crate::connection::ConnectionManager;
use crate::error::IngestError;
use crate::flush::FlushCycle;
use crate::publish::Publisher;
use crate::queue::BatchingQueue;
use crate::subscription::SubscriptionManager;
use crate::topic::TopicMapper;
use crate::transport::SourceTransport;
use domain::{Backoff, PointTable};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uns_config::{EdgeConfig, EnrichmentConfig, TopicConfig};
use uns_telemetry::PipelineMetrics;

/// 链路 A 运行参数。
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub table: PointTable,
    /// 订阅的点位；为空时订阅点表全部点位。
    pub points: BTreeSet<String>,
    pub sampling_interval_ms: u64,
    pub flush_interval: Duration,
    pub reconnect_backoff: Backoff,
    pub channel_capacity: usize,
    /// 订阅前先做一次全量读取。
    pub initial_read: bool,
    /// 单条发布与关闭发布器的等待上限。
    pub publish_timeout: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            table: PointTable::default(),
            points: BTreeSet::new(),
            sampling_interval_ms: 1_000,
            flush_interval: Duration::from_secs(5),
            reconnect_backoff: Backoff::default(),
            channel_capacity: 1_024,
            initial_read: true,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl IngestSettings {
    pub fn from_config(config: &EdgeConfig) -> Self {
        Self {
            sampling_interval_ms: config.sampling_interval_ms,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            reconnect_backoff: Backoff::new(
                Duration::from_millis(config.reconnect_base_ms),
                Duration::from_millis(config.reconnect_max_ms),
            ),
            channel_capacity: config.notification_channel_capacity,
            publish_timeout: Duration::from_millis(config.mqtt_publish_timeout_ms),
            ..Self::default()
        }
    }

    fn point_names(&self) -> BTreeSet<String> {
        if self.points.is_empty() {
            self.table.names().map(str::to_string).collect()
        } else {
            self.points.clone()
        }
    }
}

struct Stops {
    control: watch::Sender<bool>,
    dispatch: watch::Sender<bool>,
    flush: watch::Sender<bool>,
}

#[derive(Default)]
struct Tasks {
    control: Vec<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    flusher: Option<JoinHandle<()>>,
}

pub struct IngestContext {
    settings: IngestSettings,
    connection: Arc<ConnectionManager>,
    subscriptions: Arc<SubscriptionManager>,
    queue: Arc<BatchingQueue>,
    flush: Arc<FlushCycle>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<PipelineMetrics>,
    stops: Stops,
    tasks: Mutex<Tasks>,
}

impl IngestContext {
    pub fn new(
        transport: Arc<dyn SourceTransport>,
        publisher: Arc<dyn Publisher>,
        settings: IngestSettings,
        topic: &TopicConfig,
        enrichment: EnrichmentConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(transport, metrics.clone()));
        let queue = Arc::new(BatchingQueue::new(metrics.clone()));
        let subscriptions = Arc::new(SubscriptionManager::new(
            connection.clone(),
            settings.table,
            queue.clone(),
            settings.channel_capacity,
            metrics.clone(),
        ));
        let flush = Arc::new(FlushCycle::new(
            queue.clone(),
            TopicMapper::new(topic),
            publisher.clone(),
            topic.line.clone(),
            enrichment,
            metrics.clone(),
        )
        .with_publish_timeout(settings.publish_timeout));
        Self {
            settings,
            connection,
            subscriptions,
            queue,
            flush,
            publisher,
            metrics,
            stops: Stops {
                control: watch::channel(false).0,
                dispatch: watch::channel(false).0,
                flush: watch::channel(false).0,
            },
            tasks: Mutex::new(Tasks::default()),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn queue(&self) -> &Arc<BatchingQueue> {
        &self.queue
    }

    pub fn flush_cycle(&self) -> &Arc<FlushCycle> {
        &self.flush
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// 启动后台任务，连接数据源（按退避无限重试）并注册订阅。
    ///
    /// 连接阶段可被 `stop` 打断，此时返回 `ConnectionError::Cancelled`。
    pub async fn start(&self) -> Result<(), IngestError> {
        {
            let mut tasks = self.lock_tasks();
            if tasks.dispatcher.is_some() {
                warn!(target: "uns.ingest", "ingest context already started");
                return Ok(());
            }
            tasks.dispatcher = Some(
                self.subscriptions
                    .spawn_dispatcher(self.stops.dispatch.subscribe()),
            );
            tasks.flusher = Some(
                self.flush
                    .spawn(self.settings.flush_interval, self.stops.flush.subscribe()),
            );
            tasks.control.push(
                self.connection
                    .spawn_health_monitor(self.stops.control.subscribe()),
            );
            tasks.control.push(self.connection.supervise(
                self.settings.reconnect_backoff,
                self.stops.control.subscribe(),
            ));
            tasks.control.push(
                self.subscriptions
                    .spawn_resubscriber(self.stops.control.subscribe()),
            );
        }

        let mut shutdown = self.stops.control.subscribe();
        let connected = self
            .connection
            .connect_with_retry(self.settings.reconnect_backoff, &mut shutdown)
            .await?;

        let names = self.settings.point_names();
        if self.settings.initial_read {
            match self.subscriptions.read_points(&names).await {
                Ok(count) => info!(target: "uns.ingest", points = count, "initial_read_completed"),
                Err(err) => warn!(target: "uns.ingest", error = %err, "initial_read_failed"),
            }
        }
        let handle = self
            .subscriptions
            .subscribe(names, self.settings.sampling_interval_ms)
            .await?;
        info!(
            target: "uns.ingest",
            session = connected.session,
            subscription_id = handle.subscription_id,
            points = handle.points.len(),
            flush_interval_ms = self.settings.flush_interval.as_millis() as u64,
            "ingest_started"
        );
        Ok(())
    }

    /// 按固定顺序停止链路；可重复调用。
    pub async fn stop(&self) {
        let tasks = std::mem::take(&mut *self.lock_tasks());

        self.stops.control.send_replace(true);
        for task in tasks.control {
            let _ = task.await;
        }

        if let Err(err) = self.subscriptions.unsubscribe().await {
            warn!(target: "uns.ingest", error = %err, "unsubscribe_failed");
        }
        if let Err(err) = self.connection.disconnect().await {
            warn!(target: "uns.ingest", error = %err, "source_disconnect_failed");
        }

        self.stops.dispatch.send_replace(true);
        if let Some(task) = tasks.dispatcher {
            let _ = task.await;
        }
        self.stops.flush.send_replace(true);
        if let Some(task) = tasks.flusher {
            let _ = task.await;
        }

        let timeout = self.settings.publish_timeout;
        match tokio::time::timeout(timeout, self.publisher.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(target: "uns.ingest", error = %err, "publisher_close_failed");
            }
            Err(_) => {
                warn!(
                    target: "uns.ingest",
                    timeout_ms = timeout.as_millis() as u64,
                    "publisher_close_timed_out"
                );
            }
        }
        let metrics = self.metrics.snapshot();
        info!(
            target: "uns.ingest",
            notifications = metrics.notifications_received,
            published = metrics.publish_success,
            publish_failures = metrics.publish_failure,
            "ingest_stopped"
        );
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
