//! 订阅管理
//!
//! - 只有连接处于 Connected 时才允许注册订阅；
//! - 每个监控项队列深度 1、溢出丢弃最旧值；
//! - 通知经有界通道进入唯一的分发任务：解析 wire_id → 更新 DataPoint → 入队；
//! - 会话重建后（`session_epoch` 变化）按原点位集合重新订阅，失败只记日志，
//!   等下一次健康信号再试。

use crate::connection::{ConnectionManager, LinkStatus, stopped};
use crate::error::SubscriptionError;
use crate::queue::BatchingQueue;
use crate::transport::{
    MonitoredItem, MonitoringParameters, Notification, SubscriptionId, SubscriptionRequest,
};
use chrono::{DateTime, Utc};
use domain::{ConnectionState, DataPoint, PendingRecord, PointTable, PointValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uns_telemetry::PipelineMetrics;

/// 已注册的订阅。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub subscription_id: SubscriptionId,
    pub points: BTreeSet<String>,
    pub sampling_interval_ms: u64,
    /// 注册时所在的会话代数。
    pub session_epoch: u64,
}

pub struct SubscriptionManager {
    connection: Arc<ConnectionManager>,
    table: PointTable,
    queue: Arc<BatchingQueue>,
    metrics: Arc<PipelineMetrics>,
    registry: StdMutex<HashMap<String, DataPoint>>,
    active: Mutex<Option<SubscriptionHandle>>,
    notifications_tx: mpsc::Sender<Notification>,
    notifications_rx: StdMutex<Option<mpsc::Receiver<Notification>>>,
}

impl SubscriptionManager {
    pub fn new(
        connection: Arc<ConnectionManager>,
        table: PointTable,
        queue: Arc<BatchingQueue>,
        channel_capacity: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (notifications_tx, notifications_rx) = mpsc::channel(channel_capacity.max(1));
        Self {
            connection,
            table,
            queue,
            metrics,
            registry: StdMutex::new(HashMap::new()),
            active: Mutex::new(None),
            notifications_tx,
            notifications_rx: StdMutex::new(Some(notifications_rx)),
        }
    }

    /// 注册点位订阅；替换已有订阅。
    pub async fn subscribe(
        &self,
        names: BTreeSet<String>,
        sampling_interval_ms: u64,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let mut active = self.active.lock().await;
        let handle = self
            .register(names, sampling_interval_ms, active.as_ref())
            .await?;
        info!(
            target: "uns.ingest",
            subscription_id = handle.subscription_id,
            points = handle.points.len(),
            sampling_interval_ms = handle.sampling_interval_ms,
            session_epoch = handle.session_epoch,
            "subscription_created"
        );
        *active = Some(handle.clone());
        Ok(handle)
    }

    /// 按上一次的点位集合重新订阅；没有订阅时返回 `Ok(None)`。
    pub async fn resubscribe(&self) -> Result<Option<SubscriptionHandle>, SubscriptionError> {
        let mut active = self.active.lock().await;
        let Some(current) = active.clone() else {
            return Ok(None);
        };
        let handle = self
            .register(
                current.points.clone(),
                current.sampling_interval_ms,
                Some(&current),
            )
            .await?;
        info!(
            target: "uns.ingest",
            previous_subscription_id = current.subscription_id,
            subscription_id = handle.subscription_id,
            points = handle.points.len(),
            session_epoch = handle.session_epoch,
            "subscription_recreated"
        );
        *active = Some(handle.clone());
        Ok(Some(handle))
    }

    /// 删除订阅（停机时调用）。
    pub async fn unsubscribe(&self) -> Result<(), SubscriptionError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.take() {
            self.connection
                .transport()
                .delete_subscription(current.subscription_id)
                .await?;
            info!(
                target: "uns.ingest",
                subscription_id = current.subscription_id,
                "subscription_deleted"
            );
        }
        Ok(())
    }

    async fn register(
        &self,
        names: BTreeSet<String>,
        sampling_interval_ms: u64,
        previous: Option<&SubscriptionHandle>,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let status = self.connection.status();
        if status.state != ConnectionState::Connected {
            return Err(SubscriptionError::NotConnected);
        }
        let mut items = Vec::with_capacity(names.len());
        for name in &names {
            let point = self
                .table
                .get(name)
                .ok_or_else(|| SubscriptionError::UnknownPoint(name.clone()))?;
            items.push(MonitoredItem {
                wire_id: point.id().wire_id(),
                parameters: MonitoringParameters::latest_only(sampling_interval_ms),
            });
        }

        let transport = self.connection.transport();
        if let Some(previous) = previous {
            // 旧会话的订阅可能已随会话失效，删除失败不影响重建。
            if let Err(err) = transport.delete_subscription(previous.subscription_id).await {
                debug!(
                    target: "uns.ingest",
                    subscription_id = previous.subscription_id,
                    error = %err,
                    "stale_subscription_delete_failed"
                );
            }
        }

        let request = SubscriptionRequest {
            publishing_interval_ms: sampling_interval_ms,
            items,
        };
        let subscription_id = transport
            .create_subscription(request, self.notifications_tx.clone())
            .await?;
        Ok(SubscriptionHandle {
            subscription_id,
            points: names,
            sampling_interval_ms,
            session_epoch: status.session_epoch,
        })
    }

    /// 一次性读取点位当前值，写入注册表并入队。返回读取到的点位数。
    pub async fn read_points(&self, names: &BTreeSet<String>) -> Result<usize, SubscriptionError> {
        if self.connection.state() != ConnectionState::Connected {
            return Err(SubscriptionError::NotConnected);
        }
        let mut wire_ids = Vec::with_capacity(names.len());
        for name in names {
            let point = self
                .table
                .get(name)
                .ok_or_else(|| SubscriptionError::UnknownPoint(name.clone()))?;
            wire_ids.push(point.id().wire_id());
        }
        let values = self.connection.transport().read(&wire_ids).await?;
        let now = Utc::now();
        let mut applied = 0;
        for (wire_id, value) in values {
            if self.apply_value(&wire_id, value, now) {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// 处理一条变化通知。
    pub fn handle_notification(&self, notification: Notification) {
        self.metrics.record_notification();
        self.apply_value(
            &notification.wire_id,
            notification.value,
            notification.source_timestamp,
        );
    }

    fn apply_value(&self, wire_id: &str, value: PointValue, timestamp: DateTime<Utc>) -> bool {
        let Some(point) = self.table.resolve_wire_id(wire_id) else {
            self.metrics.record_notification_unresolved();
            warn!(target: "uns.ingest", wire_id = %wire_id, "notification_unresolved");
            return false;
        };
        if value.kind() != point.kind {
            debug!(
                target: "uns.ingest",
                point = point.name,
                expected = ?point.kind,
                actual = ?value.kind(),
                "notification_kind_mismatch"
            );
        }

        self.lock_registry().insert(
            point.name.to_string(),
            DataPoint {
                id: point.id(),
                value: value.clone(),
                kind: value.kind(),
                changed_at: timestamp,
            },
        );
        self.queue.enqueue(PendingRecord {
            point_name: point.name.to_string(),
            value,
            timestamp,
        });
        true
    }

    /// 注册表快照（按名称排序）。
    pub fn data_points(&self) -> Vec<DataPoint> {
        let mut points: Vec<DataPoint> = self.lock_registry().values().cloned().collect();
        points.sort_by(|a, b| a.id.name.cmp(&b.id.name));
        points
    }

    pub async fn active_subscription(&self) -> Option<SubscriptionHandle> {
        self.active.lock().await.clone()
    }

    fn lock_registry(&self) -> MutexGuard<'_, HashMap<String, DataPoint>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 通知分发任务；停止信号到达后处理完通道中剩余的通知再退出。只能启动一次。
    pub fn spawn_dispatcher(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let receiver = self
            .notifications_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let manager = self.clone();
        tokio::spawn(async move {
            let Some(mut receiver) = receiver else {
                warn!(target: "uns.ingest", "notification dispatcher already running");
                return;
            };
            loop {
                tokio::select! {
                    notification = receiver.recv() => match notification {
                        Some(notification) => manager.handle_notification(notification),
                        None => return,
                    },
                    _ = stopped(&mut shutdown) => break,
                }
            }
            while let Ok(notification) = receiver.try_recv() {
                manager.handle_notification(notification);
            }
        })
    }

    /// 会话重建后恢复订阅。
    pub fn spawn_resubscriber(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut status = manager.connection.watch();
            loop {
                tokio::select! {
                    changed = status.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = stopped(&mut shutdown) => return,
                }
                let current: LinkStatus = *status.borrow_and_update();
                manager.resubscribe_if_stale(current).await;
            }
        })
    }

    async fn resubscribe_if_stale(&self, status: LinkStatus) {
        if status.state != ConnectionState::Connected {
            return;
        }
        let stale = match self.active.lock().await.as_ref() {
            Some(handle) => handle.session_epoch != status.session_epoch,
            None => false,
        };
        if !stale {
            return;
        }
        if let Err(err) = self.resubscribe().await {
            self.metrics.record_resubscribe_failure();
            warn!(
                target: "uns.ingest",
                session_epoch = status.session_epoch,
                error = %err,
                "resubscribe_failed"
            );
        }
    }
}
