//! 数据源连接管理
//!
//! 持有唯一的逻辑连接，状态通过 `watch` 广播：
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                  │ health=Bad
//!      └────────── err ─────────┘                  ▼
//!                               Connected ◀──ok── Reconnecting ◀─┐
//!                                                    │ err ──────┘
//! ```
//!
//! 构造时不会自动连接；重连本身不做次数限制，由 [`ConnectionManager::supervise`]
//! 按指数退避驱动。

use crate::error::ConnectionError;
use crate::transport::{HealthStatus, SessionId, SourceTransport};
use domain::{Backoff, ConnectionState};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uns_telemetry::PipelineMetrics;

/// 连接状态快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    /// 最近一次健康信号是否为 Good。
    pub healthy: bool,
    /// 收到的健康信号数（每次信号都会唤醒观察者）。
    pub health_seq: u64,
    /// 会话建立次数；每次 connect/reconnect 成功加一。
    pub session_epoch: u64,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            healthy: false,
            health_seq: 0,
            session_epoch: 0,
        }
    }
}

/// `connect` 成功的凭证。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected {
    pub session: SessionId,
    pub epoch: u64,
}

pub struct ConnectionManager {
    transport: Arc<dyn SourceTransport>,
    status: watch::Sender<LinkStatus>,
    /// 当前会话；锁同时串行化 connect / reconnect / disconnect。
    session: Mutex<Option<SessionId>>,
    health_rx: StdMutex<Option<mpsc::UnboundedReceiver<HealthStatus>>>,
    metrics: Arc<PipelineMetrics>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn SourceTransport>, metrics: Arc<PipelineMetrics>) -> Self {
        let (health_tx, health_rx) = mpsc::unbounded_channel();
        transport.install_health_handler(health_tx);
        let (status, _) = watch::channel(LinkStatus::default());
        Self {
            transport,
            status,
            session: Mutex::new(None),
            health_rx: StdMutex::new(Some(health_rx)),
            metrics,
        }
    }

    pub fn transport(&self) -> Arc<dyn SourceTransport> {
        self.transport.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn is_healthy(&self) -> bool {
        let status = self.status.borrow();
        status.state == ConnectionState::Connected && status.healthy
    }

    /// 建立连接；已连接时直接返回成功。处于 Reconnecting 时等价于 `reconnect`。
    pub async fn connect(&self) -> Result<Connected, ConnectionError> {
        let mut session = self.session.lock().await;
        let status = self.status();
        match (status.state, *session) {
            (ConnectionState::Connected, Some(id)) => {
                return Ok(Connected {
                    session: id,
                    epoch: status.session_epoch,
                });
            }
            (ConnectionState::Reconnecting, _) => return self.reconnect_locked(&mut *session).await,
            _ => {}
        }

        self.set_state(ConnectionState::Connecting);
        match self.transport.open_session().await {
            Ok(id) => {
                *session = Some(id);
                let epoch = self.mark_connected();
                info!(target: "uns.ingest", session = id, epoch, "source_connected");
                Ok(Connected { session: id, epoch })
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                Err(ConnectionError::Transport(err))
            }
        }
    }

    /// 通过会话恢复重连；失败时保持 Reconnecting 并把错误返回给调用方。
    pub async fn reconnect(&self) -> Result<Connected, ConnectionError> {
        let mut session = self.session.lock().await;
        self.reconnect_locked(&mut *session).await
    }

    async fn reconnect_locked(
        &self,
        session: &mut Option<SessionId>,
    ) -> Result<Connected, ConnectionError> {
        let status = self.status();
        if let (ConnectionState::Connected, Some(id)) = (status.state, *session) {
            return Ok(Connected {
                session: id,
                epoch: status.session_epoch,
            });
        }

        self.set_state(ConnectionState::Reconnecting);
        self.metrics.record_reconnect_attempt();
        let result = match *session {
            Some(previous) => self.transport.resume_session(previous).await,
            None => self.transport.open_session().await,
        };
        match result {
            Ok(id) => {
                *session = Some(id);
                let epoch = self.mark_connected();
                info!(target: "uns.ingest", session = id, epoch, "source_reconnected");
                Ok(Connected { session: id, epoch })
            }
            Err(err) => {
                warn!(target: "uns.ingest", error = %err, "source_reconnect_failed");
                Err(ConnectionError::Transport(err))
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let mut session = self.session.lock().await;
        let result = if session.take().is_some() {
            self.transport.close_session().await
        } else {
            Ok(())
        };
        self.status.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            status.healthy = false;
        });
        info!(target: "uns.ingest", "source_disconnected");
        result.map_err(ConnectionError::Transport)
    }

    /// 按退避策略反复 `connect`，直到成功或收到停止信号。
    pub async fn connect_with_retry(
        &self,
        backoff: Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Connected, ConnectionError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.connect().await {
                Ok(connected) => return Ok(connected),
                Err(err) => err,
            };
            let delay = backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            warn!(
                target: "uns.ingest",
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "source_connect_failed"
            );
            if !sleep_or_shutdown(delay, shutdown).await {
                return Err(ConnectionError::Cancelled);
            }
        }
    }

    /// 处理一次健康信号。
    pub async fn handle_health(&self, health: HealthStatus) {
        self.status.send_modify(|status| {
            status.health_seq = status.health_seq.wrapping_add(1);
            status.healthy = health.is_good();
        });
        match (self.state(), &health) {
            (ConnectionState::Connected, HealthStatus::Bad(reason)) => {
                warn!(target: "uns.ingest", reason = %reason, "source_health_bad");
                self.set_state(ConnectionState::Reconnecting);
                if let Err(err) = self.reconnect().await {
                    debug!(target: "uns.ingest", error = %err, "health_reconnect_deferred");
                }
            }
            (ConnectionState::Reconnecting, _) => {
                if let Err(err) = self.reconnect().await {
                    debug!(target: "uns.ingest", error = %err, "health_reconnect_deferred");
                }
            }
            _ => {}
        }
    }

    /// 消费传输层健康信号。只能启动一次。
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let receiver = self
            .health_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let manager = self.clone();
        tokio::spawn(async move {
            let Some(mut receiver) = receiver else {
                warn!(target: "uns.ingest", "health monitor already running");
                return;
            };
            loop {
                tokio::select! {
                    _ = stopped(&mut shutdown) => break,
                    health = receiver.recv() => match health {
                        Some(health) => manager.handle_health(health).await,
                        None => break,
                    },
                }
            }
        })
    }

    /// 重连守护：状态进入 Reconnecting 后按退避反复重连，直到恢复或停止。
    pub fn supervise(
        self: &Arc<Self>,
        backoff: Backoff,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut status = manager.watch();
            loop {
                tokio::select! {
                    _ = stopped(&mut shutdown) => return,
                    changed = async {
                        status
                            .wait_for(|s| s.state == ConnectionState::Reconnecting)
                            .await
                            .map(|_| ())
                    } => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }

                let mut attempt = 0u32;
                while manager.state() == ConnectionState::Reconnecting {
                    if manager.reconnect().await.is_ok() {
                        break;
                    }
                    let delay = backoff.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        target: "uns.ingest",
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "source_reconnect_backoff"
                    );
                    if !sleep_or_shutdown(delay, &mut shutdown).await {
                        return;
                    }
                }
            }
        })
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            status.state = state;
            true
        });
    }

    fn mark_connected(&self) -> u64 {
        let mut epoch = 0;
        self.status.send_modify(|status| {
            status.state = ConnectionState::Connected;
            status.healthy = true;
            status.session_epoch = status.session_epoch.wrapping_add(1);
            epoch = status.session_epoch;
        });
        epoch
    }
}

/// 等待停止信号；发送端关闭也视为停止。
///
/// `wait_for` 返回的 `Ref` 持有读锁（非 `Send`），必须在此处释放。
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// 睡眠 `delay`；期间收到停止信号返回 false。
pub(crate) async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stopped(shutdown) => false,
    }
}
