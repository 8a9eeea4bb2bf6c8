//! Modbus TCP 数据源
//!
//! 以 [`SourceTransport`] 的形式对接入链路：
//!
//! - 会话即一条 TCP 连接；Modbus 没有会话恢复，`resume_session` 重新建连并沿用会话号；
//! - 订阅是后台采样任务，按采样周期读取寄存器，值变化时才推送通知；
//! - 读写遇到 IO 错误或超时时丢弃连接，并在健康状态翻转时上报一次 Bad。
//!
//! ```rust,ignore
//! let transport = ModbusTransport::new(ModbusTcpConfig {
//!     host: "192.168.1.100".to_string(),
//!     ..ModbusTcpConfig::default()
//! });
//! ```

use crate::error::ProtocolError;
use crate::types::{RegisterKind, RegisterMap, RegisterMapping};
use async_trait::async_trait;
use chrono::Utc;
use domain::{PointTable, PointValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};
use uns_ingest::{
    HealthStatus, Notification, SessionId, SourceTransport, SubscriptionId, SubscriptionRequest,
    TransportError,
};

/// Modbus TCP 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    /// Modbus 服务器主机地址
    pub host: String,
    /// Modbus 服务器端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 从站 ID
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 读取超时（毫秒）
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

impl Default for ModbusTcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_modbus_port(),
            unit_id: default_unit_id(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl ModbusTcpConfig {
    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::ConfigParse(e.to_string()))
    }

    fn socket_addr(&self) -> Result<SocketAddr, ProtocolError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ProtocolError::ConfigParse(format!("invalid address: {}", e)))
    }
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    3000
}

/// Modbus TCP 传输。
pub struct ModbusTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: ModbusTcpConfig,
    points: PointTable,
    registers: RegisterMap,
    ctx: Mutex<Option<Context>>,
    health: StdMutex<Option<mpsc::UnboundedSender<HealthStatus>>>,
    healthy: AtomicBool,
    next_session: AtomicU64,
    next_subscription: AtomicU64,
    samplers: StdMutex<HashMap<SubscriptionId, JoinHandle<()>>>,
}

impl ModbusTransport {
    pub fn new(config: ModbusTcpConfig) -> Self {
        Self::with_tables(config, PointTable::default(), RegisterMap::default())
    }

    pub fn with_tables(config: ModbusTcpConfig, points: PointTable, registers: RegisterMap) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                points,
                registers,
                ctx: Mutex::new(None),
                health: StdMutex::new(None),
                healthy: AtomicBool::new(false),
                next_session: AtomicU64::new(0),
                next_subscription: AtomicU64::new(0),
                samplers: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// 当前运行中的采样任务数。
    pub fn active_samplers(&self) -> usize {
        self.inner.lock_samplers().len()
    }
}

impl Inner {
    async fn connect(&self) -> Result<(), ProtocolError> {
        let addr = self.config.socket_addr()?;
        let slave = Slave(self.config.unit_id);
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let ctx = match timeout(connect_timeout, tcp::connect_slave(addr, slave)).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => return Err(ProtocolError::Connection(e.to_string())),
            Err(_) => {
                return Err(ProtocolError::Connection(format!(
                    "connect to {} timed out after {}ms",
                    addr, self.config.connect_timeout_ms
                )));
            }
        };
        *self.ctx.lock().await = Some(ctx);
        info!(
            target: "uns.protocol",
            addr = %addr,
            unit_id = self.config.unit_id,
            "modbus_connected"
        );
        self.report_health(HealthStatus::Good);
        Ok(())
    }

    /// 读取单个点位；链路类错误会丢弃连接并上报 Bad。
    async fn read_point(&self, mapping: &RegisterMapping) -> Result<PointValue, ProtocolError> {
        let result = {
            let mut guard = self.ctx.lock().await;
            let ctx = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
            let result = self.read_registers(ctx, mapping).await;
            if matches!(&result, Err(err) if err.is_link_failure()) {
                guard.take();
            }
            result
        };
        match result {
            Ok(registers) => mapping.decode(&registers),
            Err(err) => {
                if err.is_link_failure() {
                    self.report_health(HealthStatus::Bad(err.to_string()));
                }
                Err(err)
            }
        }
    }

    async fn read_registers(
        &self,
        ctx: &mut Context,
        mapping: &RegisterMapping,
    ) -> Result<Vec<u16>, ProtocolError> {
        let count = mapping.register_count();
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms);
        let response = match mapping.kind {
            RegisterKind::Holding => {
                timeout(read_timeout, ctx.read_holding_registers(mapping.address, count)).await
            }
            RegisterKind::Input => {
                timeout(read_timeout, ctx.read_input_registers(mapping.address, count)).await
            }
        };
        let registers = response
            .map_err(|_| {
                ProtocolError::Timeout(format!(
                    "{} register {} after {}ms",
                    mapping.point, mapping.address, self.config.read_timeout_ms
                ))
            })?
            .map_err(|e| ProtocolError::Connection(e.to_string()))?
            .map_err(|e| ProtocolError::Exception(format!("{:?}", e)))?;
        debug!(
            target: "uns.protocol",
            point = mapping.point,
            register = mapping.address,
            count,
            values = ?registers,
            "read modbus registers"
        );
        Ok(registers)
    }

    /// 只在健康状态翻转时上报。
    fn report_health(&self, status: HealthStatus) {
        let good = status.is_good();
        if self.healthy.swap(good, Ordering::SeqCst) == good {
            return;
        }
        if !good {
            warn!(target: "uns.protocol", status = ?status, "modbus_link_unhealthy");
        }
        let handler = self
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            let _ = handler.send(status);
        }
    }

    fn mapping_for_wire_id(&self, wire_id: &str) -> Option<&'static RegisterMapping> {
        let point = self.points.resolve_wire_id(wire_id)?;
        self.registers.get(point.name)
    }

    fn lock_samplers(&self) -> MutexGuard<'_, HashMap<SubscriptionId, JoinHandle<()>>> {
        self.samplers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 采样项：wire_id + 寄存器 + 上一次推送的值。
struct SampledItem {
    wire_id: String,
    mapping: &'static RegisterMapping,
    last: Option<PointValue>,
}

/// 值与上次推送的不同（或尚未推送过）。
pub(crate) fn changed(last: Option<&PointValue>, current: &PointValue) -> bool {
    match (last, current) {
        (Some(PointValue::Numeric(a)), PointValue::Numeric(b)) => a.to_bits() != b.to_bits(),
        (Some(previous), current) => previous != current,
        (None, _) => true,
    }
}

async fn run_sampler(
    inner: Arc<Inner>,
    subscription_id: SubscriptionId,
    interval_ms: u64,
    mut items: Vec<SampledItem>,
    notifications: mpsc::Sender<Notification>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        for item in items.iter_mut() {
            let value = match inner.read_point(item.mapping).await {
                Ok(value) => value,
                Err(ProtocolError::NotConnected) => break,
                Err(err) => {
                    debug!(
                        target: "uns.protocol",
                        subscription_id,
                        point = item.mapping.point,
                        error = %err,
                        "sample_failed"
                    );
                    if err.is_link_failure() {
                        break;
                    }
                    continue;
                }
            };
            if !changed(item.last.as_ref(), &value) {
                continue;
            }
            let notification = Notification {
                subscription_id,
                wire_id: item.wire_id.clone(),
                value: value.clone(),
                source_timestamp: Utc::now(),
            };
            match notifications.try_send(notification) {
                Ok(()) => item.last = Some(value),
                // 通道满：不记为已推送，下个周期重试。
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(target: "uns.protocol", point = item.mapping.point, "notification_channel_full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}

#[async_trait]
impl SourceTransport for ModbusTransport {
    fn install_health_handler(&self, handler: mpsc::UnboundedSender<HealthStatus>) {
        *self
            .inner
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    async fn open_session(&self) -> Result<SessionId, TransportError> {
        self.inner.connect().await?;
        Ok(self.inner.next_session.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn resume_session(&self, session: SessionId) -> Result<SessionId, TransportError> {
        self.inner.ctx.lock().await.take();
        self.inner.connect().await?;
        Ok(session)
    }

    async fn close_session(&self) -> Result<(), TransportError> {
        for (_, sampler) in self.inner.lock_samplers().drain() {
            sampler.abort();
        }
        self.inner.ctx.lock().await.take();
        self.inner.healthy.store(false, Ordering::SeqCst);
        info!(target: "uns.protocol", "modbus_disconnected");
        Ok(())
    }

    async fn read(
        &self,
        wire_ids: &[String],
    ) -> Result<HashMap<String, PointValue>, TransportError> {
        let mut values = HashMap::with_capacity(wire_ids.len());
        for wire_id in wire_ids {
            let mapping = self
                .inner
                .mapping_for_wire_id(wire_id)
                .ok_or_else(|| TransportError::Read(format!("no register for {wire_id}")))?;
            let value = self.inner.read_point(mapping).await?;
            values.insert(wire_id.clone(), value);
        }
        Ok(values)
    }

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
        notifications: mpsc::Sender<Notification>,
    ) -> Result<SubscriptionId, TransportError> {
        if self.inner.ctx.lock().await.is_none() {
            return Err(TransportError::NoSession);
        }
        let mut items = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let mapping = self.inner.mapping_for_wire_id(&item.wire_id).ok_or_else(|| {
                TransportError::Subscription(format!("no register for {}", item.wire_id))
            })?;
            items.push(SampledItem {
                wire_id: item.wire_id.clone(),
                mapping,
                last: None,
            });
        }
        let interval_ms = request
            .items
            .iter()
            .map(|item| item.parameters.sampling_interval_ms)
            .min()
            .unwrap_or(request.publishing_interval_ms);

        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        let sampler = tokio::spawn(run_sampler(
            self.inner.clone(),
            id,
            interval_ms,
            items,
            notifications,
        ));
        self.inner.lock_samplers().insert(id, sampler);
        info!(
            target: "uns.protocol",
            subscription_id = id,
            items = request.items.len(),
            interval_ms,
            "modbus_sampler_started"
        );
        Ok(id)
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), TransportError> {
        match self.inner.lock_samplers().remove(&id) {
            Some(sampler) => {
                sampler.abort();
                Ok(())
            }
            None => Err(TransportError::Subscription(format!(
                "unknown subscription {id}"
            ))),
        }
    }
}
