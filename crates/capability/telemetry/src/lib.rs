//! 日志初始化与链路指标。
//!
//! 指标不再使用进程级静态实例：每条链路构造时持有一个 `Arc<PipelineMetrics>`，
//! 测试可以为每个场景创建独立的计数器。

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub notifications_received: u64,
    pub notifications_unresolved: u64,
    pub records_enqueued: u64,
    pub records_coalesced: u64,
    pub flush_cycles: u64,
    pub publish_success: u64,
    pub publish_failure: u64,
    pub reconnect_attempts: u64,
    pub resubscribe_failures: u64,
    pub records_consumed: u64,
    pub parse_failures: u64,
    pub batches_written: u64,
    pub rows_written: u64,
    pub write_retries: u64,
    pub write_failures: u64,
    pub offsets_committed: u64,
    pub write_latency_ms_total: u64,
    pub write_latency_ms_count: u64,
}

/// 链路指标（原子计数器）。
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    notifications_received: AtomicU64,
    notifications_unresolved: AtomicU64,
    records_enqueued: AtomicU64,
    records_coalesced: AtomicU64,
    flush_cycles: AtomicU64,
    publish_success: AtomicU64,
    publish_failure: AtomicU64,
    reconnect_attempts: AtomicU64,
    resubscribe_failures: AtomicU64,
    records_consumed: AtomicU64,
    parse_failures: AtomicU64,
    batches_written: AtomicU64,
    rows_written: AtomicU64,
    write_retries: AtomicU64,
    write_failures: AtomicU64,
    offsets_committed: AtomicU64,
    write_latency_ms_total: AtomicU64,
    write_latency_ms_count: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            notifications_unresolved: self.notifications_unresolved.load(Ordering::Relaxed),
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            records_coalesced: self.records_coalesced.load(Ordering::Relaxed),
            flush_cycles: self.flush_cycles.load(Ordering::Relaxed),
            publish_success: self.publish_success.load(Ordering::Relaxed),
            publish_failure: self.publish_failure.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            resubscribe_failures: self.resubscribe_failures.load(Ordering::Relaxed),
            records_consumed: self.records_consumed.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            offsets_committed: self.offsets_committed.load(Ordering::Relaxed),
            write_latency_ms_total: self.write_latency_ms_total.load(Ordering::Relaxed),
            write_latency_ms_count: self.write_latency_ms_count.load(Ordering::Relaxed),
        }
    }

    /// 记录数据源变化通知次数。
    pub fn record_notification(&self) {
        self.notifications_received.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录无法解析标识的通知次数。
    pub fn record_notification_unresolved(&self) {
        self.notifications_unresolved
            .fetch_add(1, Ordering::Relaxed);
    }

    /// 记录入队次数。
    pub fn record_enqueued(&self) {
        self.records_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录被同一点位新值覆盖的旧值次数。
    pub fn record_coalesced(&self) {
        self.records_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_cycle(&self) {
        self.flush_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_success(&self) {
        self.publish_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resubscribe_failure(&self) {
        self.resubscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_consumed(&self) {
        self.records_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次成功的批量写入。
    pub fn record_batch_written(&self, rows: usize, latency_ms: u64) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows as u64, Ordering::Relaxed);
        self.write_latency_ms_total
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.write_latency_ms_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_retry(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offset_committed(&self) {
        self.offsets_committed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
