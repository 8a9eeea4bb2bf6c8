//! 待写入批次

use domain::ParsedMetric;
use std::time::Duration;
use tokio::time::Instant;

/// 自上次提交以来消费到的记录。
///
/// `last_offset` 覆盖批次内所有已消费记录（包括解析失败被丢弃的），
/// 写入成功后按它提交位点。
#[derive(Debug, Default)]
pub struct Batch {
    metrics: Vec<ParsedMetric>,
    last_offset: Option<i64>,
    opened_at: Option<Instant>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条已消费的记录；`metric` 为 `None` 表示解析失败。
    pub fn push(&mut self, offset: i64, metric: Option<ParsedMetric>) {
        if self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
        }
        self.last_offset = Some(offset);
        if let Some(metric) = metric {
            self.metrics.push(metric);
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// 没有任何待写入或待提交的内容。
    pub fn is_empty(&self) -> bool {
        self.last_offset.is_none()
    }

    pub fn is_full(&self, target: usize) -> bool {
        self.metrics.len() >= target
    }

    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.opened_at
            .is_some_and(|opened| opened.elapsed() >= max_age)
    }

    /// 取出批次内容并重置。
    pub fn take(&mut self) -> (Vec<ParsedMetric>, Option<i64>) {
        self.opened_at = None;
        (
            std::mem::take(&mut self.metrics),
            self.last_offset.take(),
        )
    }
}
