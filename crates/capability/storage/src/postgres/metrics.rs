//! Postgres 时序写入实现

use crate::error::StorageError;
use crate::traits::MetricStore;
use chrono::{DateTime, Utc};
use domain::ParsedMetric;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

/// 每行绑定的参数个数。
pub const METRIC_COLUMNS: usize = 9;

/// 单条 INSERT 的最大行数（Postgres 绑定参数上限 65535）。
pub const MAX_ROWS_PER_INSERT: usize = u16::MAX as usize / METRIC_COLUMNS;

pub struct PgMetricStore {
    pub pool: PgPool,
}

impl PgMetricStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }
}

/// 一行的绑定值，顺序与 `metrics` 表列顺序一致。
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow<'a> {
    pub time: DateTime<Utc>,
    pub metric: &'a str,
    pub line: &'a str,
    pub value: Option<f64>,
    pub text_value: Option<&'a str>,
    pub production_order: Option<&'a str>,
    pub article: Option<&'a str>,
    pub machine_name: Option<&'a str>,
    pub plant: Option<&'a str>,
}

impl<'a> From<&'a ParsedMetric> for MetricRow<'a> {
    fn from(metric: &'a ParsedMetric) -> Self {
        Self {
            time: metric.timestamp,
            metric: &metric.metric_name,
            line: &metric.line,
            value: metric.numeric_value,
            text_value: metric.text_value.as_deref(),
            production_order: metric.production_order.as_deref(),
            article: metric.article.as_deref(),
            machine_name: metric.machine_name.as_deref(),
            plant: metric.plant.as_deref(),
        }
    }
}

/// 构造多行 INSERT：`insert into metrics (...) values (...), (...)`。
pub fn build_insert(metrics: &[ParsedMetric]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        "insert into metrics (time, metric, line, value, text_value, \
         production_order, article, machine_name, plant) ",
    );
    builder.push_values(metrics.iter().map(MetricRow::from), |mut row, values| {
        row.push_bind(values.time)
            .push_bind(values.metric)
            .push_bind(values.line)
            .push_bind(values.value)
            .push_bind(values.text_value)
            .push_bind(values.production_order)
            .push_bind(values.article)
            .push_bind(values.machine_name)
            .push_bind(values.plant);
    });
    builder
}

#[async_trait::async_trait]
impl MetricStore for PgMetricStore {
    async fn insert_metrics(&self, metrics: &[ParsedMetric]) -> Result<u64, StorageError> {
        if metrics.is_empty() {
            return Ok(0);
        }
        if metrics.len() <= MAX_ROWS_PER_INSERT {
            let mut builder = build_insert(metrics);
            let result = builder.build().execute(&self.pool).await?;
            return Ok(result.rows_affected());
        }

        // 超出单条语句上限时拆分，但放在同一事务内保持整批原子性。
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in metrics.chunks(MAX_ROWS_PER_INSERT) {
            let mut builder = build_insert(chunk);
            let result = builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        debug!(target: "uns.storage", rows = written, "metrics_inserted_in_chunks");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metric(name: &str) -> ParsedMetric {
        ParsedMetric {
            timestamp: Utc::now(),
            metric_name: name.to_string(),
            line: "filling-line-1".to_string(),
            numeric_value: Some(1.0),
            text_value: None,
            production_order: None,
            article: None,
            machine_name: None,
            plant: None,
        }
    }

    #[test]
    fn batch_is_one_statement_with_one_tuple_per_row() {
        let metrics = vec![metric("a"), metric("b"), metric("c")];
        let builder = build_insert(&metrics);
        let sql = builder.sql();
        assert_eq!(sql.matches("insert into metrics").count(), 1);
        assert_eq!(sql.matches('(').count(), 4);
        assert!(sql.contains("$27"));
        assert!(!sql.contains("$28"));
    }

    #[test]
    fn numeric_metric_binds_value_and_null_text() {
        let mut fill_volume = metric("process_fill_volume_actual");
        fill_volume.numeric_value = Some(1003.5);
        fill_volume.plant = Some("berlin".to_string());
        let row = MetricRow::from(&fill_volume);
        assert_eq!(row.metric, "process_fill_volume_actual");
        assert_eq!(row.line, "filling-line-1");
        assert_eq!(row.value, Some(1003.5));
        assert_eq!(row.text_value, None);
        assert_eq!(row.plant, Some("berlin"));
        assert_eq!(row.article, None);

        let batch = vec![fill_volume];
        let builder = build_insert(&batch);
        assert_eq!(builder.sql().matches("insert into metrics").count(), 1);
        assert!(builder.sql().contains("$9"));
        assert!(!builder.sql().contains("$10"));
    }

    #[test]
    fn text_metric_binds_null_value() {
        let mut status = metric("machine_status");
        status.numeric_value = None;
        status.text_value = Some("Running".to_string());
        let row = MetricRow::from(&status);
        assert_eq!(row.value, None);
        assert_eq!(row.text_value, Some("Running"));
    }

    #[test]
    fn row_cap_stays_under_bind_limit() {
        assert!(MAX_ROWS_PER_INSERT * METRIC_COLUMNS <= u16::MAX as usize);
        assert!((MAX_ROWS_PER_INSERT + 1) * METRIC_COLUMNS > u16::MAX as usize);
    }
}
