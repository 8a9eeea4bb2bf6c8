mod metrics;
mod offsets;

pub use metrics::{MAX_ROWS_PER_INSERT, METRIC_COLUMNS, MetricRow, PgMetricStore, build_insert};
pub use offsets::PgOffsetStore;
