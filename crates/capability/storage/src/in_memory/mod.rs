mod metrics;
mod offsets;

pub use metrics::InMemoryMetricStore;
pub use offsets::InMemoryOffsetStore;
