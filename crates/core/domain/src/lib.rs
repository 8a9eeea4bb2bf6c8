pub mod backoff;
pub mod data;
pub mod points;

pub use backoff::Backoff;
pub use data::{
    ConnectionState, ConsumerPosition, DataPoint, ParsedMetric, PendingRecord, PointId, PointValue,
    ValueKind,
};
pub use points::{AccessLevel, FILLING_LINE_POINTS, PointDefinition, PointTable};

