//! # 落库链路
//!
//! 从消息总线消费指标报文，解析为 [`domain::ParsedMetric`]，攒批后以单条
//! 多行 INSERT 写入时序库，写入成功后再提交消费位点（至少一次）。
//!
//! - [`parser`]：报文解析，失败的记录丢弃并计数
//! - [`writer`]：批量写入与指数退避重试
//! - [`commit`]：位点读取与提交
//! - [`runner`]：消费主循环

pub mod batch;
pub mod commit;
pub mod error;
pub mod parser;
pub mod runner;
pub mod writer;

pub use batch::Batch;
pub use commit::OffsetCommitter;
pub use error::{ParseError, SinkError, WriteError};
pub use parser::{parse, parse_at};
pub use runner::{SinkRunner, SinkSettings, start_from, write_policy_from_config};
pub use writer::{BatchWriter, WritePolicy};
