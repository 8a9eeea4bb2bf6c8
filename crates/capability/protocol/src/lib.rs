//! # 协议通信能力模块
//!
//! 以 Modbus TCP 实现接入链路的数据源边界：
//!
//! ```text
//! PLC (Modbus TCP)
//!       │  寄存器读取
//!       ▼
//! ModbusTransport ── RegisterMap（点位 → 寄存器/数据类型/编码）
//!       │  SourceTransport
//!       ▼
//! ConnectionManager / SubscriptionManager (uns-ingest)
//! ```

mod error;
mod modbus_tcp;
mod types;

pub use error::ProtocolError;
pub use modbus_tcp::{ModbusTcpConfig, ModbusTransport};
pub use types::*;
