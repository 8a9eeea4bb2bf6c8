//! 寄存器映射与解码

use crate::error::ProtocolError;
use domain::PointValue;
use serde::{Deserialize, Serialize};

/// Modbus 寄存器数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusDataType {
    /// 16位有符号整数
    #[default]
    Int16,
    /// 16位无符号整数
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
    /// 64位浮点数（4个寄存器）
    Float64,
}

impl ModbusDataType {
    pub const fn register_count(self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }
}

/// 寄存器区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// 保持寄存器 (0x03)
    Holding,
    /// 输入寄存器 (0x04)
    Input,
}

/// 寄存器内容到点位值的编码方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterEncoding {
    /// 数值，`raw * scale`
    Number { data_type: ModbusDataType, scale: f64 },
    /// 枚举码 → 文本标签
    Label(&'static [(u16, &'static str)]),
    /// ASCII 文本，每个寄存器两个字节（高字节在前）
    Ascii { registers: u16 },
}

impl RegisterEncoding {
    pub const fn register_count(&self) -> u16 {
        match self {
            Self::Number { data_type, .. } => data_type.register_count(),
            Self::Label(_) => 1,
            Self::Ascii { registers } => *registers,
        }
    }
}

/// 点位 → 寄存器。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterMapping {
    pub point: &'static str,
    pub kind: RegisterKind,
    pub address: u16,
    pub encoding: RegisterEncoding,
}

impl RegisterMapping {
    const fn number(
        point: &'static str,
        kind: RegisterKind,
        address: u16,
        data_type: ModbusDataType,
        scale: f64,
    ) -> Self {
        Self {
            point,
            kind,
            address,
            encoding: RegisterEncoding::Number { data_type, scale },
        }
    }

    pub const fn register_count(&self) -> u16 {
        self.encoding.register_count()
    }

    pub fn decode(&self, registers: &[u16]) -> Result<PointValue, ProtocolError> {
        match self.encoding {
            RegisterEncoding::Number { data_type, scale } => {
                parse_registers(registers, data_type).map(|raw| PointValue::Numeric(raw * scale))
            }
            RegisterEncoding::Label(labels) => {
                let code = *registers
                    .first()
                    .ok_or_else(|| ProtocolError::DataParse("empty registers".to_string()))?;
                let label = labels
                    .iter()
                    .find(|(value, _)| *value == code)
                    .map(|(_, label)| (*label).to_string())
                    .unwrap_or_else(|| format!("Unknown({code})"));
                Ok(PointValue::Text(label))
            }
            RegisterEncoding::Ascii { .. } => Ok(PointValue::Text(decode_ascii(registers))),
        }
    }
}

/// 设备状态码。
pub const MACHINE_STATUS_LABELS: &[(u16, &str)] = &[
    (0, "Stopped"),
    (1, "Running"),
    (2, "Idle"),
    (3, "Fault"),
    (4, "Maintenance"),
];

/// 灌装线 PLC 寄存器表（与 `domain::FILLING_LINE_POINTS` 一一对应）。
pub const FILLING_LINE_REGISTERS: &[RegisterMapping] = &[
    RegisterMapping::number(
        "Process.FillVolume.Actual",
        RegisterKind::Input,
        0,
        ModbusDataType::Float32,
        1.0,
    ),
    RegisterMapping::number(
        "Process.FillVolume.Setpoint",
        RegisterKind::Holding,
        0,
        ModbusDataType::Float32,
        1.0,
    ),
    RegisterMapping::number(
        "Process.Temperature",
        RegisterKind::Input,
        2,
        ModbusDataType::Int16,
        0.1,
    ),
    RegisterMapping::number(
        "Process.Pressure",
        RegisterKind::Input,
        3,
        ModbusDataType::Uint16,
        0.01,
    ),
    RegisterMapping::number(
        "Machine.Speed.Actual",
        RegisterKind::Input,
        4,
        ModbusDataType::Uint16,
        1.0,
    ),
    RegisterMapping::number(
        "Machine.Speed.Setpoint",
        RegisterKind::Holding,
        2,
        ModbusDataType::Uint16,
        1.0,
    ),
    RegisterMapping {
        point: "Machine.Status",
        kind: RegisterKind::Input,
        address: 5,
        encoding: RegisterEncoding::Label(MACHINE_STATUS_LABELS),
    },
    RegisterMapping::number(
        "Production.GoodCount",
        RegisterKind::Input,
        6,
        ModbusDataType::Uint32,
        1.0,
    ),
    RegisterMapping::number(
        "Production.RejectCount",
        RegisterKind::Input,
        8,
        ModbusDataType::Uint32,
        1.0,
    ),
    RegisterMapping {
        point: "Production.Order",
        kind: RegisterKind::Holding,
        address: 10,
        encoding: RegisterEncoding::Ascii { registers: 8 },
    },
    RegisterMapping {
        point: "Production.Article",
        kind: RegisterKind::Holding,
        address: 18,
        encoding: RegisterEncoding::Ascii { registers: 8 },
    },
    RegisterMapping::number(
        "Alarm.ActiveCount",
        RegisterKind::Input,
        10,
        ModbusDataType::Uint16,
        1.0,
    ),
];

/// 寄存器表。
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    mappings: &'static [RegisterMapping],
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::new(FILLING_LINE_REGISTERS)
    }
}

impl RegisterMap {
    pub fn new(mappings: &'static [RegisterMapping]) -> Self {
        Self { mappings }
    }

    pub fn get(&self, point: &str) -> Option<&'static RegisterMapping> {
        self.mappings.iter().find(|mapping| mapping.point == point)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static RegisterMapping> + '_ {
        self.mappings.iter()
    }
}

/// 解析寄存器数据为浮点值（大端字序，高位寄存器在前）
pub fn parse_registers(registers: &[u16], data_type: ModbusDataType) -> Result<f64, ProtocolError> {
    let needed = data_type.register_count() as usize;
    if registers.len() < needed {
        return Err(ProtocolError::DataParse(format!(
            "need {needed} registers for {data_type:?}, got {}",
            registers.len()
        )));
    }
    let word = |index: usize| u32::from(registers[index]);
    let value = match data_type {
        ModbusDataType::Int16 => f64::from(registers[0] as i16),
        ModbusDataType::Uint16 => f64::from(registers[0]),
        ModbusDataType::Int32 => f64::from(((word(0) << 16) | word(1)) as i32),
        ModbusDataType::Uint32 => f64::from((word(0) << 16) | word(1)),
        ModbusDataType::Float32 => f64::from(f32::from_bits((word(0) << 16) | word(1))),
        ModbusDataType::Float64 => {
            let bits = registers[..4]
                .iter()
                .fold(0u64, |acc, register| (acc << 16) | u64::from(*register));
            f64::from_bits(bits)
        }
    };
    Ok(value)
}

/// ASCII 寄存器 → 文本；遇到 NUL 截止，去掉尾部空白。
pub fn decode_ascii(registers: &[u16]) -> String {
    let bytes: Vec<u8> = registers
        .iter()
        .flat_map(|register| register.to_be_bytes())
        .take_while(|byte| *byte != 0)
        .collect();
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::PointTable;

    #[test]
    fn parse_registers_int16() {
        assert_eq!(parse_registers(&[100], ModbusDataType::Int16).unwrap(), 100.0);
        assert_eq!(
            parse_registers(&[(-100i16) as u16], ModbusDataType::Int16).unwrap(),
            -100.0
        );
    }

    #[test]
    fn parse_registers_float32() {
        let bits = 1003.5f32.to_bits();
        let registers = [(bits >> 16) as u16, bits as u16];
        assert_eq!(
            parse_registers(&registers, ModbusDataType::Float32).unwrap(),
            1003.5
        );
    }

    #[test]
    fn parse_registers_rejects_short_input() {
        let err = parse_registers(&[1], ModbusDataType::Uint32).unwrap_err();
        assert!(matches!(err, ProtocolError::DataParse(_)));
    }

    #[test]
    fn scaled_temperature() {
        let mapping = RegisterMap::default()
            .get("Process.Temperature")
            .expect("mapping");
        assert_eq!(
            mapping.decode(&[215]).unwrap().as_f64().map(|v| (v * 10.0).round()),
            Some(215.0)
        );
    }

    #[test]
    fn status_label_and_unknown_code() {
        let mapping = RegisterMap::default().get("Machine.Status").expect("mapping");
        assert_eq!(mapping.decode(&[1]).unwrap(), PointValue::Text("Running".to_string()));
        assert_eq!(mapping.decode(&[42]).unwrap(), PointValue::Text("Unknown(42)".to_string()));
    }

    #[test]
    fn ascii_text_stops_at_nul() {
        let registers = [
            u16::from_be_bytes(*b"PO"),
            u16::from_be_bytes(*b"-1"),
            u16::from_be_bytes([b'7', 0]),
            0,
        ];
        assert_eq!(decode_ascii(&registers), "PO-17");
    }

    #[test]
    fn every_point_has_a_register() {
        let registers = RegisterMap::default();
        for point in PointTable::default().iter() {
            let mapping = registers.get(point.name).expect(point.name);
            let kind_matches = match mapping.encoding {
                RegisterEncoding::Number { .. } => point.kind == domain::ValueKind::Numeric,
                _ => point.kind == domain::ValueKind::Text,
            };
            assert!(kind_matches, "{} kind mismatch", point.name);
        }
    }
}
