//! 静态点位表
//!
//! 显式声明数据源对外暴露的点位（名称 → 值类型、访问策略），
//! 订阅管理器据此校验订阅请求并把传输层标识解析回符号名。

use crate::data::{PointId, ValueKind};

/// 点位访问策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    ReadWrite,
}

/// 单个点位声明。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointDefinition {
    pub namespace: u16,
    pub name: &'static str,
    pub kind: ValueKind,
    pub access: AccessLevel,
}

impl PointDefinition {
    pub const fn numeric(name: &'static str) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE,
            name,
            kind: ValueKind::Numeric,
            access: AccessLevel::Read,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE,
            name,
            kind: ValueKind::Text,
            access: AccessLevel::Read,
        }
    }

    pub const fn writable(mut self) -> Self {
        self.access = AccessLevel::ReadWrite;
        self
    }

    pub fn id(&self) -> PointId {
        PointId::new(self.namespace, self.name)
    }
}

pub const DEFAULT_NAMESPACE: u16 = 2;

/// 灌装线点位。
pub const FILLING_LINE_POINTS: &[PointDefinition] = &[
    PointDefinition::numeric("Process.FillVolume.Actual"),
    PointDefinition::numeric("Process.FillVolume.Setpoint").writable(),
    PointDefinition::numeric("Process.Temperature"),
    PointDefinition::numeric("Process.Pressure"),
    PointDefinition::numeric("Machine.Speed.Actual"),
    PointDefinition::numeric("Machine.Speed.Setpoint").writable(),
    PointDefinition::text("Machine.Status"),
    PointDefinition::numeric("Production.GoodCount"),
    PointDefinition::numeric("Production.RejectCount"),
    PointDefinition::text("Production.Order"),
    PointDefinition::text("Production.Article"),
    PointDefinition::numeric("Alarm.ActiveCount"),
];

/// 点位表。
#[derive(Debug, Clone, Copy)]
pub struct PointTable {
    points: &'static [PointDefinition],
}

impl Default for PointTable {
    fn default() -> Self {
        Self::new(FILLING_LINE_POINTS)
    }
}

impl PointTable {
    pub fn new(points: &'static [PointDefinition]) -> Self {
        Self { points }
    }

    pub fn get(&self, name: &str) -> Option<&'static PointDefinition> {
        self.points.iter().find(|point| point.name == name)
    }

    /// 传输层标识 → 点位声明。
    pub fn resolve_wire_id(&self, wire_id: &str) -> Option<&'static PointDefinition> {
        self.points
            .iter()
            .find(|point| point.id().wire_id() == wire_id)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.points.iter().map(|point| point.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static PointDefinition> + '_ {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
