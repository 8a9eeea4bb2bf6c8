//! 消费位点内存实现

use crate::error::StorageError;
use crate::traits::OffsetStore;
use domain::ConsumerPosition;
use std::collections::HashMap;
use std::sync::RwLock;

type PositionKey = (String, String, i32);

/// 消费位点内存存储；保留提交历史便于断言。
#[derive(Default)]
pub struct InMemoryOffsetStore {
    positions: RwLock<HashMap<PositionKey, ConsumerPosition>>,
    history: RwLock<Vec<ConsumerPosition>>,
}

impl InMemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部提交记录（按提交顺序）。
    pub fn history(&self) -> Vec<ConsumerPosition> {
        self.history
            .read()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn load(
        &self,
        group_id: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<ConsumerPosition>, StorageError> {
        let positions = self
            .positions
            .read()
            .map_err(|_| StorageError::new("offset store lock poisoned"))?;
        Ok(positions
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .cloned())
    }

    async fn commit(&self, position: &ConsumerPosition) -> Result<(), StorageError> {
        let key = (
            position.group_id.clone(),
            position.topic.clone(),
            position.partition,
        );
        self.positions
            .write()
            .map_err(|_| StorageError::new("offset store lock poisoned"))?
            .insert(key, position.clone());
        self.history
            .write()
            .map_err(|_| StorageError::new("offset store lock poisoned"))?
            .push(position.clone());
        Ok(())
    }
}
