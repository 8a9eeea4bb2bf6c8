//! Postgres 消费位点

use crate::error::StorageError;
use crate::traits::OffsetStore;
use domain::ConsumerPosition;
use sqlx::{PgPool, Row};

pub struct PgOffsetStore {
    pub pool: PgPool,
}

impl PgOffsetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OffsetStore for PgOffsetStore {
    async fn load(
        &self,
        group_id: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<ConsumerPosition>, StorageError> {
        let row = sqlx::query(
            "select \"offset\" from consumer_offsets \
             where group_id = $1 and topic = $2 and partition = $3",
        )
        .bind(group_id)
        .bind(topic)
        .bind(partition)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ConsumerPosition {
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            partition,
            offset: row.try_get("offset")?,
        }))
    }

    async fn commit(&self, position: &ConsumerPosition) -> Result<(), StorageError> {
        sqlx::query(
            "insert into consumer_offsets (group_id, topic, partition, \"offset\", updated_at) \
             values ($1, $2, $3, $4, now()) \
             on conflict (group_id, topic, partition) \
             do update set \"offset\" = excluded.\"offset\", updated_at = now()",
        )
        .bind(&position.group_id)
        .bind(&position.topic)
        .bind(position.partition)
        .bind(position.offset)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
