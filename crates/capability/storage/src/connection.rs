//! 数据库连接管理
//!
//! - connect_pool：建立 Postgres 连接池（最大 8 个连接）
//! - ensure_schema：建表（幂等）

use crate::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// 建立 Postgres 连接池
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

const SCHEMA: &[&str] = &[
    "create table if not exists metrics (\
         time timestamptz not null, \
         metric text not null, \
         line text not null, \
         value double precision, \
         text_value text, \
         production_order text, \
         article text, \
         machine_name text, \
         plant text)",
    "create index if not exists metrics_metric_time_idx on metrics (metric, time desc)",
    "create table if not exists consumer_offsets (\
         group_id text not null, \
         topic text not null, \
         partition integer not null, \
         \"offset\" bigint not null, \
         updated_at timestamptz not null default now(), \
         primary key (group_id, topic, partition))",
];

/// 创建落库所需的表（已存在时跳过）。
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
