//! 外部存储协作者
//!
//! - **agents**: Agent 记录存储（加载单个 Agent、启动时加载全部符合条件的 Agent）
//! - **recommendations**: 推荐结果落地（内存版；启用 async-sqlite 时另有 SQLite 版）

pub mod agents;
pub mod recommendations;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

pub use agents::{AgentMetadata, AgentRecord, AgentStore, InMemoryAgentStore, AMBIENT_AGENT_TYPE};
pub use recommendations::{InMemoryRecommendationSink, RecommendationBatch, RecommendationSink};
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteRecommendationSink;

use thiserror::Error;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "async-sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
}
