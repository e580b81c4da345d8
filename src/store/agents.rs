//! Agent 记录存储
//!
//! 编排器只需要两种查询：按 ID 加载、启动时加载全部符合条件的 Agent。
//! 内存实现可由配置文件 [[agents]] 预置。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::RunnerConfig;
use crate::store::StoreError;

/// 由编排器托管的 Agent 类型
pub const AMBIENT_AGENT_TYPE: &str = "ambient";

/// Agent 记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub slug: String,
    pub org_slug: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub metadata: AgentMetadata,
}

fn default_agent_type() -> String {
    AMBIENT_AGENT_TYPE.to_string()
}

fn default_active() -> bool {
    true
}

/// Agent 元数据：runner_config 缺失时无法启动
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetadata {
    #[serde(default)]
    pub runner_config: Option<RunnerConfig>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentRecord {
    pub fn new(id: impl Into<String>, slug: impl Into<String>, org_slug: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slug: slug.into(),
            org_slug: org_slug.into(),
            agent_type: default_agent_type(),
            active: true,
            metadata: AgentMetadata::default(),
        }
    }

    pub fn with_runner_config(mut self, config: RunnerConfig) -> Self {
        self.metadata.runner_config = Some(config);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    /// 启动时是否应被自动拉起
    pub fn is_eligible(&self) -> bool {
        self.active && self.agent_type == AMBIENT_AGENT_TYPE
    }
}

/// Agent 记录存储 trait
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// 按 ID 加载；不存在返回 Ok(None)
    async fn load_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError>;

    /// 加载所有应在进程启动时自动拉起的 Agent
    async fn load_eligible_agents(&self) -> Result<Vec<AgentRecord>, StoreError>;
}

/// 内存版 Agent 存储
#[derive(Debug, Default)]
pub struct InMemoryAgentStore {
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = AgentRecord>) -> Self {
        let agents = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            agents: RwLock::new(agents),
        }
    }

    pub async fn upsert(&self, record: AgentRecord) {
        self.agents.write().await.insert(record.id.clone(), record);
    }

    pub async fn remove(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.write().await.remove(agent_id)
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn load_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }

    async fn load_eligible_agents(&self) -> Result<Vec<AgentRecord>, StoreError> {
        let mut eligible: Vec<AgentRecord> = self
            .agents
            .read()
            .await
            .values()
            .filter(|record| record.is_eligible())
            .cloned()
            .collect();
        eligible.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_agent() {
        let store = InMemoryAgentStore::from_records(vec![AgentRecord::new("a1", "s1", "org")]);
        assert!(store.load_agent("a1").await.unwrap().is_some());
        assert!(store.load_agent("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eligibility_filter() {
        let store = InMemoryAgentStore::from_records(vec![
            AgentRecord::new("b", "s", "org"),
            AgentRecord::new("a", "s", "org"),
            AgentRecord::new("inactive", "s", "org").with_active(false),
            AgentRecord::new("chat", "s", "org").with_agent_type("conversational"),
        ]);
        let ids: Vec<String> = store
            .load_eligible_agents()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_record_deserialize_defaults() {
        let record: AgentRecord = serde_json::from_value(serde_json::json!({
            "id": "a1",
            "slug": "watcher",
            "org_slug": "acme",
            "metadata": { "runner_config": { "runner": "static" }, "owner": "ops" }
        }))
        .unwrap();
        assert!(record.is_eligible());
        assert_eq!(record.metadata.runner_config.unwrap().runner, "static");
        assert_eq!(record.metadata.extra["owner"], "ops");
    }
}
