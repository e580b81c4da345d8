//! 推荐结果落地
//!
//! 每次成功轮询产出的推荐打包为一个 RecommendationBatch 交给 RecommendationSink。

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::runner::Recommendation;
use crate::store::StoreError;

/// 单次轮询产出的一批推荐
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationBatch {
    pub agent_id: String,
    pub org_slug: String,
    pub task_id: Uuid,
    /// 产出时间（毫秒时间戳）
    pub produced_at: i64,
    pub recommendations: Vec<Recommendation>,
}

#[async_trait]
pub trait RecommendationSink: Send + Sync {
    async fn store(&self, batch: RecommendationBatch) -> Result<(), StoreError>;
}

/// 内存版：每个 Agent 只保留最近 capacity 批
#[derive(Debug)]
pub struct InMemoryRecommendationSink {
    capacity: usize,
    batches: RwLock<HashMap<String, VecDeque<RecommendationBatch>>>,
}

impl InMemoryRecommendationSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            batches: RwLock::new(HashMap::new()),
        }
    }

    /// 某个 Agent 最近的批次（旧 → 新）
    pub async fn recent(&self, agent_id: &str) -> Vec<RecommendationBatch> {
        self.batches
            .read()
            .await
            .get(agent_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn total_recommendations(&self, agent_id: &str) -> usize {
        self.batches
            .read()
            .await
            .get(agent_id)
            .map(|q| q.iter().map(|b| b.recommendations.len()).sum())
            .unwrap_or(0)
    }
}

impl Default for InMemoryRecommendationSink {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl RecommendationSink for InMemoryRecommendationSink {
    async fn store(&self, batch: RecommendationBatch) -> Result<(), StoreError> {
        let mut batches = self.batches.write().await;
        let queue = batches.entry(batch.agent_id.clone()).or_default();
        queue.push_back(batch);
        while queue.len() > self.capacity {
            queue.pop_front();
        }
        Ok(())
    }
}
