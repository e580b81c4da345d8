//! Agent 运行时注册表
//!
//! 按 agent_id 存放 AgentRuntimeState。外层 RwLock 只保护「查找 / 插入 / 删除」，
//! 每条记录各自持有一把 Mutex，修改某个 Agent 不会阻塞其它 Agent。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::core::{AgentRuntimeState, AgentStatus};

type Entry = Arc<Mutex<AgentRuntimeState>>;

/// 并发安全的 Agent 注册表（由编排器构造并显式注入调度器与执行器）
#[derive(Debug, Default)]
pub struct AgentRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    next_epoch: AtomicU64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 仅在不存在时插入，返回分配的代次；已存在则返回 None
    pub async fn insert_if_absent(&self, mut state: AgentRuntimeState) -> Option<u64> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&state.agent_id) {
            return None;
        }
        let epoch = self.allocate_epoch();
        state.epoch = epoch;
        entries.insert(state.agent_id.clone(), Arc::new(Mutex::new(state)));
        Some(epoch)
    }

    /// 插入或替换，返回新代次；被替换的旧记录会取消其定时器
    pub async fn insert(&self, mut state: AgentRuntimeState) -> u64 {
        let epoch = self.allocate_epoch();
        state.epoch = epoch;
        let previous = self
            .entries
            .write()
            .await
            .insert(state.agent_id.clone(), Arc::new(Mutex::new(state)));
        if let Some(previous) = previous {
            previous.lock().await.cancel_timer();
        }
        epoch
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        self.entries.read().await.contains_key(agent_id)
    }

    async fn entry(&self, agent_id: &str) -> Option<Entry> {
        self.entries.read().await.get(agent_id).cloned()
    }

    /// 独占访问单条记录；记录不存在时返回 None
    ///
    /// 闭包内不能 await，也不要把 `&mut AgentRuntimeState` 带出闭包。
    pub async fn with_entry<R>(
        &self,
        agent_id: &str,
        f: impl FnOnce(&mut AgentRuntimeState) -> R,
    ) -> Option<R> {
        let entry = self.entry(agent_id).await?;
        let mut state = entry.lock().await;
        Some(f(&mut state))
    }

    pub async fn status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.with_entry(agent_id, |state| state.status()).await
    }

    /// 移除记录，返回是否存在；移除时一并取消残留的定时器
    pub async fn remove(&self, agent_id: &str) -> bool {
        let removed = self.entries.write().await.remove(agent_id);
        match removed {
            Some(entry) => {
                entry.lock().await.cancel_timer();
                true
            }
            None => false,
        }
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
