//! 编排器事件：生命周期变化与每次轮询结果，经 broadcast 推送给订阅者

use serde::Serialize;
use uuid::Uuid;

use crate::runner::PollTrigger;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Started { agent_id: String, poll_interval_ms: u64 },
    Stopped { agent_id: String },
    Paused { agent_id: String },
    Resumed { agent_id: String },
    /// 运行中替换了配置（新间隔在下次 schedule 时生效）
    ConfigUpdated { agent_id: String },
    PollSucceeded {
        agent_id: String,
        task_id: Uuid,
        trigger: PollTrigger,
        recommendations: usize,
        duration_ms: u64,
    },
    PollFailed {
        agent_id: String,
        task_id: Uuid,
        trigger: PollTrigger,
        error: String,
    },
}

impl AgentEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Started { agent_id, .. }
            | Self::Stopped { agent_id }
            | Self::Paused { agent_id }
            | Self::Resumed { agent_id }
            | Self::ConfigUpdated { agent_id }
            | Self::PollSucceeded { agent_id, .. }
            | Self::PollFailed { agent_id, .. } => agent_id,
        }
    }
}
