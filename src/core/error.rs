//! 编排器错误类型与轮询结果
//!
//! 只有配置类与前置条件类错误会越过编排器的公共边界；轮询过程中的失败被吸收为 PollOutcome::Failed，
//! 并记录到 last_error / error_count。

use thiserror::Error;
use uuid::Uuid;

use crate::core::LifecycleState;
use crate::store::StoreError;

/// 编排器错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent {0} has no runner configuration")]
    MissingConfig(String),

    #[error("Invalid runner configuration for agent {agent_id}: {reason}")]
    InvalidConfig { agent_id: String, reason: String },

    #[error("Agent {agent_id} is already {state}")]
    AlreadyActive {
        agent_id: String,
        state: LifecycleState,
    },

    #[error("Agent {0} is not running")]
    NotRunning(String),

    #[error("Agent {0} is not paused")]
    NotPaused(String),

    #[error("Agent {0} was stopped while starting")]
    StoppedDuringStart(String),

    #[error("Unknown runner type: {0}")]
    RunnerResolution(String),

    #[error("Runner {runner} failed: {message}")]
    RunnerFailed { runner: String, message: String },

    #[error("Poll timed out after {0}ms")]
    PollTimeout(u64),

    #[error("Runner {0} panicked")]
    RunnerPanicked(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    /// 配置错误（Agent 不存在、缺少/非法 runner 配置）：对该次操作致命，不重试
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::AgentNotFound(_) | Self::MissingConfig(_) | Self::InvalidConfig { .. }
        )
    }

    /// 前置条件错误（状态不符）：调用方应先查询状态
    pub fn is_precondition_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyActive { .. }
                | Self::NotRunning(_)
                | Self::NotPaused(_)
                | Self::StoppedDuringStart(_)
        )
    }
}

/// 单次轮询的结果：失败是状态，不是异常
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded {
        task_id: Uuid,
        recommendations: usize,
        duration_ms: u64,
    },
    Failed {
        task_id: Uuid,
        error: String,
    },
    /// 记录已被移除或被新一代替换，本次结果丢弃
    Skipped,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
