//! 运行时状态：每个 Agent 一份 AgentRuntimeState，由注册表独占持有
//!
//! 对外只暴露 AgentStatus 投影（轻量、可序列化），内部状态（定时器句柄、代次、轮询闸门）不外泄。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::scheduler::TimerHandle;

/// 未配置轮询间隔时的默认值（毫秒）
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runner 配置快照：runner 类型、跟踪标的、风险偏好、轮询间隔，以及 runner 自定义字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Runner 类型键（在 RunnerRegistry 中查找）
    pub runner: String,
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub risk_profile: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 其余 runner 自定义字段，原样透传
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl RunnerConfig {
    pub fn new(runner: impl Into<String>) -> Self {
        Self {
            runner: runner.into(),
            instruments: Vec::new(),
            risk_profile: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_instruments(mut self, instruments: Vec<String>) -> Self {
        self.instruments = instruments;
        self
    }

    pub fn with_risk_profile(mut self, profile: impl Into<String>) -> Self {
        self.risk_profile = Some(profile.into());
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 校验配置：runner 键非空、间隔大于 0；返回人类可读的原因
    pub fn validate(&self) -> Result<(), String> {
        if self.runner.trim().is_empty() {
            return Err("runner type is empty".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// 累计统计（平均耗时由 total / count 推导，不单独存储）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub poll_count: u64,
    pub recommendation_count: u64,
    pub error_count: u64,
    pub total_poll_duration_ms: u64,
}

impl AgentStats {
    pub fn avg_poll_duration_ms(&self) -> f64 {
        if self.poll_count == 0 {
            0.0
        } else {
            self.total_poll_duration_ms as f64 / self.poll_count as f64
        }
    }

    pub(crate) fn record_success(&mut self, recommendations: usize, duration_ms: u64) {
        self.poll_count += 1;
        self.recommendation_count += recommendations as u64;
        self.total_poll_duration_ms += duration_ms;
    }

    pub(crate) fn record_failure(&mut self) {
        self.error_count += 1;
    }
}

/// 单个 Agent 的运行时状态
///
/// 只能通过 [`AgentRegistry`](crate::core::AgentRegistry) 访问与修改；stop 时整条记录被移除，
/// 因此统计只在「停止后重新启动」时归零。
#[derive(Debug)]
pub struct AgentRuntimeState {
    pub agent_id: String,
    pub agent_slug: String,
    pub org_slug: String,
    pub config: RunnerConfig,
    pub state: LifecycleState,
    pub last_poll_at: Option<i64>,
    pub next_poll_at: Option<i64>,
    pub last_error: Option<String>,
    pub stats: AgentStats,
    /// 注册表插入时分配的代次；旧代次的轮询结果不会写入新记录
    pub(crate) epoch: u64,
    /// 仅在轮询循环运行期间存在，由 PollScheduler 独占管理
    pub(crate) timer: Option<TimerHandle>,
    /// 串行化同一 Agent 的轮询（定时触发与手动触发共用）
    pub(crate) poll_gate: Arc<Mutex<()>>,
}

impl AgentRuntimeState {
    pub fn new(
        agent_id: impl Into<String>,
        agent_slug: impl Into<String>,
        org_slug: impl Into<String>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_slug: agent_slug.into(),
            org_slug: org_slug.into(),
            config,
            state: LifecycleState::Starting,
            last_poll_at: None,
            next_poll_at: None,
            last_error: None,
            stats: AgentStats::default(),
            epoch: 0,
            timer: None,
            poll_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = state;
        self
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    /// 取消并丢弃当前定时器，返回是否确有定时器
    pub(crate) fn cancel_timer(&mut self) -> bool {
        self.next_poll_at = None;
        match self.timer.take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// 投影为对外状态
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            agent_id: self.agent_id.clone(),
            state: self.state,
            last_poll_at: self.last_poll_at,
            next_poll_at: self.next_poll_at,
            poll_interval_ms: self.config.poll_interval_ms,
            error: self.last_error.clone(),
            stats: StatusStats::from(&self.stats),
        }
    }
}

/// 对外状态快照（HTTP 层直接序列化）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub agent_id: String,
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_poll_at: Option<i64>,
    pub poll_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: StatusStats,
}

impl AgentStatus {
    /// 从未进入注册表的 Agent：合成的全零 stopped 状态
    pub fn stopped(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            state: LifecycleState::Stopped,
            last_poll_at: None,
            next_poll_at: None,
            poll_interval_ms: 0,
            error: None,
            stats: StatusStats::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusStats {
    pub poll_count: u64,
    pub recommendation_count: u64,
    pub error_count: u64,
    pub avg_poll_duration_ms: f64,
}

impl From<&AgentStats> for StatusStats {
    fn from(stats: &AgentStats) -> Self {
        Self {
            poll_count: stats.poll_count,
            recommendation_count: stats.recommendation_count,
            error_count: stats.error_count,
            avg_poll_duration_ms: stats.avg_poll_duration_ms(),
        }
    }
}
