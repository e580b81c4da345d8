//! Runner 策略抽象
//!
//! 每次轮询调用一次 Runner：输入 Agent 身份、配置与执行上下文，输出零或多条推荐。
//! Runner 按 config.runner 键在 RunnerRegistry 中查找（见 registry.rs）。

pub mod registry;
pub mod static_runner;

pub use registry::RunnerRegistry;
pub use static_runner::StaticRunner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::RunnerConfig;

/// 本次轮询由谁触发
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollTrigger {
    /// 定时器触发
    Scheduled,
    /// triggerPollNow 手动触发
    Manual,
}

/// 执行上下文：每次轮询新生成 task_id；Ambient Agent 无人值守，没有 user_id
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub user_id: Option<String>,
    pub trigger: PollTrigger,
}

impl ExecutionContext {
    pub fn ambient(trigger: PollTrigger) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            user_id: None,
            trigger,
        }
    }
}

/// Runner 输入
#[derive(Debug, Clone, Serialize)]
pub struct RunnerInput {
    pub agent_id: String,
    pub agent_slug: String,
    pub org_slug: String,
    pub config: RunnerConfig,
    pub execution_context: ExecutionContext,
}

/// 单条推荐
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default)]
    pub instrument: Option<String>,
    pub action: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Recommendation {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            instrument: None,
            action: action.into(),
            confidence: None,
            rationale: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn for_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Runner 输出
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerOutput {
    pub recommendations: Vec<Recommendation>,
}

impl RunnerOutput {
    pub fn new(recommendations: Vec<Recommendation>) -> Self {
        Self { recommendations }
    }
}

/// Runner 执行失败
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Data fetch failed: {0}")]
    DataFetch(String),

    #[error("Invalid runner input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Runner trait：类型键 + 单次轮询
#[async_trait]
pub trait Runner: Send + Sync {
    /// 类型键（对应配置中的 runner 字段）
    fn runner_type(&self) -> &str;

    /// 执行一次轮询
    async fn execute(&self, input: RunnerInput) -> Result<RunnerOutput, RunnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambient_context_has_no_user() {
        let a = ExecutionContext::ambient(PollTrigger::Scheduled);
        let b = ExecutionContext::ambient(PollTrigger::Scheduled);
        assert!(a.user_id.is_none());
        assert_ne!(a.task_id, b.task_id);
    }

    #[test]
    fn test_recommendation_builder() {
        let rec = Recommendation::new("buy")
            .for_instrument("BTC")
            .with_confidence(0.8)
            .with_rationale("momentum");
        assert_eq!(rec.instrument.as_deref(), Some("BTC"));
        assert_eq!(rec.confidence, Some(0.8));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["action"], "buy");
    }
}
