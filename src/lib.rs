//! Ambient - 长时轮询智能体编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行时注册表、轮询调度、轮询执行、生命周期控制、优雅关闭
//! - **observability**: 日志初始化
//! - **runner**: Runner 策略抽象与注册表
//! - **store**: Agent 记录存储与推荐结果落地

pub mod config;
pub mod core;
pub mod observability;
pub mod runner;
pub mod store;

pub use crate::core::{
    AgentEvent, AgentStatus, AmbientOrchestrator, LifecycleState, OrchestratorBuilder,
    OrchestratorError, PollOutcome, RunnerConfig,
};
