//! 核心编排层：运行时注册表、轮询调度、轮询执行、生命周期控制、优雅关闭

pub mod builder;
pub mod error;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use error::{OrchestratorError, PollOutcome};
pub use events::AgentEvent;
pub use executor::PollExecutor;
pub use orchestrator::{AmbientOrchestrator, OrchestratorSettings, StartupReport};
pub use registry::AgentRegistry;
pub use scheduler::{IntervalTimer, PollScheduler, TickFn, TimerHandle, TokioIntervalTimer};
pub use shutdown::{
    serve_until_shutdown, ShutdownHandle, ShutdownReason, ShutdownSequence, ShutdownStep,
    ShutdownSummary, StopAgents,
};
pub use state::{
    AgentRuntimeState, AgentStats, AgentStatus, LifecycleState, RunnerConfig, StatusStats,
    DEFAULT_POLL_INTERVAL_MS,
};
