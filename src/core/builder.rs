//! 编排器构建器：统一的初始化逻辑
//!
//! 注入 Agent 存储、Runner 注册表、推荐存储与定时器实现；未指定的部分使用内存版 / tokio 默认实现。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::core::{
    AgentRegistry, AmbientOrchestrator, IntervalTimer, OrchestratorSettings, PollExecutor,
    PollScheduler, TokioIntervalTimer,
};
use crate::runner::{Runner, RunnerRegistry, StaticRunner};
use crate::store::{AgentStore, InMemoryAgentStore, InMemoryRecommendationSink, RecommendationSink};

pub struct OrchestratorBuilder {
    store: Option<Arc<dyn AgentStore>>,
    sink: Option<Arc<dyn RecommendationSink>>,
    timer: Arc<dyn IntervalTimer>,
    runners: RunnerRegistry,
    settings: OrchestratorSettings,
    poll_timeout: Option<Duration>,
    event_buffer: usize,
    recommendation_history: usize,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            sink: None,
            timer: Arc::new(TokioIntervalTimer),
            runners: RunnerRegistry::new(),
            settings: OrchestratorSettings::default(),
            poll_timeout: None,
            event_buffer: 64,
            recommendation_history: 100,
        }
    }

    /// 从配置创建：[orchestrator] 段参数 + [[agents]] 预置到内存存储
    pub fn from_config(config: &AppConfig) -> Self {
        let section = &config.orchestrator;
        Self::new()
            .with_min_poll_interval_ms(section.min_poll_interval_ms)
            .with_poll_timeout(section.poll_timeout())
            .with_event_buffer(section.event_buffer)
            .with_recommendation_history(section.recommendation_history)
            .with_store(Arc::new(InMemoryAgentStore::from_records(
                config.agents.iter().cloned(),
            )))
    }

    pub fn with_store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecommendationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn IntervalTimer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_runner(mut self, runner: impl Runner + 'static) -> Self {
        self.runners.register(runner);
        self
    }

    pub fn with_runner_arc(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runners.register_arc(runner);
        self
    }

    /// 注册内置 Runner（static）
    pub fn with_builtin_runners(self) -> Self {
        self.with_runner(StaticRunner::default())
    }

    pub fn with_min_poll_interval_ms(mut self, ms: u64) -> Self {
        self.settings.min_poll_interval_ms = ms;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size.max(1);
        self
    }

    pub fn with_recommendation_history(mut self, batches: usize) -> Self {
        self.recommendation_history = batches;
        self
    }

    pub fn build(self) -> Arc<AmbientOrchestrator> {
        let registry = Arc::new(AgentRegistry::new());
        let runners = Arc::new(self.runners);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryAgentStore::new()));
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(InMemoryRecommendationSink::new(self.recommendation_history)));
        let (events, _) = broadcast::channel(self.event_buffer);

        let executor = Arc::new(
            PollExecutor::new(
                Arc::clone(&registry),
                Arc::clone(&runners),
                sink,
                events.clone(),
            )
            .with_poll_timeout(self.poll_timeout),
        );
        let scheduler = PollScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            self.timer,
        );

        tracing::debug!("Orchestrator built with runners {:?}", runners.runner_types());

        Arc::new(AmbientOrchestrator::new(
            registry,
            store,
            runners,
            executor,
            scheduler,
            events,
            self.settings,
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunnerConfig;
    use crate::store::AgentRecord;

    #[tokio::test]
    async fn test_build_from_config_seeds_store() {
        let mut config = AppConfig::default();
        config.orchestrator.min_poll_interval_ms = 10;
        config.agents.push(
            AgentRecord::new("a1", "watcher", "acme")
                .with_runner_config(RunnerConfig::new("static").with_poll_interval_ms(5)),
        );

        let orchestrator = OrchestratorBuilder::from_config(&config)
            .with_builtin_runners()
            .build();
        assert_eq!(orchestrator.runners().runner_types(), vec!["static"]);

        orchestrator.start_agent("a1").await.unwrap();
        // 低于下限的间隔被钳制
        assert_eq!(orchestrator.get_agent_status("a1").await.poll_interval_ms, 10);
        orchestrator.stop_all_agents().await;
    }
}
