//! 轮询执行器：执行一次「轮询 + 记录」
//!
//! 所有失败（Runner 解析、执行、超时、panic、落库）都被吸收为 PollOutcome::Failed，
//! 写入 last_error / error_count，不改变生命周期状态，也不向调度器抛出。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::broadcast;

use crate::core::{AgentEvent, AgentRegistry, OrchestratorError, PollOutcome, RunnerConfig};
use crate::runner::{ExecutionContext, PollTrigger, RunnerInput, RunnerRegistry};
use crate::store::{RecommendationBatch, RecommendationSink};

/// 轮询开始时从注册表取出的只读快照
struct PollSnapshot {
    agent_id: String,
    agent_slug: String,
    org_slug: String,
    config: RunnerConfig,
}

pub struct PollExecutor {
    registry: Arc<AgentRegistry>,
    runners: Arc<RunnerRegistry>,
    sink: Arc<dyn RecommendationSink>,
    events: broadcast::Sender<AgentEvent>,
    poll_timeout: Option<Duration>,
}

impl PollExecutor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        runners: Arc<RunnerRegistry>,
        sink: Arc<dyn RecommendationSink>,
        events: broadcast::Sender<AgentEvent>,
    ) -> Self {
        Self {
            registry,
            runners,
            sink,
            events,
            poll_timeout: None,
        }
    }

    /// 单次轮询超时，超时记为失败
    pub fn with_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// 执行一次轮询并记录结果
    ///
    /// `epoch` 为发起方看到的记录代次；记录被移除或被新一代替换时返回 Skipped，结果不写回。
    pub async fn run_cycle(&self, agent_id: &str, epoch: u64, trigger: PollTrigger) -> PollOutcome {
        let gate = self
            .registry
            .with_entry(agent_id, |state| {
                (state.epoch == epoch).then(|| Arc::clone(&state.poll_gate))
            })
            .await
            .flatten();
        let Some(gate) = gate else {
            return PollOutcome::Skipped;
        };
        // 同一 Agent 的定时轮询与手动轮询互斥
        let _serial = gate.lock().await;

        let snapshot = self
            .registry
            .with_entry(agent_id, |state| {
                (state.epoch == epoch).then(|| PollSnapshot {
                    agent_id: state.agent_id.clone(),
                    agent_slug: state.agent_slug.clone(),
                    org_slug: state.org_slug.clone(),
                    config: state.config.clone(),
                })
            })
            .await
            .flatten();
        let Some(snapshot) = snapshot else {
            return PollOutcome::Skipped;
        };

        let started = Instant::now();
        let context = ExecutionContext::ambient(trigger);
        let task_id = context.task_id;
        tracing::debug!("Polling agent {} (task {}, {:?})", agent_id, task_id, trigger);

        let outcome = match self.poll(snapshot, context).await {
            Ok(recommendations) => PollOutcome::Succeeded {
                task_id,
                recommendations,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => {
                tracing::warn!("Poll for agent {} failed (task {}): {}", agent_id, task_id, e);
                PollOutcome::Failed {
                    task_id,
                    error: e.to_string(),
                }
            }
        };

        if !self.record(agent_id, epoch, &outcome).await {
            tracing::debug!("Agent {} left the registry during poll, result dropped", agent_id);
            return PollOutcome::Skipped;
        }
        self.publish(agent_id, trigger, &outcome);
        outcome
    }

    async fn poll(
        &self,
        snapshot: PollSnapshot,
        context: ExecutionContext,
    ) -> Result<usize, OrchestratorError> {
        let runner_type = snapshot.config.runner.clone();
        let runner = self.runners.resolve(&runner_type)?;
        let task_id = context.task_id;

        let input = RunnerInput {
            agent_id: snapshot.agent_id.clone(),
            agent_slug: snapshot.agent_slug,
            org_slug: snapshot.org_slug.clone(),
            config: snapshot.config,
            execution_context: context,
        };

        let execution = AssertUnwindSafe(runner.execute(input)).catch_unwind();
        let joined = match self.poll_timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .map_err(|_| OrchestratorError::PollTimeout(limit.as_millis() as u64))?,
            None => execution.await,
        };
        let output = joined
            .map_err(|_| OrchestratorError::RunnerPanicked(runner_type.clone()))?
            .map_err(|e| OrchestratorError::RunnerFailed {
                runner: runner_type,
                message: e.to_string(),
            })?;

        let count = output.recommendations.len();
        if count > 0 {
            self.sink
                .store(RecommendationBatch {
                    agent_id: snapshot.agent_id,
                    org_slug: snapshot.org_slug,
                    task_id,
                    produced_at: chrono::Utc::now().timestamp_millis(),
                    recommendations: output.recommendations,
                })
                .await?;
        }
        Ok(count)
    }

    /// 写回统计；代次不符或记录已不存在时返回 false
    async fn record(&self, agent_id: &str, epoch: u64, outcome: &PollOutcome) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        self.registry
            .with_entry(agent_id, |state| {
                if state.epoch != epoch {
                    return false;
                }
                match outcome {
                    PollOutcome::Succeeded {
                        recommendations,
                        duration_ms,
                        ..
                    } => {
                        state.stats.record_success(*recommendations, *duration_ms);
                        state.last_error = None;
                    }
                    PollOutcome::Failed { error, .. } => {
                        state.stats.record_failure();
                        state.last_error = Some(error.clone());
                    }
                    PollOutcome::Skipped => return false,
                }
                state.last_poll_at = Some(now);
                state.next_poll_at = state
                    .timer
                    .as_ref()
                    .map(|timer| now + timer.period().as_millis() as i64);
                true
            })
            .await
            .unwrap_or(false)
    }

    fn publish(&self, agent_id: &str, trigger: PollTrigger, outcome: &PollOutcome) {
        let event = match outcome {
            PollOutcome::Succeeded {
                task_id,
                recommendations,
                duration_ms,
            } => AgentEvent::PollSucceeded {
                agent_id: agent_id.to_string(),
                task_id: *task_id,
                trigger,
                recommendations: *recommendations,
                duration_ms: *duration_ms,
            },
            PollOutcome::Failed { task_id, error } => AgentEvent::PollFailed {
                agent_id: agent_id.to_string(),
                task_id: *task_id,
                trigger,
                error: error.clone(),
            },
            PollOutcome::Skipped => return,
        };
        // 没有订阅者时 send 返回 Err，忽略
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::core::{AgentRuntimeState, LifecycleState};
    use crate::runner::{Recommendation, Runner, RunnerError, RunnerOutput};
    use crate::store::InMemoryRecommendationSink;

    struct FixedRunner {
        per_poll: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Runner for FixedRunner {
        fn runner_type(&self) -> &str {
            "fixed"
        }

        async fn execute(&self, input: RunnerInput) -> Result<RunnerOutput, RunnerError> {
            assert!(input.execution_context.user_id.is_none());
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RunnerOutput::new(
                (0..self.per_poll).map(|_| Recommendation::new("hold")).collect(),
            ))
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl Runner for FailingRunner {
        fn runner_type(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _input: RunnerInput) -> Result<RunnerOutput, RunnerError> {
            Err(RunnerError::DataFetch("upstream 503".into()))
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl Runner for PanickingRunner {
        fn runner_type(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _input: RunnerInput) -> Result<RunnerOutput, RunnerError> {
            panic!("runner bug");
        }
    }

    struct SlowRunner;

    #[async_trait]
    impl Runner for SlowRunner {
        fn runner_type(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _input: RunnerInput) -> Result<RunnerOutput, RunnerError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(RunnerOutput::default())
        }
    }

    struct Fixture {
        registry: Arc<AgentRegistry>,
        sink: Arc<InMemoryRecommendationSink>,
        executor: PollExecutor,
        events: broadcast::Receiver<AgentEvent>,
    }

    fn fixture(poll_timeout: Option<Duration>) -> Fixture {
        let registry = Arc::new(AgentRegistry::new());
        let mut runners = RunnerRegistry::new();
        runners.register(FixedRunner {
            per_poll: 2,
            calls: AtomicUsize::new(0),
        });
        runners.register(FailingRunner);
        runners.register(PanickingRunner);
        runners.register(SlowRunner);
        let sink = Arc::new(InMemoryRecommendationSink::new(10));
        let (tx, rx) = broadcast::channel(16);
        let executor = PollExecutor::new(
            Arc::clone(&registry),
            Arc::new(runners),
            sink.clone(),
            tx,
        )
        .with_poll_timeout(poll_timeout);
        Fixture {
            registry,
            sink,
            executor,
            events: rx,
        }
    }

    async fn insert(registry: &AgentRegistry, id: &str, runner: &str) -> u64 {
        let state = AgentRuntimeState::new(id, "slug", "org", RunnerConfig::new(runner))
            .with_state(LifecycleState::Running);
        registry.insert(state).await
    }

    #[tokio::test]
    async fn test_successful_poll_updates_stats() {
        let mut fx = fixture(None);
        let epoch = insert(&fx.registry, "a1", "fixed").await;

        let outcome = fx.executor.run_cycle("a1", epoch, PollTrigger::Manual).await;
        assert!(outcome.is_success());

        let status = fx.registry.status("a1").await.unwrap();
        assert_eq!(status.stats.poll_count, 1);
        assert_eq!(status.stats.recommendation_count, 2);
        assert!(status.last_poll_at.is_some());
        assert!(status.error.is_none());
        assert_eq!(fx.sink.total_recommendations("a1").await, 2);

        match fx.events.recv().await.unwrap() {
            AgentEvent::PollSucceeded {
                recommendations,
                trigger,
                ..
            } => {
                assert_eq!(recommendations, 2);
                assert_eq!(trigger, PollTrigger::Manual);
            }
            other => panic!("Expected PollSucceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_is_recorded_not_raised() {
        let fx = fixture(None);
        let epoch = insert(&fx.registry, "a1", "failing").await;

        let outcome = fx.executor.run_cycle("a1", epoch, PollTrigger::Scheduled).await;
        assert!(outcome.is_failure());

        let status = fx.registry.status("a1").await.unwrap();
        assert_eq!(status.state, LifecycleState::Running);
        assert_eq!(status.stats.error_count, 1);
        assert_eq!(status.stats.poll_count, 0);
        assert!(status.error.unwrap().contains("upstream 503"));
        assert!(status.last_poll_at.is_some());
    }

    #[tokio::test]
    async fn test_success_clears_last_error() {
        let fx = fixture(None);
        let epoch = insert(&fx.registry, "a1", "failing").await;
        fx.executor.run_cycle("a1", epoch, PollTrigger::Scheduled).await;

        fx.registry
            .with_entry("a1", |s| s.config = RunnerConfig::new("fixed"))
            .await;
        fx.executor.run_cycle("a1", epoch, PollTrigger::Scheduled).await;

        let status = fx.registry.status("a1").await.unwrap();
        assert!(status.error.is_none());
        assert_eq!(status.stats.error_count, 1);
        assert_eq!(status.stats.poll_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_runner_is_poll_failure() {
        let fx = fixture(None);
        let epoch = insert(&fx.registry, "a1", "does-not-exist").await;

        match fx.executor.run_cycle("a1", epoch, PollTrigger::Scheduled).await {
            PollOutcome::Failed { error, .. } => assert!(error.contains("does-not-exist")),
            other => panic!("Expected Failed, got {:?}", other),
        }
        let status = fx.registry.status("a1").await.unwrap();
        assert_eq!(status.stats.error_count, 1);
        assert_eq!(status.state, LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_panicking_runner_is_poll_failure() {
        let fx = fixture(None);
        let epoch = insert(&fx.registry, "a1", "panicking").await;

        let outcome = fx.executor.run_cycle("a1", epoch, PollTrigger::Scheduled).await;
        assert!(outcome.is_failure());
        assert_eq!(fx.registry.status("a1").await.unwrap().stats.error_count, 1);
    }

    #[tokio::test]
    async fn test_poll_timeout() {
        let fx = fixture(Some(Duration::from_millis(20)));
        let epoch = insert(&fx.registry, "a1", "slow").await;

        match fx.executor.run_cycle("a1", epoch, PollTrigger::Scheduled).await {
            PollOutcome::Failed { error, .. } => assert!(error.contains("timed out")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_entry_is_skipped() {
        let fx = fixture(None);
        let outcome = fx.executor.run_cycle("ghost", 1, PollTrigger::Manual).await;
        assert_eq!(outcome, PollOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_stale_epoch_does_not_write() {
        let fx = fixture(None);
        let old_epoch = insert(&fx.registry, "a1", "fixed").await;
        insert(&fx.registry, "a1", "fixed").await;

        let outcome = fx.executor.run_cycle("a1", old_epoch, PollTrigger::Scheduled).await;
        assert_eq!(outcome, PollOutcome::Skipped);
        assert_eq!(fx.registry.status("a1").await.unwrap().stats.poll_count, 0);
    }

    #[tokio::test]
    async fn test_removed_mid_poll_is_dropped() {
        let fx = fixture(None);
        let epoch = insert(&fx.registry, "a1", "slow").await;
        let registry = Arc::clone(&fx.registry);

        let remover = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            registry.remove("a1").await
        });
        let outcome = fx.executor.run_cycle("a1", epoch, PollTrigger::Scheduled).await;
        assert!(remover.await.unwrap());
        assert_eq!(outcome, PollOutcome::Skipped);
        assert!(fx.registry.status("a1").await.is_none());
    }
}
