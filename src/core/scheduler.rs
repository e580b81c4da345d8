//! 轮询调度：每个 Agent 一个周期定时器
//!
//! IntervalTimer 抽象「每隔 period 执行一次 tick」，默认实现为 tokio 任务 + CancellationToken。
//! 同一 Agent 的 tick 串行执行：上一次轮询（含失败处理）完成后才等待下一个 tick。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentRegistry, LifecycleState, OrchestratorError, PollExecutor, PollOutcome};
use crate::runner::PollTrigger;

/// 定时回调：每次 tick 生成一个新的 future
pub type TickFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 定时器句柄：cancel 后不再触发新的 tick；drop 时自动取消
#[derive(Debug)]
pub struct TimerHandle {
    period: Duration,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn new(period: Duration, token: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self {
            period,
            token,
            task,
        }
    }

    /// 布置时的间隔（配置后续变更不影响）
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 后台任务是否已退出（取消后，进行中的轮询完成才会退出）
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// 周期定时器抽象：首个 tick 立即触发，之后每隔 period 触发一次
pub trait IntervalTimer: Send + Sync {
    fn every(&self, period: Duration, tick: TickFn) -> TimerHandle;
}

/// 基于 tokio::time::interval 的默认实现（需在 tokio 运行时内调用）
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioIntervalTimer;

impl IntervalTimer for TokioIntervalTimer {
    fn every(&self, period: Duration, tick: TickFn) -> TimerHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let period = period.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 慢轮询不补发积压的 tick
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if child.is_cancelled() {
                    break;
                }
                tick().await;
            }
        });

        TimerHandle::new(period, token, Some(task))
    }
}

/// 轮询调度器：管理注册表记录与执行器之间的定时关系
pub struct PollScheduler {
    registry: Arc<AgentRegistry>,
    executor: Arc<PollExecutor>,
    timer: Arc<dyn IntervalTimer>,
}

impl PollScheduler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        executor: Arc<PollExecutor>,
        timer: Arc<dyn IntervalTimer>,
    ) -> Self {
        Self {
            registry,
            executor,
            timer,
        }
    }

    /// 取消已有定时器，立即轮询一次，然后按 poll_interval_ms 周期轮询
    ///
    /// 间隔取自当前配置；运行中修改配置不会影响已布置的定时器，需重新 schedule。
    /// 只在 starting / running 状态布置定时器，其它状态返回 Ok(false)；记录不存在返回 NotRunning。
    pub async fn schedule(&self, agent_id: &str) -> Result<bool, OrchestratorError> {
        let executor = Arc::clone(&self.executor);
        let timer = Arc::clone(&self.timer);

        self.registry
            .with_entry(agent_id, move |state| {
                state.cancel_timer();
                if !matches!(state.state, LifecycleState::Starting | LifecycleState::Running) {
                    tracing::debug!("Not arming poll loop for {} in state {}", state.agent_id, state.state);
                    return false;
                }

                let period = state.poll_interval();
                let epoch = state.epoch;
                let id = state.agent_id.clone();
                let tick: TickFn = Arc::new(move || {
                    let executor = Arc::clone(&executor);
                    let id = id.clone();
                    async move {
                        match executor.run_cycle(&id, epoch, PollTrigger::Scheduled).await {
                            PollOutcome::Succeeded { .. } => {}
                            PollOutcome::Failed { error, .. } => {
                                tracing::debug!("Scheduled poll for {} failed, retry on next tick: {}", id, error);
                            }
                            PollOutcome::Skipped => {
                                tracing::debug!("Scheduled poll for {} skipped (entry gone)", id);
                            }
                        }
                    }
                    .boxed()
                });

                state.timer = Some(timer.every(period, tick));
                state.next_poll_at =
                    Some(chrono::Utc::now().timestamp_millis() + period.as_millis() as i64);
                tracing::debug!("Armed poll loop for {} every {:?}", state.agent_id, period);
                true
            })
            .await
            .ok_or_else(|| OrchestratorError::NotRunning(agent_id.to_string()))
    }

    /// 停止定时器并清空句柄；幂等，返回是否确有定时器被取消
    pub async fn cancel(&self, agent_id: &str) -> bool {
        self.registry
            .with_entry(agent_id, |state| state.cancel_timer())
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_tick(count: Arc<AtomicUsize>, delay: Duration) -> TickFn {
        Arc::new(move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_first_tick_is_immediate() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = TokioIntervalTimer.every(
            Duration::from_secs(60),
            counting_tick(count.clone(), Duration::ZERO),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_periodic_ticks_and_cancel() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = TokioIntervalTimer.every(
            Duration::from_millis(20),
            counting_tick(count.clone(), Duration::ZERO),
        );
        tokio::time::sleep(Duration::from_millis(110)).await;
        handle.cancel();
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 ticks, got {seen}");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_slow_ticks_do_not_overlap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let tick: TickFn = {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            Arc::new(move || {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                .boxed()
            })
        };
        let handle = TokioIntervalTimer.every(Duration::from_millis(5), tick);
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.cancel();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    /// 只记录布置请求、不真正运行的定时器
    #[derive(Default)]
    struct RecordingTimer {
        armed: std::sync::Mutex<Vec<Duration>>,
    }

    impl IntervalTimer for RecordingTimer {
        fn every(&self, period: Duration, _tick: TickFn) -> TimerHandle {
            self.armed.lock().unwrap().push(period);
            TimerHandle::new(period, CancellationToken::new(), None)
        }
    }

    fn scheduler(registry: Arc<AgentRegistry>) -> (PollScheduler, Arc<RecordingTimer>) {
        let (events, _) = tokio::sync::broadcast::channel(4);
        let executor = Arc::new(PollExecutor::new(
            Arc::clone(&registry),
            Arc::new(crate::runner::RunnerRegistry::new()),
            Arc::new(crate::store::InMemoryRecommendationSink::new(4)),
            events,
        ));
        let timer = Arc::new(RecordingTimer::default());
        (PollScheduler::new(registry, executor, timer.clone()), timer)
    }

    fn entry(id: &str, state: LifecycleState) -> crate::core::AgentRuntimeState {
        crate::core::AgentRuntimeState::new(
            id,
            "slug",
            "org",
            crate::core::RunnerConfig::new("static").with_poll_interval_ms(250),
        )
        .with_state(state)
    }

    #[tokio::test]
    async fn test_schedule_arms_active_entry() {
        let registry = Arc::new(AgentRegistry::new());
        let (scheduler, timer) = scheduler(Arc::clone(&registry));
        registry.insert(entry("a1", LifecycleState::Starting)).await;

        assert!(scheduler.schedule("a1").await.unwrap());
        assert_eq!(*timer.armed.lock().unwrap(), vec![Duration::from_millis(250)]);
        let (armed, next) = registry
            .with_entry("a1", |s| (s.has_timer(), s.next_poll_at))
            .await
            .unwrap();
        assert!(armed);
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_schedule_does_not_arm_paused_entry() {
        let registry = Arc::new(AgentRegistry::new());
        let (scheduler, timer) = scheduler(Arc::clone(&registry));
        registry.insert(entry("a1", LifecycleState::Paused)).await;

        // pause 先于 schedule 落地时，不能再布置定时器
        assert!(!scheduler.schedule("a1").await.unwrap());
        assert!(timer.armed.lock().unwrap().is_empty());
        let (armed, next) = registry
            .with_entry("a1", |s| (s.has_timer(), s.next_poll_at))
            .await
            .unwrap();
        assert!(!armed);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_schedule_missing_entry() {
        let registry = Arc::new(AgentRegistry::new());
        let (scheduler, timer) = scheduler(registry);
        assert!(matches!(
            scheduler.schedule("ghost").await,
            Err(OrchestratorError::NotRunning(_))
        ));
        assert!(timer.armed.lock().unwrap().is_empty());
        assert!(!scheduler.cancel("ghost").await);
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = TokioIntervalTimer.every(
            Duration::from_millis(10),
            counting_tick(count.clone(), Duration::ZERO),
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
        drop(handle);
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }
}
