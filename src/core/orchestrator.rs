//! Ambient Agent 编排器：生命周期控制
//!
//! 对外提供 start / stop / pause / resume / trigger_poll_now / 状态查询，
//! 以及进程启动时批量拉起、关闭时批量停止的钩子。
//!
//! 状态机：
//! - start：记录不存在（或处于 error）→ starting → running
//! - pause：running → paused（保留记录与统计）
//! - resume：paused → running（立即轮询一次后按周期轮询）
//! - stop：任意 → 移除记录（不在注册表即 stopped）

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::{
    AgentEvent, AgentRegistry, AgentRuntimeState, AgentStatus, LifecycleState, OrchestratorError,
    PollExecutor, PollOutcome, PollScheduler, RunnerConfig,
};
use crate::runner::{PollTrigger, RunnerRegistry};
use crate::store::AgentStore;

/// 编排器运行参数（来自 [orchestrator] 配置段）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// 轮询间隔下限（毫秒），0 表示不钳制
    pub min_poll_interval_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_poll_interval_ms: 0,
        }
    }
}

/// 启动钩子的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    pub started: Vec<String>,
    /// (agent_id, 错误信息)
    pub failed: Vec<(String, String)>,
}

pub struct AmbientOrchestrator {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn AgentStore>,
    runners: Arc<RunnerRegistry>,
    executor: Arc<PollExecutor>,
    scheduler: PollScheduler,
    events: broadcast::Sender<AgentEvent>,
    settings: OrchestratorSettings,
}

impl AmbientOrchestrator {
    /// 一般通过 [`OrchestratorBuilder`](crate::core::OrchestratorBuilder) 构造
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn AgentStore>,
        runners: Arc<RunnerRegistry>,
        executor: Arc<PollExecutor>,
        scheduler: PollScheduler,
        events: broadcast::Sender<AgentEvent>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            store,
            runners,
            executor,
            scheduler,
            events,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn runners(&self) -> &Arc<RunnerRegistry> {
        &self.runners
    }

    /// 订阅生命周期与轮询事件
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    /// 校验并钳制轮询间隔
    fn prepare_config(&self, agent_id: &str, mut config: RunnerConfig) -> Result<RunnerConfig, OrchestratorError> {
        config
            .validate()
            .map_err(|reason| OrchestratorError::InvalidConfig {
                agent_id: agent_id.to_string(),
                reason,
            })?;
        let min = self.settings.min_poll_interval_ms;
        if config.poll_interval_ms < min {
            tracing::warn!(
                "Agent {} has poll interval {}ms below minimum, clamped to {}ms",
                agent_id,
                config.poll_interval_ms,
                min
            );
            config.poll_interval_ms = min;
        }
        Ok(config)
    }

    /// 启动失败时，若已有处于 error 的旧记录，把本次错误写入其 last_error
    async fn annotate_failure(&self, agent_id: &str, err: &OrchestratorError) {
        let message = err.to_string();
        self.registry
            .with_entry(agent_id, |state| {
                if state.state == LifecycleState::Error {
                    state.last_error = Some(message);
                }
            })
            .await;
    }

    /// 启动 Agent
    ///
    /// 记录不存在 → AgentNotFound；缺少 runner 配置 → MissingConfig（不创建记录）；
    /// 配置非法 → InvalidConfig（记录留在 error 态）。已在运行或暂停 → AlreadyActive。
    /// 启动过程中被并发 stop → StoppedDuringStart（记录已不存在，不发布 Started）。
    pub async fn start_agent(&self, agent_id: &str) -> Result<(), OrchestratorError> {
        let current = self.registry.with_entry(agent_id, |state| state.state).await;
        if let Some(state) = current {
            if state != LifecycleState::Error {
                return Err(OrchestratorError::AlreadyActive {
                    agent_id: agent_id.to_string(),
                    state,
                });
            }
        }
        let replacing_error = current.is_some();

        let record = match self.store.load_agent(agent_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let err = OrchestratorError::AgentNotFound(agent_id.to_string());
                self.annotate_failure(agent_id, &err).await;
                return Err(err);
            }
            Err(e) => {
                let err = OrchestratorError::from(e);
                self.annotate_failure(agent_id, &err).await;
                return Err(err);
            }
        };

        let Some(raw_config) = record.metadata.runner_config.clone() else {
            let err = OrchestratorError::MissingConfig(agent_id.to_string());
            self.annotate_failure(agent_id, &err).await;
            return Err(err);
        };

        let config = match self.prepare_config(agent_id, raw_config.clone()) {
            Ok(config) => config,
            Err(err) => {
                let mut failed =
                    AgentRuntimeState::new(agent_id, &record.slug, &record.org_slug, raw_config)
                        .with_state(LifecycleState::Error);
                failed.last_error = Some(err.to_string());
                if replacing_error {
                    self.registry.insert(failed).await;
                } else {
                    self.registry.insert_if_absent(failed).await;
                }
                tracing::error!("Agent {} failed to start: {}", agent_id, err);
                return Err(err);
            }
        };

        if !self.runners.contains(&config.runner) {
            tracing::warn!(
                "Agent {} uses unknown runner '{}', polls will fail until it is registered",
                agent_id,
                config.runner
            );
        }

        let interval_ms = config.poll_interval_ms;
        let state = AgentRuntimeState::new(agent_id, &record.slug, &record.org_slug, config);
        if replacing_error {
            self.registry.insert(state).await;
        } else if self.registry.insert_if_absent(state).await.is_none() {
            // 并发的另一次 start 抢先插入
            let state = self
                .registry
                .with_entry(agent_id, |state| state.state)
                .await
                .unwrap_or(LifecycleState::Starting);
            return Err(OrchestratorError::AlreadyActive {
                agent_id: agent_id.to_string(),
                state,
            });
        }
        // 插入之后被并发 stop 移除
        match self.scheduler.schedule(agent_id).await {
            Ok(_) => {}
            Err(OrchestratorError::NotRunning(_)) => {
                tracing::info!("Agent {} was stopped before its poll loop was armed", agent_id);
                return Err(OrchestratorError::StoppedDuringStart(agent_id.to_string()));
            }
            Err(e) => return Err(e),
        }
        // 期间被 pause 的话保持 paused（schedule 不会为 paused 记录布置定时器）
        let promoted = self
            .registry
            .with_entry(agent_id, |state| {
                if state.state == LifecycleState::Starting {
                    state.state = LifecycleState::Running;
                }
                state.state
            })
            .await;
        if matches!(
            promoted,
            None | Some(LifecycleState::Stopping | LifecycleState::Stopped)
        ) {
            tracing::info!("Agent {} was stopped while starting", agent_id);
            return Err(OrchestratorError::StoppedDuringStart(agent_id.to_string()));
        }

        tracing::info!("Agent {} ({}) started, polling every {}ms", agent_id, record.slug, interval_ms);
        self.publish(AgentEvent::Started {
            agent_id: agent_id.to_string(),
            poll_interval_ms: interval_ms,
        });
        Ok(())
    }

    /// 停止 Agent 并移除记录；不在注册表中时为空操作
    pub async fn stop_agent(&self, agent_id: &str) -> Result<(), OrchestratorError> {
        let present = self
            .registry
            .with_entry(agent_id, |state| state.state = LifecycleState::Stopping)
            .await
            .is_some();
        if !present {
            tracing::debug!("Stop requested for agent {} which is not registered", agent_id);
            return Ok(());
        }

        self.scheduler.cancel(agent_id).await;
        self.registry
            .with_entry(agent_id, |state| state.state = LifecycleState::Stopped)
            .await;
        self.registry.remove(agent_id).await;

        tracing::info!("Agent {} stopped", agent_id);
        self.publish(AgentEvent::Stopped {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// 暂停：取消定时器，保留记录与统计
    pub async fn pause_agent(&self, agent_id: &str) -> Result<(), OrchestratorError> {
        let paused = self
            .registry
            .with_entry(agent_id, |state| {
                if !matches!(state.state, LifecycleState::Running | LifecycleState::Starting) {
                    return false;
                }
                state.cancel_timer();
                state.state = LifecycleState::Paused;
                true
            })
            .await
            .unwrap_or(false);
        if !paused {
            return Err(OrchestratorError::NotRunning(agent_id.to_string()));
        }

        tracing::info!("Agent {} paused", agent_id);
        self.publish(AgentEvent::Paused {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// 恢复：先切回 running，再重新布置定时器（立即轮询一次）
    ///
    /// 两步之间若被再次 pause，schedule 不会布置定时器；若被 stop，视为恢复后立即停止。
    pub async fn resume_agent(&self, agent_id: &str) -> Result<(), OrchestratorError> {
        let resumed = self
            .registry
            .with_entry(agent_id, |state| {
                if state.state != LifecycleState::Paused {
                    return false;
                }
                state.state = LifecycleState::Running;
                true
            })
            .await
            .unwrap_or(false);
        if !resumed {
            return Err(OrchestratorError::NotPaused(agent_id.to_string()));
        }

        match self.scheduler.schedule(agent_id).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Agent {} paused again before its poll loop was re-armed", agent_id),
            Err(_) => {
                tracing::debug!("Agent {} stopped while resuming", agent_id);
                return Ok(());
            }
        }

        tracing::info!("Agent {} resumed", agent_id);
        self.publish(AgentEvent::Resumed {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// 立即轮询一次并等待完成
    ///
    /// 轮询失败不会作为 Err 返回：结果以 PollOutcome 交给调用方，同时记入 last_error / error_count，
    /// Agent 保持运行。
    pub async fn trigger_poll_now(&self, agent_id: &str) -> Result<PollOutcome, OrchestratorError> {
        let epoch = self
            .registry
            .with_entry(agent_id, |state| {
                (state.state == LifecycleState::Running).then_some(state.epoch)
            })
            .await
            .flatten()
            .ok_or_else(|| OrchestratorError::NotRunning(agent_id.to_string()))?;

        tracing::info!("Manual poll requested for agent {}", agent_id);
        Ok(self
            .executor
            .run_cycle(agent_id, epoch, PollTrigger::Manual)
            .await)
    }

    /// 替换运行时配置；已布置的定时器不受影响，新间隔在下次 schedule（resume / 重启）时生效
    pub async fn update_agent_config(
        &self,
        agent_id: &str,
        config: RunnerConfig,
    ) -> Result<(), OrchestratorError> {
        let config = self.prepare_config(agent_id, config)?;
        self.registry
            .with_entry(agent_id, |state| state.config = config)
            .await
            .ok_or_else(|| OrchestratorError::NotRunning(agent_id.to_string()))?;

        tracing::info!("Agent {} configuration updated", agent_id);
        self.publish(AgentEvent::ConfigUpdated {
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// 查询状态；未注册的 Agent 返回合成的 stopped 状态
    pub async fn get_agent_status(&self, agent_id: &str) -> AgentStatus {
        self.registry
            .status(agent_id)
            .await
            .unwrap_or_else(|| AgentStatus::stopped(agent_id))
    }

    pub async fn get_all_agent_statuses(&self) -> Vec<AgentStatus> {
        let mut statuses = Vec::new();
        for agent_id in self.registry.agent_ids().await {
            // 遍历期间可能被 stop 移除，跳过即可
            if let Some(status) = self.registry.status(&agent_id).await {
                statuses.push(status);
            }
        }
        statuses
    }

    /// 进程启动钩子：拉起所有符合条件的 Agent，单个失败不影响其它
    pub async fn start_eligible_agents(&self) -> Result<StartupReport, OrchestratorError> {
        let agents = self.store.load_eligible_agents().await?;
        tracing::info!("Starting {} eligible ambient agents", agents.len());

        let mut report = StartupReport::default();
        for agent in agents {
            match self.start_agent(&agent.id).await {
                Ok(()) => report.started.push(agent.id),
                Err(e) => {
                    tracing::error!("Failed to start agent {} ({}): {}", agent.id, agent.slug, e);
                    report.failed.push((agent.id, e.to_string()));
                }
            }
        }

        tracing::info!(
            "Startup complete: {} started, {} failed",
            report.started.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// 进程关闭钩子：停止全部 Agent，返回成功停止的数量
    pub async fn stop_all_agents(&self) -> usize {
        let agent_ids = self.registry.agent_ids().await;
        tracing::info!("Stopping {} ambient agents", agent_ids.len());

        let mut stopped = 0;
        for agent_id in agent_ids {
            match self.stop_agent(&agent_id).await {
                Ok(()) => stopped += 1,
                Err(e) => tracing::error!("Failed to stop agent {}: {}", agent_id, e),
            }
        }
        stopped
    }
}
