//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM（或代码内主动请求）后，按注册顺序执行关闭步骤，每步有独立超时。
//! 停止 Agent 的步骤会取消全部定时器：进行中的轮询可以完成，但不会再有新的 tick。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::AmbientOrchestrator;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// 代码内主动请求
    Requested(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::Terminate => write!(f, "terminate"),
            Self::Requested(why) => write!(f, "requested: {}", why),
        }
    }
}

/// 关闭句柄：可克隆，第一次 trigger 的原因生效
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    reason: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(reason),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self, reason: ShutdownReason) {
        let first = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });
        if first {
            tracing::info!("Shutdown triggered ({})", reason);
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.borrow().clone()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// 后台监听系统信号，收到后 trigger
    pub fn listen_for_signals(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.triggered() => {}
                reason = wait_for_signal() => handle.trigger(reason),
            }
        });
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() -> ShutdownReason {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownReason::Interrupt,
                _ = sigterm.recv() => ShutdownReason::Terminate,
            },
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                ShutdownReason::Interrupt
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        ShutdownReason::Interrupt
    }
}

/// 关闭步骤
#[async_trait::async_trait]
pub trait ShutdownStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// 关闭结果：成功的步骤名、失败（含超时）的步骤名与原因
#[derive(Debug, Default, Clone)]
pub struct ShutdownSummary {
    pub completed: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl ShutdownSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 按顺序执行关闭步骤；某一步失败或超时只记录，继续后续步骤
pub struct ShutdownSequence {
    steps: Vec<Box<dyn ShutdownStep>>,
    step_timeout: Duration,
}

impl ShutdownSequence {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            step_timeout,
        }
    }

    pub fn then(mut self, step: impl ShutdownStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub async fn run(&self) -> ShutdownSummary {
        let mut summary = ShutdownSummary::default();
        for step in &self.steps {
            let name = step.name();
            match tokio::time::timeout(self.step_timeout, step.run()).await {
                Ok(Ok(())) => {
                    tracing::info!("Shutdown step '{}' done", name);
                    summary.completed.push(name);
                }
                Ok(Err(e)) => {
                    tracing::error!("Shutdown step '{}' failed: {}", name, e);
                    summary.failed.push((name, e.to_string()));
                }
                Err(_) => {
                    tracing::error!("Shutdown step '{}' timed out after {:?}", name, self.step_timeout);
                    summary
                        .failed
                        .push((name, format!("timed out after {:?}", self.step_timeout)));
                }
            }
        }
        summary
    }
}

/// 停止全部 Ambient Agent
pub struct StopAgents {
    orchestrator: Arc<AmbientOrchestrator>,
}

impl StopAgents {
    pub fn new(orchestrator: Arc<AmbientOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait::async_trait]
impl ShutdownStep for StopAgents {
    fn name(&self) -> &'static str {
        "stop-agents"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let stopped = self.orchestrator.stop_all_agents().await;
        tracing::info!("Stopped {} ambient agents", stopped);
        let remaining = self.orchestrator.registry().len().await;
        if remaining > 0 {
            anyhow::bail!("{} agents still registered", remaining);
        }
        Ok(())
    }
}

/// 运行 `app` 直到其结束或触发关闭，然后执行关闭步骤
pub async fn serve_until_shutdown<F>(
    handle: ShutdownHandle,
    app: F,
    sequence: ShutdownSequence,
) -> ShutdownSummary
where
    F: Future<Output = ()>,
{
    handle.listen_for_signals();

    tokio::select! {
        _ = app => tracing::info!("Application finished"),
        _ = handle.triggered() => {}
    }

    sequence.run().await
}
