//! Ambient - 长时轮询智能体编排器
//!
//! 入口：加载配置、初始化日志、构建编排器并拉起所有符合条件的 Agent，收到关闭信号后停止全部 Agent。
//! 用法：`ambient [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ambient::config::load_config;
use ambient::core::{
    serve_until_shutdown, OrchestratorBuilder, ShutdownHandle, ShutdownSequence, StopAgents,
};
use anyhow::Context;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    ambient::observability::init(&cfg.app.log_level);
    tracing::info!(
        "{} starting with {} configured agents",
        cfg.app.name.as_deref().unwrap_or("ambient"),
        cfg.agents.len()
    );

    let orchestrator = OrchestratorBuilder::from_config(&cfg)
        .with_builtin_runners()
        .build();

    if cfg.orchestrator.auto_start {
        let report = orchestrator
            .start_eligible_agents()
            .await
            .context("Failed to load eligible agents")?;
        for (agent_id, error) in &report.failed {
            tracing::warn!("Agent {} not started: {}", agent_id, error);
        }
    }

    // 轮询结果写日志
    let mut events = orchestrator.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(?event, "agent event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let sequence = ShutdownSequence::new(Duration::from_secs(cfg.orchestrator.shutdown_timeout_secs))
        .then(StopAgents::new(Arc::clone(&orchestrator)));
    let summary =
        serve_until_shutdown(ShutdownHandle::new(), std::future::pending::<()>(), sequence).await;
    if !summary.is_clean() {
        tracing::error!("Shutdown finished with failures: {:?}", summary.failed);
    }

    event_log.abort();
    Ok(())
}
