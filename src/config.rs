//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AMBIENT__*` 覆盖（双下划线表示嵌套，如 `AMBIENT__ORCHESTRATOR__AUTO_START=false`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::store::AgentRecord;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    /// 内存 Agent 存储的初始记录（[[agents]]）
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
}

/// [app] 段：应用名、日志级别
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 默认日志级别，RUST_LOG 优先
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [orchestrator] 段：启动策略、轮询间隔下限、单次轮询超时、关闭超时
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 进程启动时是否自动拉起所有符合条件的 Agent
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    /// 轮询间隔下限（毫秒），低于此值会被钳制；0 表示不设下限
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,
    /// 单次轮询超时（毫秒），未设置则不限
    #[serde(default)]
    pub poll_timeout_ms: Option<u64>,
    /// 事件广播缓冲区大小
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// 关闭时等待清理完成的超时（秒）
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// 内存推荐存储中每个 Agent 保留的批次数
    #[serde(default = "default_recommendation_history")]
    pub recommendation_history: usize,
}

fn default_auto_start() -> bool {
    true
}

fn default_min_poll_interval_ms() -> u64 {
    0
}

fn default_event_buffer() -> usize {
    64
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_recommendation_history() -> usize {
    100
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            auto_start: default_auto_start(),
            min_poll_interval_ms: default_min_poll_interval_ms(),
            poll_timeout_ms: None,
            event_buffer: default_event_buffer(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            recommendation_history: default_recommendation_history(),
        }
    }
}

impl OrchestratorSection {
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// 从 config 目录加载配置，环境变量 AMBIENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AMBIENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, skipped", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AMBIENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
