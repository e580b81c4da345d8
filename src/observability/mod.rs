//! 可观测性：tracing 日志初始化
//!
//! 默认级别来自配置 [app].log_level，RUST_LOG 存在时以其为准。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"))
    });
    // 重复初始化（如测试中）时忽略错误
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
