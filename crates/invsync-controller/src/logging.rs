//! 日志初始化
//!
//! `RUST_LOG` 环境变量优先于配置文件中的日志级别。

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// 初始化全局日志订阅器
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("无效的日志级别 {}: {}", config.level, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| anyhow!("初始化日志失败: {}", e))
}
