//! 错误处理模块
//!
//! 该模块提供主机同步引擎的统一错误类型。CMDB 返回的业务错误保留错误码，
//! 以便 Watcher 区分"游标已失效"与普通的瞬时错误。

use std::io;
use thiserror::Error;

/// InvSync 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// CMDB 返回的业务错误
    #[error("CMDB 错误 (code: {code}): {message}")]
    Cmdb {
        /// 错误码
        code: i64,
        /// 错误信息
        message: String,
    },

    /// 访问 CMDB 时的网络错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 游标存储错误
    #[error("游标存储错误: {0}")]
    Checkpoint(String),

    /// 租约错误
    #[error("租约错误: {0}")]
    Lease(String),

    /// 主机库存储错误
    #[error("主机库错误: {0}")]
    Store(String),

    /// 选主错误
    #[error("选主错误: {0}")]
    Leader(String),

    /// 事件解析错误
    #[error("事件解析错误: {0}")]
    Decode(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}

/// InvSync 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 构造 CMDB 业务错误
    pub fn cmdb(code: i64, message: impl Into<String>) -> Self {
        Error::Cmdb {
            code,
            message: message.into(),
        }
    }

    /// 判断是否为"事件链节点不存在"，即游标指向的位置已被 CMDB 回收
    pub fn is_cursor_expired(&self, expired_codes: &[i64]) -> bool {
        match self {
            Error::Cmdb { code, message } => {
                expired_codes.contains(code) || message.contains("chain node")
            }
            _ => false,
        }
    }
}
