//! InvSync Common - 主机同步共享数据结构
//!
//! 该模块提供主机同步引擎各组件共享的数据结构与统一的错误处理机制。

pub mod models;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::event::*;
pub use models::host::*;
pub use models::page::*;
