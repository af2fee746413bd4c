//! 数据模型模块
//!
//! 该模块定义主机同步引擎使用的核心数据模型：CMDB 主机、本地主机库记录、
//! 监听事件与游标。

pub mod host;
pub mod event;
pub mod page;
