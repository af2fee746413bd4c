//! 静态选主
//!
//! 单实例部署时使用，主节点身份由外部直接设置。

use async_trait::async_trait;
use invsync_common::Result;
use std::sync::atomic::{AtomicBool, Ordering};

use super::LeaderGate;

/// 由外部标志决定的选主实现
#[derive(Debug, Default)]
pub struct StaticLeaderGate {
    leader: AtomicBool,
}

impl StaticLeaderGate {
    /// 创建静态选主
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    /// 设置主节点标志
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderGate for StaticLeaderGate {
    async fn try_acquire(&self) -> Result<bool> {
        Ok(self.is_leader())
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}
