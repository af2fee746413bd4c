//! 主机同步模块
//!
//! 增量同步（事件监听）与全量对账是两条相互独立的链路，
//! 最终都通过差异计算和主机库写入器落地：
//!
//! ```text
//! EventWatcher(host)          ─┐
//! EventWatcher(host_relation) ─┼─> diff ─> InventoryApplier ─> InventoryStore
//! FullSync (按业务周期执行)     ─┘
//! ```

pub mod applier;
pub mod diff;
pub mod full_sync;
pub mod scope;
pub mod watcher;

pub use applier::{ApplyStats, InventoryApplier};
pub use diff::{diff, DiffPlan};
pub use full_sync::{FullSync, FullSyncReport};
pub use scope::ScopeFilter;
pub use watcher::{EventWatcher, PollOutcome};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::checkpoint::CheckpointStore;
use crate::cmdb::{CmdbClient, TopologyResolver};
use crate::config::SyncConfig;
use crate::leader::LeaderGate;
use crate::metrics::SyncMetrics;
use crate::store::InventoryStore;
use crate::utils::sleep_or_cancel;

/// 同步状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// 同步成功
    Success,
    /// 同步失败
    Failed,
    /// 同步中
    InProgress,
    /// 未同步
    NotSynced,
}

/// 同步链路共享的依赖
#[derive(Clone)]
pub struct SyncContext {
    /// 配置
    pub config: Arc<SyncConfig>,
    /// CMDB 客户端
    pub cmdb: Arc<dyn CmdbClient>,
    /// 主机库
    pub store: Arc<dyn InventoryStore>,
    /// 拓扑查询
    pub topology: Arc<dyn TopologyResolver>,
    /// 选主
    pub leader: Arc<dyn LeaderGate>,
    /// 游标存储
    pub checkpoints: Arc<CheckpointStore>,
    /// 主机库写入器
    pub applier: Arc<InventoryApplier>,
    /// 同步范围
    pub scope: ScopeFilter,
    /// 指标
    pub metrics: SyncMetrics,
}

impl SyncContext {
    /// 等待成为主节点，被取消时返回 false
    pub(crate) async fn wait_leader(&self, backoff: Duration, token: &CancellationToken) -> bool {
        loop {
            if token.is_cancelled() {
                return false;
            }
            if self.leader.is_leader() {
                return true;
            }

            debug!("当前实例不是主节点，{:?} 后重试", backoff);
            if !sleep_or_cancel(backoff, token).await {
                return false;
            }
        }
    }
}
