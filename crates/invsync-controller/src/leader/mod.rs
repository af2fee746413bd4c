//! 选主模块
//!
//! 该模块保证同一时刻集群中只有一个实例执行事件监听和全量对账。
//! 选主采用轮询方式：后台任务周期性调用 [`LeaderGate::try_acquire`]，
//! 各同步循环在每轮开始前读取 [`LeaderGate::is_leader`]。
//! 主节点切换时可能出现短暂的双主窗口，同步流程中的游标推进和写入都是幂等的。

mod kube_lease;
mod static_gate;

pub use kube_lease::KubeLeaseGate;
pub(crate) use kube_lease::lease_expired;
pub use static_gate::StaticLeaderGate;

use async_trait::async_trait;
use invsync_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 选主接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaderGate: Send + Sync {
    /// 尝试成为（或续期）主节点，返回当前是否为主
    async fn try_acquire(&self) -> Result<bool>;

    /// 最近一次选主的结果
    fn is_leader(&self) -> bool;
}

/// 运行选主循环，直到取消
pub async fn run_election(gate: Arc<dyn LeaderGate>, interval: Duration, token: CancellationToken) {
    let mut was_leader = false;

    loop {
        let leader = match gate.try_acquire().await {
            Ok(leader) => leader,
            Err(e) => {
                error!("选主失败: {}", e);
                false
            }
        };

        if leader != was_leader {
            if leader {
                info!("当前实例成为主节点");
            } else {
                info!("当前实例不再是主节点");
            }
            was_leader = leader;
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("选主循环已退出");
}
