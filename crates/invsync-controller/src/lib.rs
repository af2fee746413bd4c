//! InvSync 同步引擎
//!
//! 该模块把 CMDB 的主机变更增量同步到本地主机库，并按业务周期全量对账。
//! 引擎由以下任务组成，全部受选主控制，只在主节点上运行：
//!
//! - 选主循环：周期性续期租约
//! - 主机事件监听和主机业务关系事件监听
//! - 全量对账

pub mod checkpoint;
pub mod cmdb;
pub mod config;
pub mod leader;
pub mod logging;
pub mod metrics;
pub mod store;
pub mod sync;
pub mod utils;

pub use config::SyncConfig;
pub use metrics::SyncMetrics;

use anyhow::{anyhow, Context, Result};
use invsync_common::ResourceType;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::checkpoint::{CheckpointStore, LeaseKv};
use crate::cmdb::{CmdbClient, CmdbTopologyResolver, TopologyResolver};
use crate::leader::{run_election, LeaderGate};
use crate::store::InventoryStore;
use crate::sync::{EventWatcher, FullSync, InventoryApplier, ScopeFilter, SyncContext};

/// 引擎依赖的外部组件
pub struct Collaborators {
    /// CMDB 客户端
    pub cmdb: Arc<dyn CmdbClient>,
    /// 主机库
    pub store: Arc<dyn InventoryStore>,
    /// 游标使用的带租约键值存储
    pub kv: Arc<dyn LeaseKv>,
    /// 选主
    pub leader: Arc<dyn LeaderGate>,
    /// 拓扑查询，未提供时基于 CMDB 客户端查询
    pub topology: Option<Arc<dyn TopologyResolver>>,
}

/// 同步引擎
pub struct SyncEngine {
    ctx: SyncContext,
    full_sync: Arc<FullSync>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// 组装同步引擎
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let metrics = SyncMetrics::new().context("注册指标失败")?;
        let Collaborators {
            cmdb,
            store,
            kv,
            leader,
            topology,
        } = collaborators;

        let topology: Arc<dyn TopologyResolver> = match topology {
            Some(topology) => topology,
            None => Arc::new(CmdbTopologyResolver::new(
                cmdb.clone(),
                config.cmdb.relation_batch_size,
            )),
        };
        let checkpoints = Arc::new(CheckpointStore::new(
            kv,
            config.checkpoint.namespace.clone(),
            config.checkpoint.source.clone(),
            config.checkpoint.lease_ttl_seconds,
        ));
        let applier = Arc::new(InventoryApplier::new(
            store.clone(),
            config.applier.batch_size,
            metrics.clone(),
        ));

        let ctx = SyncContext {
            scope: ScopeFilter::from(&config),
            config: Arc::new(config),
            cmdb,
            store,
            topology,
            leader,
            checkpoints,
            applier,
            metrics,
        };

        Ok(Self {
            full_sync: Arc::new(FullSync::new(ctx.clone())),
            ctx,
            token: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// 引擎指标
    pub fn metrics(&self) -> &SyncMetrics {
        &self.ctx.metrics
    }

    /// 全量对账句柄，可用于查询各业务的对账状态或手动触发
    pub fn full_sync(&self) -> Arc<FullSync> {
        self.full_sync.clone()
    }

    /// 启动选主、事件监听和全量对账任务
    pub fn start(&mut self) -> Result<()> {
        if !self.tasks.is_empty() {
            return Err(anyhow!("同步引擎已启动"));
        }
        if self.token.is_cancelled() {
            return Err(anyhow!("同步引擎已停止"));
        }

        self.tasks.push(tokio::spawn(run_election(
            self.ctx.leader.clone(),
            self.ctx.config.leader_renew_interval(),
            self.token.clone(),
        )));

        for resource in ResourceType::ALL {
            let watcher = EventWatcher::new(resource, self.ctx.clone());
            let token = self.token.clone();
            self.tasks
                .push(tokio::spawn(async move { watcher.run(token).await }));
        }

        let full_sync = self.full_sync.clone();
        let token = self.token.clone();
        self.tasks
            .push(tokio::spawn(async move { full_sync.run(token).await }));

        info!("同步引擎已启动，任务数: {}", self.tasks.len());
        Ok(())
    }

    /// 停止全部任务并等待退出
    pub async fn shutdown(mut self) -> Result<()> {
        info!("正在停止同步引擎");
        self.token.cancel();

        for task in self.tasks.drain(..) {
            task.await.context("同步任务异常退出")?;
        }

        info!("同步引擎已停止");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryLeaseKv;
    use crate::cmdb::MockCmdbClient;
    use crate::leader::StaticLeaderGate;
    use crate::store::MemoryInventoryStore;
    use invsync_common::{SourceHost, WatchResponse};
    use std::time::Duration;

    fn collaborators(
        cmdb: MockCmdbClient,
        store: Arc<MemoryInventoryStore>,
        leader: bool,
    ) -> Collaborators {
        Collaborators {
            cmdb: Arc::new(cmdb),
            store,
            kv: Arc::new(MemoryLeaseKv::new()),
            leader: Arc::new(StaticLeaderGate::new(leader)),
            topology: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_runs_full_sync_and_shuts_down() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch().returning(|_| Ok(WatchResponse::default()));
        cmdb.expect_list_businesses().returning(|| Ok(vec![100]));
        cmdb.expect_list_biz_hosts().returning(|req| {
            if req.page.start > 0 {
                return Ok(Vec::new());
            }
            Ok(vec![SourceHost {
                bk_host_id: 1,
                bk_host_name: "h1".to_string(),
                ..Default::default()
            }])
        });

        let store = Arc::new(MemoryInventoryStore::new(100));
        let mut engine =
            SyncEngine::new(SyncConfig::default(), collaborators(cmdb, store.clone(), true)).unwrap();
        engine.start().unwrap();
        assert!(engine.start().is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;

        let hosts = store.snapshot().await;
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].bk_biz_id(), 100);
        assert_eq!(
            engine.full_sync().get_sync_status(100).await,
            sync::SyncStatus::Success
        );

        engine.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_does_not_touch_cmdb() {
        // 未设置任何期望，一旦访问 CMDB 就会失败
        let cmdb = MockCmdbClient::new();
        let store = Arc::new(MemoryInventoryStore::new(100));

        let mut engine =
            SyncEngine::new(SyncConfig::default(), collaborators(cmdb, store.clone(), false)).unwrap();
        engine.start().unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.snapshot().await.is_empty());

        engine.shutdown().await.unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SyncConfig::default();
        config.full_sync.page_size = 0;

        let result = SyncEngine::new(
            config,
            collaborators(
                MockCmdbClient::new(),
                Arc::new(MemoryInventoryStore::new(1)),
                true,
            ),
        );
        assert!(result.is_err());
    }
}
