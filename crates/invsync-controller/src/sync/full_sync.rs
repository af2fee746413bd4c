//! 全量对账模块
//!
//! 周期性地按业务比对 CMDB 与主机库，修复事件丢失、游标重置或写入失败造成的偏差。
//! 单个业务失败不影响其他业务，失败的业务在下个周期重试。

use invsync_common::{HostSpec, InventoryHost, Result, SourceHost};
use std::collections::{BTreeMap, HashMap};
use std::time::{Instant, SystemTime};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cmdb::ListBizHostsRequest;
use crate::store::{list_all, InventoryFilter};
use crate::sync::diff::{diff, DiffPlan};
use crate::sync::{ApplyStats, SyncContext, SyncStatus};
use crate::utils::{collect_pages, format_duration, sleep_or_cancel};

/// 单轮全量对账的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    /// 对账成功的业务
    pub succeeded: Vec<i64>,
    /// 对账失败的业务
    pub failed: Vec<i64>,
}

#[derive(Debug, Clone)]
struct BizSyncState {
    status: SyncStatus,
    last_success: Option<SystemTime>,
}

/// 全量对账
pub struct FullSync {
    /// 同步依赖
    ctx: SyncContext,
    /// 各业务的对账状态
    status: RwLock<HashMap<i64, BizSyncState>>,
}

impl FullSync {
    /// 创建全量对账
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            status: RwLock::new(HashMap::new()),
        }
    }

    /// 周期执行全量对账，直到取消
    pub async fn run(&self, token: CancellationToken) {
        let backoff = self.ctx.config.leader_backoff();
        let interval = self.ctx.config.full_sync_interval();
        info!("全量对账任务已启动，间隔: {}", format_duration(interval));

        while self.ctx.wait_leader(backoff, &token).await {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = self.sync_all() => result,
            };

            if let Err(e) = result {
                error!("全量对账出错: {}", e);
            }

            if !sleep_or_cancel(interval, &token).await {
                break;
            }
        }

        info!("全量对账任务已退出");
    }

    /// 对全部业务执行一轮对账
    pub async fn sync_all(&self) -> Result<FullSyncReport> {
        let started = Instant::now();
        let businesses = self.businesses().await?;
        info!("开始全量对账，业务数: {}", businesses.len());

        let mut report = FullSyncReport::default();
        for biz in businesses {
            self.set_status(biz, SyncStatus::InProgress).await;

            match self.sync_business(biz).await {
                Ok(stats) => {
                    info!(
                        biz_id = biz,
                        "业务对账完成，新增 {}，更新 {}，删除 {}",
                        stats.added, stats.updated, stats.deleted
                    );
                    self.set_status(biz, SyncStatus::Success).await;
                    report.succeeded.push(biz);
                }
                Err(e) => {
                    error!(biz_id = biz, "业务对账失败: {}", e);
                    self.ctx.metrics.inc_full_sync_failure();
                    self.set_status(biz, SyncStatus::Failed).await;
                    report.failed.push(biz);
                }
            }
        }

        let elapsed = started.elapsed();
        self.ctx.metrics.observe_full_sync(elapsed.as_secs_f64());
        info!(
            "全量对账结束，成功 {}，失败 {}，耗时 {}",
            report.succeeded.len(),
            report.failed.len(),
            format_duration(elapsed)
        );

        Ok(report)
    }

    /// 对单个业务执行对账
    pub async fn sync_business(&self, bk_biz_id: i64) -> Result<ApplyStats> {
        let page_size = self.ctx.config.full_sync.page_size;
        let fields: Vec<String> = SourceHost::FIELDS.iter().map(|f| f.to_string()).collect();

        let hosts = collect_pages(page_size, |page| {
            let req = ListBizHostsRequest {
                bk_biz_id,
                fields: fields.clone(),
                page: page.sorted_by("bk_host_id"),
            };
            async move { self.ctx.cmdb.list_biz_hosts(&req).await }
        })
        .await?;

        let specs: Vec<HostSpec> = hosts
            .iter()
            .filter(|host| self.ctx.scope.in_scope(host))
            .map(|host| host.to_spec(bk_biz_id))
            .collect();

        let inventory = list_all(
            self.ctx.store.as_ref(),
            &InventoryFilter::Business(bk_biz_id),
            page_size,
        )
        .await?;

        let mut plan = diff(&specs, &inventory);
        self.adopt_moved_hosts(&mut plan).await?;

        self.ctx.applier.apply(&plan).await
    }

    /// 业务的最近对账状态
    pub async fn get_sync_status(&self, bk_biz_id: i64) -> SyncStatus {
        self.status
            .read()
            .await
            .get(&bk_biz_id)
            .map(|state| state.status.clone())
            .unwrap_or(SyncStatus::NotSynced)
    }

    /// 业务最近一次对账成功的时间
    pub async fn last_success(&self, bk_biz_id: i64) -> Option<SystemTime> {
        self.status
            .read()
            .await
            .get(&bk_biz_id)
            .and_then(|state| state.last_success)
    }

    async fn businesses(&self) -> Result<Vec<i64>> {
        let configured = &self.ctx.config.full_sync.businesses;
        if !configured.is_empty() {
            return Ok(configured.clone());
        }

        let mut businesses = self.ctx.cmdb.list_businesses().await?;
        businesses.sort_unstable();
        businesses.dedup();
        Ok(businesses)
    }

    /// 主机在主机库中仍挂在其他业务下时，新增改为更新原记录
    async fn adopt_moved_hosts(&self, plan: &mut DiffPlan) -> Result<()> {
        if plan.adds.is_empty() {
            return Ok(());
        }

        let host_ids: Vec<i64> = plan.adds.iter().map(|s| s.bk_host_id).collect();
        let rows = list_all(
            self.ctx.store.as_ref(),
            &InventoryFilter::HostIds(host_ids),
            self.ctx.config.full_sync.page_size,
        )
        .await?;

        let mut existing: BTreeMap<i64, String> = BTreeMap::new();
        for row in rows {
            existing
                .entry(row.bk_host_id())
                .and_modify(|id| {
                    if row.id < *id {
                        *id = row.id.clone();
                    }
                })
                .or_insert_with(|| row.id.clone());
        }
        if existing.is_empty() {
            return Ok(());
        }

        let adds = std::mem::take(&mut plan.adds);
        for spec in adds {
            match existing.get(&spec.bk_host_id) {
                Some(id) => {
                    warn!(
                        biz_id = spec.bk_biz_id,
                        "主机 {} 仍挂在其他业务下，转移到当前业务", spec.bk_host_id
                    );
                    plan.updates.push(InventoryHost::new(id.clone(), spec));
                }
                None => plan.adds.push(spec),
            }
        }

        Ok(())
    }

    async fn set_status(&self, bk_biz_id: i64, status: SyncStatus) {
        let mut states = self.status.write().await;
        let state = states.entry(bk_biz_id).or_insert(BizSyncState {
            status: SyncStatus::NotSynced,
            last_success: None,
        });

        if status == SyncStatus::Success {
            state.last_success = Some(SystemTime::now());
        }
        state.status = status;
    }
}
