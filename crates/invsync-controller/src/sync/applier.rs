//! 主机库写入
//!
//! 按主机库的单批上限拆分写入。某一批失败时放弃本次调用剩余的批次并返回该错误，
//! 已写入的批次不回滚，剩余部分由下一轮全量对账补齐。

use invsync_common::{HostSpec, InventoryHost, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::metrics::SyncMetrics;
use crate::store::{list_all, InventoryFilter, InventoryStore};
use crate::sync::diff::DiffPlan;

/// 写入统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// 主机库写入器
pub struct InventoryApplier {
    /// 主机库
    store: Arc<dyn InventoryStore>,
    /// 单批最大条数
    batch_size: usize,
    /// 指标
    metrics: SyncMetrics,
}

impl InventoryApplier {
    /// 创建写入器
    pub fn new(store: Arc<dyn InventoryStore>, batch_size: usize, metrics: SyncMetrics) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    /// 批量新增，返回主机库分配的主键
    pub async fn add(&self, hosts: &[HostSpec]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(hosts.len());

        for chunk in hosts.chunks(self.batch_size) {
            match self.store.batch_create(chunk).await {
                Ok(created) => {
                    self.metrics.add_applied("add", chunk.len());
                    ids.extend(created);
                }
                Err(e) => {
                    self.metrics.inc_apply_failure("add");
                    return Err(e);
                }
            }
        }

        debug!("新增主机 {} 台", ids.len());
        Ok(ids)
    }

    /// 批量更新
    pub async fn update(&self, hosts: &[InventoryHost]) -> Result<()> {
        for chunk in hosts.chunks(self.batch_size) {
            if let Err(e) = self.store.batch_update(chunk).await {
                self.metrics.inc_apply_failure("update");
                return Err(e);
            }
            self.metrics.add_applied("update", chunk.len());
        }

        debug!("更新主机 {} 台", hosts.len());
        Ok(())
    }

    /// 按主键批量删除
    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        for chunk in ids.chunks(self.batch_size) {
            if let Err(e) = self.store.batch_delete(chunk).await {
                self.metrics.inc_apply_failure("delete");
                return Err(e);
            }
            self.metrics.add_applied("delete", chunk.len());
        }

        debug!("删除主机 {} 台", ids.len());
        Ok(())
    }

    /// 按 CMDB 主机 ID 删除主机库记录
    pub async fn delete_by_host_ids(&self, host_ids: &[i64]) -> Result<usize> {
        let rows = list_all(
            self.store.as_ref(),
            &InventoryFilter::HostIds(host_ids.to_vec()),
            self.batch_size,
        )
        .await?;

        let ids: Vec<String> = rows.into_iter().map(|h| h.id).collect();
        self.delete(&ids).await?;
        Ok(ids.len())
    }

    /// 执行同步计划
    ///
    /// 依次执行删除、更新、新增，三类操作互不阻断，返回第一个错误。
    pub async fn apply(&self, plan: &DiffPlan) -> Result<ApplyStats> {
        if plan.is_empty() {
            return Ok(ApplyStats::default());
        }

        let mut stats = ApplyStats::default();
        let mut first_error = None;

        match self.delete(&plan.deletes).await {
            Ok(()) => stats.deleted = plan.deletes.len(),
            Err(e) => {
                error!("删除主机失败: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match self.update(&plan.updates).await {
            Ok(()) => stats.updated = plan.updates.len(),
            Err(e) => {
                error!("更新主机失败: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match self.add(&plan.adds).await {
            Ok(ids) => stats.added = ids.len(),
            Err(e) => {
                error!("新增主机失败: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "同步计划执行完成，新增 {}，更新 {}，删除 {}",
            stats.added, stats.updated, stats.deleted
        );
        Ok(stats)
    }
}
