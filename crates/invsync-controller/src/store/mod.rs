//! 主机库接口模块
//!
//! 主机库由外部服务提供，同步引擎只通过批量增删改和分页查询与其交互。
//! 批量接口不返回单条记录级别的成功与失败。

mod memory;

pub use memory::MemoryInventoryStore;

use async_trait::async_trait;
use invsync_common::{HostSpec, InventoryHost, Page, Result};

use crate::utils::collect_pages;

/// 主机库查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryFilter {
    /// 按业务查询
    Business(i64),
    /// 按 CMDB 主机 ID 查询
    HostIds(Vec<i64>),
}

/// 主机库接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// 批量创建，返回主机库分配的主键
    async fn batch_create(&self, hosts: &[HostSpec]) -> Result<Vec<String>>;

    /// 批量更新
    async fn batch_update(&self, hosts: &[InventoryHost]) -> Result<()>;

    /// 按主键批量删除
    async fn batch_delete(&self, ids: &[String]) -> Result<()>;

    /// 分页查询
    async fn list(&self, filter: &InventoryFilter, page: &Page) -> Result<Vec<InventoryHost>>;
}

/// 查询满足条件的全部主机
pub async fn list_all(
    store: &dyn InventoryStore,
    filter: &InventoryFilter,
    page_size: usize,
) -> Result<Vec<InventoryHost>> {
    if let InventoryFilter::HostIds(ids) = filter {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
    }

    collect_pages(page_size, |page| async move { store.list(filter, &page).await }).await
}
