//! CMDB 接口模块
//!
//! 该模块定义同步引擎依赖的 CMDB 能力：资源事件监听、按业务分页查询主机、
//! 按主机 ID 查询主机及其业务关系、查询业务列表。CMDB 自身的监听协议不在此实现。

mod topology;

pub use topology::{CmdbTopologyResolver, TopologyResolver};

use async_trait::async_trait;
use invsync_common::{HostRelation, Page, Result, SourceHost, WatchRequest, WatchResponse};
use serde::{Deserialize, Serialize};

#[cfg(test)]
pub use topology::MockTopologyResolver;

/// 按业务查询主机的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBizHostsRequest {
    /// 业务 ID
    pub bk_biz_id: i64,
    /// 返回字段
    pub fields: Vec<String>,
    /// 分页参数
    pub page: Page,
}

/// CMDB 客户端接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CmdbClient: Send + Sync {
    /// 监听资源事件
    async fn watch(&self, req: &WatchRequest) -> Result<WatchResponse>;

    /// 分页查询业务下的主机
    async fn list_biz_hosts(&self, req: &ListBizHostsRequest) -> Result<Vec<SourceHost>>;

    /// 按主机 ID 查询主机
    async fn list_hosts_by_ids(&self, host_ids: &[i64], fields: &[String]) -> Result<Vec<SourceHost>>;

    /// 查询主机与业务的关联关系
    async fn list_host_relations(&self, host_ids: &[i64]) -> Result<Vec<HostRelation>>;

    /// 查询全部业务 ID
    async fn list_businesses(&self) -> Result<Vec<i64>>;
}
