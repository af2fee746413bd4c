//! 业务拓扑查询
//!
//! CMDB 主机本身没有所属业务字段，需要通过主机关系查询得到。
//! 主机 ID 较多时按批拆分请求。

use async_trait::async_trait;
use invsync_common::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::CmdbClient;

/// 拓扑查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopologyResolver: Send + Sync {
    /// 查询主机所属业务，未找到关系的主机不出现在结果中
    async fn resolve_owning_business(&self, host_ids: &[i64]) -> Result<HashMap<i64, i64>>;
}

/// 基于 CMDB 主机关系的拓扑查询
pub struct CmdbTopologyResolver {
    /// CMDB 客户端
    cmdb: Arc<dyn CmdbClient>,
    /// 单批查询的主机数
    batch_size: usize,
}

impl CmdbTopologyResolver {
    /// 创建拓扑查询
    pub fn new(cmdb: Arc<dyn CmdbClient>, batch_size: usize) -> Self {
        Self {
            cmdb,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl TopologyResolver for CmdbTopologyResolver {
    async fn resolve_owning_business(&self, host_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        let mut owners = HashMap::with_capacity(host_ids.len());

        for chunk in host_ids.chunks(self.batch_size) {
            let relations = self.cmdb.list_host_relations(chunk).await?;
            debug!("查询 {} 台主机的业务关系，返回 {} 条", chunk.len(), relations.len());

            // 主机可能挂在同一业务的多个模块下，关系会重复
            for relation in relations {
                owners.insert(relation.bk_host_id, relation.bk_biz_id);
            }
        }

        Ok(owners)
    }
}
