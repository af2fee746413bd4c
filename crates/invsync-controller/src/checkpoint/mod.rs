//! 游标存储模块
//!
//! 该模块按资源类型持久化 CMDB 事件游标。游标写入带租约的键值存储，
//! 租约过期后游标随之丢失，Watcher 会从当前时间重新开始监听。
//! 部署时使用 [`KubeLeaseKv`]，[`MemoryLeaseKv`] 用于单机和测试。

mod kube_kv;
mod lease;
mod memory_kv;

pub use kube_kv::KubeLeaseKv;
pub use lease::LeaseManager;
pub use memory_kv::MemoryLeaseKv;

use async_trait::async_trait;
use invsync_common::{ResourceType, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// 租约 ID
pub type LeaseId = i64;

/// 带租约的键值存储接口
#[async_trait]
pub trait LeaseKv: Send + Sync {
    /// 申请新租约
    async fn grant(&self, ttl_seconds: i64) -> Result<LeaseId>;

    /// 续期租约，租约不存在或已过期时返回错误
    async fn keep_alive(&self, lease: LeaseId) -> Result<()>;

    /// 写入绑定到租约的键
    async fn put(&self, key: &str, value: &str, lease: LeaseId) -> Result<()>;

    /// 读取键，不存在时返回 None
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// 游标存储
pub struct CheckpointStore {
    /// 底层键值存储
    kv: Arc<dyn LeaseKv>,
    /// 租约管理器
    leases: LeaseManager,
    /// 键命名空间
    namespace: String,
    /// 事件来源
    source: String,
}

impl CheckpointStore {
    /// 创建游标存储
    pub fn new(
        kv: Arc<dyn LeaseKv>,
        namespace: impl Into<String>,
        source: impl Into<String>,
        lease_ttl_seconds: i64,
    ) -> Self {
        Self {
            leases: LeaseManager::new(kv.clone(), lease_ttl_seconds),
            kv,
            namespace: namespace.into(),
            source: source.into(),
        }
    }

    /// 资源类型对应的存储键
    pub fn key(&self, resource: ResourceType) -> String {
        format!("/{}/event/{}/{}", self.namespace, self.source, resource)
    }

    /// 读取游标，未找到时返回 None，表示从当前时间开始监听
    pub async fn get(&self, resource: ResourceType) -> Result<Option<String>> {
        let key = self.key(resource);
        let token = self.kv.get(&key).await?;
        debug!("读取游标 {}: {:?}", key, token);
        Ok(token)
    }

    /// 写入游标
    ///
    /// 写入前复用或续期该键的租约，续期失败时重新申请；
    /// 返回错误时调用方不能认为游标已推进。
    pub async fn set(&self, resource: ResourceType, token: &str) -> Result<()> {
        let key = self.key(resource);
        let lease = self.leases.get_or_grant(&key).await?;

        if let Err(e) = self.kv.put(&key, token, lease).await {
            warn!("写入游标 {} 失败，丢弃租约缓存: {}", key, e);
            self.leases.invalidate(&key).await;
            return Err(e);
        }

        Ok(())
    }
}
