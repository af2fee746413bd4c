//! 租约管理
//!
//! 缓存每个键对应的租约。续期和重新申请都在同一把锁内完成，
//! 避免并发写入不同资源游标时重复申请租约。

use invsync_common::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{LeaseId, LeaseKv};

/// 租约管理器
pub struct LeaseManager {
    /// 底层键值存储
    kv: Arc<dyn LeaseKv>,
    /// 键到租约的缓存
    leases: Mutex<HashMap<String, LeaseId>>,
    /// 租约有效期（秒）
    ttl_seconds: i64,
}

impl LeaseManager {
    /// 创建租约管理器
    pub fn new(kv: Arc<dyn LeaseKv>, ttl_seconds: i64) -> Self {
        Self {
            kv,
            leases: Mutex::new(HashMap::new()),
            ttl_seconds,
        }
    }

    /// 获取键的可用租约：已有租约则续期，续期失败或没有租约则重新申请
    pub async fn get_or_grant(&self, key: &str) -> Result<LeaseId> {
        let mut leases = self.leases.lock().await;

        if let Some(&lease) = leases.get(key) {
            match self.kv.keep_alive(lease).await {
                Ok(()) => {
                    debug!("续期租约 {} 成功: {}", lease, key);
                    return Ok(lease);
                }
                Err(e) => {
                    warn!("续期租约 {} 失败，重新申请: {}", lease, e);
                    leases.remove(key);
                }
            }
        }

        let lease = self.kv.grant(self.ttl_seconds).await?;
        info!("为 {} 申请新租约 {}，有效期 {} 秒", key, lease, self.ttl_seconds);
        leases.insert(key.to_string(), lease);
        Ok(lease)
    }

    /// 丢弃键的租约缓存
    pub async fn invalidate(&self, key: &str) {
        self.leases.lock().await.remove(key);
    }
}
