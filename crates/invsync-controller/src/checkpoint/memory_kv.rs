//! 内存版带租约键值存储
//!
//! 语义与 etcd 租约一致：键绑定到租约，租约过期后键一并失效。
//! 时间使用 `tokio::time::Instant`，测试中可以暂停并推进时钟。

use async_trait::async_trait;
use invsync_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{LeaseId, LeaseKv};

#[derive(Debug)]
struct LeaseEntry {
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    next_lease: LeaseId,
    granted: usize,
    leases: HashMap<LeaseId, LeaseEntry>,
    values: HashMap<String, (String, LeaseId)>,
}

impl State {
    fn purge_expired(&mut self, now: Instant) {
        self.leases.retain(|_, entry| entry.expires_at > now);
        let leases = &self.leases;
        self.values.retain(|_, (_, lease)| leases.contains_key(lease));
    }
}

/// 内存版带租约键值存储
#[derive(Debug, Default)]
pub struct MemoryLeaseKv {
    state: Mutex<State>,
}

impl MemoryLeaseKv {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计申请的租约数
    pub fn granted_count(&self) -> usize {
        self.lock().map(|state| state.granted).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Checkpoint("键值存储锁已损坏".to_string()))
    }
}

#[async_trait]
impl LeaseKv for MemoryLeaseKv {
    async fn grant(&self, ttl_seconds: i64) -> Result<LeaseId> {
        if ttl_seconds <= 0 {
            return Err(Error::Lease(format!("无效的租约有效期: {}", ttl_seconds)));
        }

        let mut state = self.lock()?;
        state.next_lease += 1;
        state.granted += 1;

        let lease = state.next_lease;
        let ttl = Duration::from_secs(ttl_seconds as u64);
        state.leases.insert(
            lease,
            LeaseEntry {
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(lease)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        let now = Instant::now();
        let mut state = self.lock()?;
        state.purge_expired(now);

        match state.leases.get_mut(&lease) {
            Some(entry) => {
                entry.expires_at = now + entry.ttl;
                Ok(())
            }
            None => Err(Error::Lease(format!("租约 {} 不存在或已过期", lease))),
        }
    }

    async fn put(&self, key: &str, value: &str, lease: LeaseId) -> Result<()> {
        let mut state = self.lock()?;
        state.purge_expired(Instant::now());

        if !state.leases.contains_key(&lease) {
            return Err(Error::Lease(format!("租约 {} 不存在或已过期", lease)));
        }

        state
            .values
            .insert(key.to_string(), (value.to_string(), lease));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.lock()?;
        state.purge_expired(Instant::now());
        Ok(state.values.get(key).map(|(value, _)| value.clone()))
    }
}
