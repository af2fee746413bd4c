//! 内存版主机库
//!
//! 用于单机调试和测试。与真实主机库一样按 CMDB 主机 ID 做唯一约束，
//! 并限制单批写入条数。

use async_trait::async_trait;
use invsync_common::{Error, HostSpec, InventoryHost, Page, Result};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{InventoryFilter, InventoryStore};

/// 内存版主机库
pub struct MemoryInventoryStore {
    /// 主键到记录
    hosts: RwLock<BTreeMap<String, InventoryHost>>,
    /// 单批最大条数
    max_batch: usize,
}

impl MemoryInventoryStore {
    /// 创建内存主机库
    pub fn new(max_batch: usize) -> Self {
        Self {
            hosts: RwLock::new(BTreeMap::new()),
            max_batch,
        }
    }

    /// 当前全部记录，按 CMDB 主机 ID 排序
    pub async fn snapshot(&self) -> Vec<InventoryHost> {
        let mut hosts: Vec<_> = self.hosts.read().await.values().cloned().collect();
        hosts.sort_by(|a, b| (a.bk_host_id(), &a.id).cmp(&(b.bk_host_id(), &b.id)));
        hosts
    }

    /// 直接写入记录，跳过唯一约束，用于构造异常数据
    pub async fn insert_raw(&self, host: InventoryHost) {
        self.hosts.write().await.insert(host.id.clone(), host);
    }

    fn check_batch(&self, len: usize) -> Result<()> {
        if len > self.max_batch {
            return Err(Error::Store(format!(
                "单批条数 {} 超过上限 {}",
                len, self.max_batch
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn batch_create(&self, hosts: &[HostSpec]) -> Result<Vec<String>> {
        self.check_batch(hosts.len())?;
        let mut store = self.hosts.write().await;

        for spec in hosts {
            if store.values().any(|h| h.bk_host_id() == spec.bk_host_id) {
                return Err(Error::Store(format!(
                    "主机 {} 已存在",
                    spec.bk_host_id
                )));
            }
        }

        let mut ids = Vec::with_capacity(hosts.len());
        for spec in hosts {
            let id = Uuid::new_v4().to_string();
            store.insert(id.clone(), InventoryHost::new(id.clone(), spec.clone()));
            ids.push(id);
        }

        Ok(ids)
    }

    async fn batch_update(&self, hosts: &[InventoryHost]) -> Result<()> {
        self.check_batch(hosts.len())?;
        let mut store = self.hosts.write().await;

        if let Some(missing) = hosts.iter().find(|h| !store.contains_key(&h.id)) {
            return Err(Error::Store(format!("主机记录 {} 不存在", missing.id)));
        }

        for host in hosts {
            store.insert(host.id.clone(), host.clone());
        }

        Ok(())
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<()> {
        self.check_batch(ids.len())?;
        let mut store = self.hosts.write().await;

        for id in ids {
            store.remove(id);
        }

        Ok(())
    }

    async fn list(&self, filter: &InventoryFilter, page: &Page) -> Result<Vec<InventoryHost>> {
        let hosts = self.snapshot().await;

        Ok(hosts
            .into_iter()
            .filter(|h| match filter {
                InventoryFilter::Business(biz) => h.bk_biz_id() == *biz,
                InventoryFilter::HostIds(ids) => ids.contains(&h.bk_host_id()),
            })
            .skip(page.start)
            .take(page.limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::list_all;

    fn spec(host_id: i64, biz: i64) -> HostSpec {
        HostSpec {
            bk_host_id: host_id,
            bk_biz_id: biz,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_enforces_unique_host_id() {
        let store = MemoryInventoryStore::new(10);
        store.batch_create(&[spec(1, 1)]).await.unwrap();

        assert!(store.batch_create(&[spec(2, 1), spec(1, 2)]).await.is_err());
        // 失败的批次不产生部分写入
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_oversized_batch() {
        let store = MemoryInventoryStore::new(2);
        let specs: Vec<_> = (1..=3).map(|i| spec(i, 1)).collect();
        assert!(store.batch_create(&specs).await.is_err());
    }

    #[tokio::test]
    async fn test_list_all_pages_by_business() {
        let store = MemoryInventoryStore::new(100);
        let specs: Vec<_> = (1..=7).map(|i| spec(i, if i % 2 == 0 { 2 } else { 1 })).collect();
        store.batch_create(&specs).await.unwrap();

        let biz1 = list_all(&store, &InventoryFilter::Business(1), 2).await.unwrap();
        let ids: Vec<_> = biz1.iter().map(|h| h.bk_host_id()).collect();
        assert_eq!(ids, vec![1, 3, 5, 7]);

        let some = list_all(&store, &InventoryFilter::HostIds(vec![2, 7, 99]), 2)
            .await
            .unwrap();
        assert_eq!(some.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let store = MemoryInventoryStore::new(10);
        let host = InventoryHost::new("nope", spec(1, 1));
        assert!(store.batch_update(&[host]).await.is_err());
    }
}
