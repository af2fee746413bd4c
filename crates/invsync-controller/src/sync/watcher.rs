//! 事件监听模块
//!
//! 每种资源类型一个监听循环：
//!
//! ```text
//! WAIT_LEADER -> FETCH_CURSOR -> POLL -> (NO_CHANGE | APPLY_EVENTS) -> ADVANCE_CURSOR -> WAIT_LEADER
//! ```
//!
//! 游标只在收到 CMDB 响应后推进；处理失败只记录日志，不阻塞游标，
//! 遗漏的变更由全量对账兜底。只有"事件链节点不存在"会把游标重置为空。

use invsync_common::{
    Cursor, EventDetail, EventType, HostRelation, HostSpec, ResourceType, Result, SourceHost,
    WatchEvent, WatchRequest,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::{list_all, InventoryFilter};
use crate::sync::diff::diff;
use crate::sync::{ApplyStats, SyncContext};
use crate::utils::sleep_or_cancel;

/// 单轮监听的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 没有新事件
    NoChange,
    /// 游标已失效并被重置
    CursorReset,
    /// 处理了若干事件
    Applied(usize),
}

/// 单资源类型的事件监听器
pub struct EventWatcher {
    /// 资源类型
    resource: ResourceType,
    /// 同步依赖
    ctx: SyncContext,
}

impl EventWatcher {
    /// 创建事件监听器
    pub fn new(resource: ResourceType, ctx: SyncContext) -> Self {
        Self { resource, ctx }
    }

    /// 监听的资源类型
    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    /// 运行监听循环，直到取消
    pub async fn run(&self, token: CancellationToken) {
        let backoff = self.ctx.config.leader_backoff();
        let retry = self.ctx.config.watch_retry_interval();
        info!(resource = %self.resource, "启动事件监听");

        while self.ctx.wait_leader(backoff, &token).await {
            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            match outcome {
                Ok(PollOutcome::Applied(count)) => {
                    debug!(resource = %self.resource, "处理事件 {} 条", count);
                    continue;
                }
                Ok(PollOutcome::NoChange) | Ok(PollOutcome::CursorReset) => {}
                Err(e) => {
                    error!(resource = %self.resource, "监听事件失败: {}", e);
                }
            }

            if !sleep_or_cancel(retry, &token).await {
                break;
            }
        }

        info!(resource = %self.resource, "事件监听已退出");
    }

    /// 执行一轮监听
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let cursor = match self.ctx.checkpoints.get(self.resource).await? {
            Some(token) => Cursor::new(self.resource, token),
            None => Cursor::from_now(self.resource),
        };
        if cursor.is_from_now() {
            debug!(resource = %self.resource, "没有可用游标，从当前时间开始监听");
        }
        let request = self.watch_request(cursor);

        self.ctx.metrics.inc_watch_poll(self.resource.as_str());
        let response = match self.ctx.cmdb.watch(&request).await {
            Ok(response) => response,
            Err(e) if e.is_cursor_expired(&self.ctx.config.cmdb.cursor_expired_codes) => {
                warn!(
                    resource = %self.resource,
                    cursor = %request.cursor,
                    "游标对应的事件节点已不存在，从当前时间重新监听: {}", e
                );
                self.ctx.checkpoints.set(self.resource, "").await?;
                self.ctx.metrics.inc_cursor_reset(self.resource.as_str());
                return Ok(PollOutcome::CursorReset);
            }
            Err(e) => {
                self.ctx.metrics.inc_watch_error(self.resource.as_str());
                return Err(e);
            }
        };

        if !response.watched {
            // 未监听到新位置时 CMDB 会返回最新的游标
            if let Some(first) = response.events.first() {
                self.ctx.checkpoints.set(self.resource, &first.cursor).await?;
            }
            return Ok(PollOutcome::NoChange);
        }

        let Some(last) = response.events.last() else {
            return Ok(PollOutcome::NoChange);
        };

        self.handle_events(&response.events).await;

        self.ctx.checkpoints.set(self.resource, &last.cursor).await?;
        Ok(PollOutcome::Applied(response.events.len()))
    }

    fn watch_request(&self, cursor: Cursor) -> WatchRequest {
        let (event_types, fields): (Vec<EventType>, &[&str]) = match self.resource {
            ResourceType::Host => (EventType::ALL.to_vec(), SourceHost::FIELDS),
            // 主机转移业务时先删除旧关系再创建新关系，只需关注创建
            ResourceType::HostRelation => (vec![EventType::Create], HostRelation::FIELDS),
        };

        WatchRequest {
            event_types,
            resource: self.resource,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            cursor: cursor.token,
        }
    }

    async fn handle_events(&self, events: &[WatchEvent]) {
        let result = match self.resource {
            ResourceType::Host => self.handle_host_events(events).await,
            ResourceType::HostRelation => self.handle_relation_events(events).await,
        };

        if let Err(e) = result {
            error!(resource = %self.resource, "处理事件失败，等待全量对账修复: {}", e);
        }
    }

    /// 解析事件详情，失败的事件只跳过自身
    fn decode(&self, event: &WatchEvent) -> Option<EventDetail> {
        if event.resource != self.resource {
            warn!(
                resource = %self.resource,
                cursor = %event.cursor,
                "收到非本资源类型的事件 {}，跳过", event.resource
            );
            return None;
        }

        match event.decode_detail() {
            Ok(detail) => Some(detail),
            Err(e) => {
                warn!(resource = %self.resource, cursor = %event.cursor, "解析事件失败，跳过: {}", e);
                self.ctx.metrics.inc_decode_failure(self.resource.as_str());
                None
            }
        }
    }

    async fn handle_host_events(&self, events: &[WatchEvent]) -> Result<()> {
        let mut upserts: BTreeMap<i64, SourceHost> = BTreeMap::new();
        let mut deletes: BTreeSet<i64> = BTreeSet::new();

        for event in events {
            let Some(EventDetail::Host(host)) = self.decode(event) else {
                continue;
            };
            let host_id = host.bk_host_id;

            match event.event_type {
                EventType::Delete => {
                    upserts.remove(&host_id);
                    deletes.insert(host_id);
                }
                EventType::Create | EventType::Update if self.ctx.scope.in_scope(&host) => {
                    deletes.remove(&host_id);
                    upserts.insert(host_id, host);
                }
                EventType::Create => {
                    debug!("主机 {} 不在同步范围内，忽略", host_id);
                }
                EventType::Update => {
                    // 主机被转移到不由本引擎同步的云厂商
                    info!("主机 {} 已移出同步范围，删除本地记录", host_id);
                    upserts.remove(&host_id);
                    deletes.insert(host_id);
                }
            }
        }

        let mut first_error = None;

        if !deletes.is_empty() {
            let host_ids: Vec<i64> = deletes.into_iter().collect();
            match self.ctx.applier.delete_by_host_ids(&host_ids).await {
                Ok(count) => info!("按删除事件删除主机记录 {} 条", count),
                Err(e) => {
                    error!("按删除事件删除主机失败: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if !upserts.is_empty() {
            let hosts: Vec<SourceHost> = upserts.into_values().collect();
            if let Err(e) = self.upsert_hosts(&hosts).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 查询业务归属后与主机库比对并写入
    ///
    /// 归属业务不在同步范围内的主机不参与新增和更新，主机库中已有的记录会被删除。
    async fn upsert_hosts(&self, hosts: &[SourceHost]) -> Result<ApplyStats> {
        let host_ids: Vec<i64> = hosts.iter().map(|h| h.bk_host_id).collect();
        let owners = self.ctx.topology.resolve_owning_business(&host_ids).await?;

        let mut resolved = Vec::with_capacity(hosts.len());
        let mut specs: Vec<HostSpec> = Vec::with_capacity(hosts.len());
        for host in hosts {
            let Some(&biz) = owners.get(&host.bk_host_id) else {
                warn!("主机 {} 未查询到所属业务，跳过", host.bk_host_id);
                continue;
            };

            resolved.push(host.bk_host_id);
            if self.ctx.scope.business_in_scope(biz) {
                specs.push(host.to_spec(biz));
            } else {
                debug!(biz_id = biz, "主机 {} 所属业务不在同步范围内", host.bk_host_id);
            }
        }

        let inventory = list_all(
            self.ctx.store.as_ref(),
            &InventoryFilter::HostIds(resolved),
            self.ctx.config.full_sync.page_size,
        )
        .await?;

        let plan = diff(&specs, &inventory);
        self.ctx.applier.apply(&plan).await
    }

    async fn handle_relation_events(&self, events: &[WatchEvent]) -> Result<()> {
        let mut relations: BTreeMap<i64, i64> = BTreeMap::new();

        for event in events {
            if event.event_type == EventType::Delete {
                continue;
            }
            if let Some(EventDetail::HostRelation(relation)) = self.decode(event) {
                relations.insert(relation.bk_host_id, relation.bk_biz_id);
            }
        }

        if relations.is_empty() {
            return Ok(());
        }

        let host_ids: Vec<i64> = relations.keys().copied().collect();
        let inventory = list_all(
            self.ctx.store.as_ref(),
            &InventoryFilter::HostIds(host_ids.clone()),
            self.ctx.config.full_sync.page_size,
        )
        .await?;

        let mut known = HashSet::with_capacity(inventory.len());
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for mut row in inventory {
            known.insert(row.bk_host_id());
            let Some(&biz) = relations.get(&row.bk_host_id()) else {
                continue;
            };

            if !self.ctx.scope.business_in_scope(biz) {
                deletes.push(row.id);
            } else if row.bk_biz_id() != biz {
                // 相同的关系回显不产生写入
                row.spec.bk_biz_id = biz;
                updates.push(row);
            }
        }

        let mut first_error = None;

        if !deletes.is_empty() {
            info!("主机转移到同步范围外的业务，删除 {} 条记录", deletes.len());
            if let Err(e) = self.ctx.applier.delete(&deletes).await {
                error!("删除移出范围的主机失败: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if !updates.is_empty() {
            info!("主机业务关系变化，更新 {} 条记录", updates.len());
            if let Err(e) = self.ctx.applier.update(&updates).await {
                error!("更新主机业务失败: {}", e);
                first_error.get_or_insert(e);
            }
        }

        // 主机库中还没有的主机，从 CMDB 拉取详情后新增
        let missing: Vec<i64> = host_ids
            .into_iter()
            .filter(|id| !known.contains(id))
            .filter(|id| {
                relations
                    .get(id)
                    .map_or(false, |&biz| self.ctx.scope.business_in_scope(biz))
            })
            .collect();
        if !missing.is_empty() {
            if let Err(e) = self.add_missing_hosts(&missing, &relations).await {
                error!("新增业务关系对应的主机失败: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn add_missing_hosts(&self, host_ids: &[i64], relations: &BTreeMap<i64, i64>) -> Result<()> {
        let fields: Vec<String> = SourceHost::FIELDS.iter().map(|f| f.to_string()).collect();
        let hosts = self.ctx.cmdb.list_hosts_by_ids(host_ids, &fields).await?;
        let specs: Vec<HostSpec> = hosts
            .iter()
            .filter(|host| self.ctx.scope.in_scope(host))
            .filter_map(|host| relations.get(&host.bk_host_id).map(|&biz| host.to_spec(biz)))
            .collect();

        self.ctx.applier.apply(&diff(&specs, &[])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmdb::{MockCmdbClient, MockTopologyResolver};
    use crate::store::{InventoryStore, MockInventoryStore};
    use crate::sync::testing::{fixture, Fixture};
    use crate::sync::InventoryApplier;
    use invsync_common::{Error, InventoryHost, WatchResponse};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn host_event(cursor: &str, event_type: EventType, host_id: i64, ip: &str) -> WatchEvent {
        WatchEvent {
            cursor: cursor.to_string(),
            resource: ResourceType::Host,
            event_type,
            detail: json!({
                "bk_host_id": host_id,
                "bk_host_name": format!("h{}", host_id),
                "bk_host_innerip": ip,
            }),
        }
    }

    fn relation_event(cursor: &str, host_id: i64, biz: i64) -> WatchEvent {
        WatchEvent {
            cursor: cursor.to_string(),
            resource: ResourceType::HostRelation,
            event_type: EventType::Create,
            detail: json!({"bk_host_id": host_id, "bk_biz_id": biz}),
        }
    }

    fn watched(events: Vec<WatchEvent>) -> WatchResponse {
        WatchResponse {
            watched: true,
            events,
        }
    }

    fn topology(owners: &[(i64, i64)]) -> Arc<MockTopologyResolver> {
        let owners: HashMap<i64, i64> = owners.iter().copied().collect();
        let mut topology = MockTopologyResolver::new();
        topology
            .expect_resolve_owning_business()
            .returning(move |ids| {
                Ok(ids
                    .iter()
                    .filter_map(|id| owners.get(id).map(|biz| (*id, *biz)))
                    .collect())
            });
        Arc::new(topology)
    }

    fn host_spec(host_id: i64, biz: i64, ip: &str) -> HostSpec {
        HostSpec {
            bk_host_id: host_id,
            bk_biz_id: biz,
            name: format!("h{}", host_id),
            inner_ipv4: vec![ip.to_string()],
            ..Default::default()
        }
    }

    async fn cursor(f: &Fixture, resource: ResourceType) -> Option<String> {
        f.ctx.checkpoints.get(resource).await.unwrap()
    }

    #[tokio::test]
    async fn test_created_host_is_added_with_business() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch()
            .withf(|req| req.cursor.is_empty() && req.resource == ResourceType::Host)
            .times(1)
            .returning(|_| Ok(watched(vec![host_event("c1", EventType::Create, 1, "10.0.0.1")])));

        let f = fixture(Arc::new(cmdb), Some(topology(&[(1, 100)])));
        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());

        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::Applied(1));

        let hosts = f.store.snapshot().await;
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].spec, host_spec(1, 100, "10.0.0.1"));
        assert_eq!(cursor(&f, ResourceType::Host).await.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_updated_ip_is_applied_and_cursor_moves_to_last_event() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch()
            .withf(|req| req.cursor == "c1")
            .times(1)
            .returning(|_| {
                Ok(watched(vec![
                    host_event("c2", EventType::Update, 2, "10.0.0.3"),
                    host_event("c3", EventType::Update, 3, "10.0.0.9"),
                ]))
            });

        let f = fixture(Arc::new(cmdb), Some(topology(&[(2, 100), (3, 100)])));
        f.store.batch_create(&[host_spec(2, 100, "10.0.0.2")]).await.unwrap();
        f.ctx.checkpoints.set(ResourceType::Host, "c1").await.unwrap();

        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());
        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::Applied(2));

        let hosts = f.store.snapshot().await;
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].spec.inner_ipv4, vec!["10.0.0.3"]);
        assert_eq!(cursor(&f, ResourceType::Host).await.as_deref(), Some("c3"));
    }

    #[tokio::test]
    async fn test_chain_node_missing_resets_cursor() {
        let mut cmdb = MockCmdbClient::new();
        let mut seq = mockall::Sequence::new();
        cmdb.expect_watch()
            .withf(|req| req.cursor == "stale")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::cmdb(1103007, "event chain node not exist")));
        cmdb.expect_watch()
            .withf(|req| req.cursor.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(WatchResponse::default()));

        let f = fixture(Arc::new(cmdb), None);
        f.ctx.checkpoints.set(ResourceType::Host, "stale").await.unwrap();

        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());
        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::CursorReset);
        assert_eq!(cursor(&f, ResourceType::Host).await.as_deref(), Some(""));
        assert_eq!(f.ctx.metrics.cursor_resets("host"), 1);

        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::NoChange);
    }

    #[tokio::test]
    async fn test_transient_error_keeps_cursor() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch()
            .returning(|_| Err(Error::cmdb(1199000, "too many requests")));

        let f = fixture(Arc::new(cmdb), None);
        f.ctx.checkpoints.set(ResourceType::Host, "c5").await.unwrap();

        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());
        assert!(watcher.poll_once().await.is_err());
        assert_eq!(cursor(&f, ResourceType::Host).await.as_deref(), Some("c5"));
    }

    #[tokio::test]
    async fn test_not_watched_advances_to_first_event() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch().returning(|_| {
            Ok(WatchResponse {
                watched: false,
                events: vec![
                    host_event("latest", EventType::Create, 0, ""),
                    host_event("ignored", EventType::Create, 0, ""),
                ],
            })
        });

        let f = fixture(Arc::new(cmdb), None);
        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());

        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::NoChange);
        assert_eq!(cursor(&f, ResourceType::Host).await.as_deref(), Some("latest"));
        assert!(f.store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_event_is_skipped() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch().returning(|_| {
            Ok(watched(vec![
                host_event("c1", EventType::Create, 1, "10.0.0.1"),
                WatchEvent {
                    cursor: "c2".to_string(),
                    resource: ResourceType::Host,
                    event_type: EventType::Create,
                    detail: json!({"bk_host_id": "broken"}),
                },
            ]))
        });

        let f = fixture(Arc::new(cmdb), Some(topology(&[(1, 100)])));
        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());

        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::Applied(2));
        assert_eq!(f.store.snapshot().await.len(), 1);
        assert_eq!(cursor(&f, ResourceType::Host).await.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_delete_and_out_of_scope_update_remove_hosts() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch().returning(|_| {
            let mut moved = host_event("c2", EventType::Update, 2, "10.0.0.2");
            moved.detail["bk_cloud_vendor"] = json!("2");
            let mut foreign = host_event("c3", EventType::Create, 3, "10.0.0.3");
            foreign.detail["bk_cloud_vendor"] = json!("1");

            Ok(watched(vec![
                host_event("c1", EventType::Delete, 1, "10.0.0.1"),
                moved,
                foreign,
            ]))
        });

        let f = fixture(Arc::new(cmdb), Some(topology(&[])));
        f.store
            .batch_create(&[host_spec(1, 100, "10.0.0.1"), host_spec(2, 100, "10.0.0.2")])
            .await
            .unwrap();

        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());
        watcher.poll_once().await.unwrap();

        assert!(f.store.snapshot().await.is_empty());
        assert_eq!(cursor(&f, ResourceType::Host).await.as_deref(), Some("c3"));
    }

    #[tokio::test]
    async fn test_apply_failure_still_advances_cursor() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch()
            .returning(|_| Ok(watched(vec![host_event("c9", EventType::Create, 1, "10.0.0.1")])));

        let mut topology = MockTopologyResolver::new();
        topology
            .expect_resolve_owning_business()
            .returning(|_| Err(Error::Network("cmdb timeout".to_string())));

        let f = fixture(Arc::new(cmdb), Some(Arc::new(topology)));
        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());

        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::Applied(1));
        assert!(f.store.snapshot().await.is_empty());
        assert_eq!(cursor(&f, ResourceType::Host).await.as_deref(), Some("c9"));
    }

    #[tokio::test]
    async fn test_relation_events_only_rewrite_changed_business() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch()
            .withf(|req| {
                req.resource == ResourceType::HostRelation
                    && req.event_types == vec![EventType::Create]
            })
            .returning(|_| {
                Ok(watched(vec![
                    relation_event("r1", 1, 100),
                    relation_event("r2", 2, 100),
                    relation_event("r3", 2, 200),
                    relation_event("r4", 3, 300),
                ]))
            });
        cmdb.expect_list_hosts_by_ids()
            .withf(|ids, _| *ids == [3])
            .times(1)
            .returning(|_, _| {
                Ok(vec![SourceHost {
                    bk_host_id: 3,
                    bk_host_name: "h3".to_string(),
                    bk_host_innerip: "10.0.0.3".to_string(),
                    ..Default::default()
                }])
            });

        let f = fixture(Arc::new(cmdb), None);
        f.store
            .batch_create(&[host_spec(1, 100, "10.0.0.1"), host_spec(2, 100, "10.0.0.2")])
            .await
            .unwrap();

        let watcher = EventWatcher::new(ResourceType::HostRelation, f.ctx.clone());
        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::Applied(4));

        let hosts = f.store.snapshot().await;
        let owners: Vec<_> = hosts.iter().map(|h| (h.bk_host_id(), h.bk_biz_id())).collect();
        assert_eq!(owners, vec![(1, 100), (2, 200), (3, 300)]);
        // 主机 1 的关系回显没有产生写入
        assert_eq!(f.ctx.metrics.applied("update"), 1);
        assert_eq!(
            cursor(&f, ResourceType::HostRelation).await.as_deref(),
            Some("r4")
        );
    }

    #[tokio::test]
    async fn test_hosts_outside_configured_businesses_are_not_synced() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch()
            .withf(|req| req.resource == ResourceType::Host)
            .returning(|_| {
                Ok(watched(vec![
                    host_event("c1", EventType::Update, 7, "10.0.0.7"),
                    host_event("c2", EventType::Create, 8, "10.0.0.8"),
                ]))
            });
        cmdb.expect_watch()
            .withf(|req| req.resource == ResourceType::HostRelation)
            .returning(|_| {
                Ok(watched(vec![
                    relation_event("r1", 8, 999),
                    relation_event("r2", 9, 999),
                ]))
            });
        cmdb.expect_list_hosts_by_ids().never();

        let mut f = fixture(Arc::new(cmdb), Some(topology(&[(7, 999), (8, 100)])));
        f.ctx.scope = f.ctx.scope.clone().with_businesses([100]);
        // 主机 7 已被转移到未配置的业务 999
        f.store.batch_create(&[host_spec(7, 100, "10.0.0.7")]).await.unwrap();

        let hosts = EventWatcher::new(ResourceType::Host, f.ctx.clone());
        assert_eq!(hosts.poll_once().await.unwrap(), PollOutcome::Applied(2));

        let rows = f.store.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].spec, host_spec(8, 100, "10.0.0.8"));

        // 主机 8 转移到 999 后删除，未知的主机 9 不拉取
        let relations = EventWatcher::new(ResourceType::HostRelation, f.ctx.clone());
        assert_eq!(relations.poll_once().await.unwrap(), PollOutcome::Applied(2));

        assert!(f.store.snapshot().await.is_empty());
        assert_eq!(f.ctx.metrics.applied("update"), 0);
        assert_eq!(
            cursor(&f, ResourceType::HostRelation).await.as_deref(),
            Some("r2")
        );
    }

    #[tokio::test]
    async fn test_failed_relation_update_still_adds_missing_hosts() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch().returning(|_| {
            Ok(watched(vec![
                relation_event("r1", 2, 200),
                relation_event("r2", 3, 300),
            ]))
        });
        cmdb.expect_list_hosts_by_ids()
            .withf(|ids, _| *ids == [3])
            .times(1)
            .returning(|_, _| {
                Ok(vec![SourceHost {
                    bk_host_id: 3,
                    bk_host_name: "h3".to_string(),
                    ..Default::default()
                }])
            });

        let mut store = MockInventoryStore::new();
        store.expect_list().returning(|_, page| {
            if page.start > 0 {
                return Ok(Vec::new());
            }
            Ok(vec![InventoryHost::new("id-2", host_spec(2, 100, "10.0.0.2"))])
        });
        store
            .expect_batch_update()
            .times(1)
            .returning(|_| Err(Error::Store("rejected".to_string())));
        store
            .expect_batch_create()
            .withf(|hosts| hosts.len() == 1 && hosts[0].bk_host_id == 3 && hosts[0].bk_biz_id == 300)
            .times(1)
            .returning(|_| Ok(vec!["id-3".to_string()]));
        let store = Arc::new(store);

        let mut f = fixture(Arc::new(cmdb), None);
        f.ctx.store = store.clone();
        f.ctx.applier = Arc::new(InventoryApplier::new(store, 2, f.ctx.metrics.clone()));

        let watcher = EventWatcher::new(ResourceType::HostRelation, f.ctx.clone());
        assert_eq!(watcher.poll_once().await.unwrap(), PollOutcome::Applied(2));

        assert_eq!(f.ctx.metrics.applied("add"), 1);
        assert_eq!(
            cursor(&f, ResourceType::HostRelation).await.as_deref(),
            Some("r2")
        );
    }

    #[tokio::test]
    async fn test_duplicate_rows_are_collapsed_on_upsert() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch()
            .returning(|_| Ok(watched(vec![host_event("c1", EventType::Update, 1, "10.0.0.1")])));

        let f = fixture(Arc::new(cmdb), Some(topology(&[(1, 100)])));
        f.store
            .insert_raw(InventoryHost::new("a", host_spec(1, 100, "10.0.0.1")))
            .await;
        f.store
            .insert_raw(InventoryHost::new("b", host_spec(1, 100, "10.0.0.1")))
            .await;

        let watcher = EventWatcher::new(ResourceType::Host, f.ctx.clone());
        watcher.poll_once().await.unwrap();

        let hosts = f.store.snapshot().await;
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_leadership_and_stops_on_cancel() {
        let mut cmdb = MockCmdbClient::new();
        cmdb.expect_watch().returning(|_| Ok(WatchResponse::default()));

        let f = fixture(Arc::new(cmdb), None);
        f.leader.set_leader(false);

        let watcher = Arc::new(EventWatcher::new(ResourceType::Host, f.ctx.clone()));
        let token = CancellationToken::new();
        let handle = {
            let watcher = watcher.clone();
            let token = token.clone();
            tokio::spawn(async move { watcher.run(token).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        let polls = "invsync_watch_polls_total{resource=\"host\"}";
        assert!(!f.ctx.metrics.render().unwrap().contains(polls));

        f.leader.set_leader(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.ctx.metrics.render().unwrap().contains(polls));

        token.cancel();
        handle.await.unwrap();
    }
}
