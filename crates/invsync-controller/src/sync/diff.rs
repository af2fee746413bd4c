//! 差异计算
//!
//! 比较 CMDB 主机（已带所属业务）与主机库记录，生成新增、更新、删除计划。
//! 两侧按 CMDB 主机 ID 关联，结果按主机 ID 排序，相同输入总是得到相同计划。

use invsync_common::{HostSpec, InventoryHost};
use std::collections::BTreeMap;

/// 同步计划
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    /// 需要新增的主机
    pub adds: Vec<HostSpec>,
    /// 需要更新的主机，携带完整的新记录
    pub updates: Vec<InventoryHost>,
    /// 需要删除的主机库主键
    pub deletes: Vec<String>,
}

impl DiffPlan {
    /// 计划是否为空
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// 计算同步计划
///
/// 同一主机 ID 在主机库中有多条记录时保留主键最小的一条，其余删除。
pub fn diff(source: &[HostSpec], inventory: &[InventoryHost]) -> DiffPlan {
    let source: BTreeMap<i64, &HostSpec> = source.iter().map(|s| (s.bk_host_id, s)).collect();

    let mut sorted: Vec<&InventoryHost> = inventory.iter().collect();
    sorted.sort_by(|a, b| (a.bk_host_id(), &a.id).cmp(&(b.bk_host_id(), &b.id)));

    let mut existing: BTreeMap<i64, &InventoryHost> = BTreeMap::new();
    let mut plan = DiffPlan::default();

    for host in sorted {
        if existing.contains_key(&host.bk_host_id()) || !source.contains_key(&host.bk_host_id()) {
            plan.deletes.push(host.id.clone());
        } else {
            existing.insert(host.bk_host_id(), host);
        }
    }

    for (host_id, spec) in source {
        match existing.get(&host_id) {
            None => plan.adds.push(spec.clone()),
            Some(current) if !same_tracked_fields(&current.spec, spec) => {
                plan.updates.push(InventoryHost::new(current.id.clone(), spec.clone()));
            }
            Some(_) => {}
        }
    }

    plan
}

/// 比较同步关心的字段
///
/// IP 列表按逗号拼接后比较，顺序不同也视为变化。
pub fn same_tracked_fields(current: &HostSpec, desired: &HostSpec) -> bool {
    current.bk_host_id == desired.bk_host_id
        && current.bk_biz_id == desired.bk_biz_id
        && current.name == desired.name
        && current.bk_cloud_id == desired.bk_cloud_id
        && current.region == desired.region
        && current.zone == desired.zone
        && joined(&current.inner_ipv4) == joined(&desired.inner_ipv4)
        && joined(&current.inner_ipv6) == joined(&desired.inner_ipv6)
        && joined(&current.outer_ipv4) == joined(&desired.outer_ipv4)
        && joined(&current.outer_ipv6) == joined(&desired.outer_ipv6)
        && current.os_type == desired.os_type
        && current.os_name == desired.os_name
        && current.vendor == desired.vendor
        && current.host_source == desired.host_source
        && current.asset_id == desired.asset_id
        && current.instance_id == desired.instance_id
}

fn joined(ips: &[String]) -> String {
    ips.join(",")
}
