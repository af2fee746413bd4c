//! 同步范围
//!
//! 云厂商主机由各自的云同步任务维护，本引擎只同步其余主机。
//! 配置了对账业务时，增量同步与全量对账都只处理这些业务下的主机，
//! 其他业务的主机不写入主机库，已有记录按移出范围删除。

use invsync_common::SourceHost;
use std::collections::HashSet;

use crate::config::SyncConfig;

/// 同步范围过滤器
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    excluded_vendors: HashSet<String>,
    /// 为空表示全部业务
    businesses: Option<HashSet<i64>>,
}

impl ScopeFilter {
    /// 创建范围过滤器，默认包含全部业务
    pub fn new<I, S>(excluded_vendors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_vendors: excluded_vendors.into_iter().map(Into::into).collect(),
            businesses: None,
        }
    }

    /// 只同步给定业务下的主机，空集合表示全部业务
    pub fn with_businesses<I>(mut self, businesses: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let businesses: HashSet<i64> = businesses.into_iter().collect();
        self.businesses = if businesses.is_empty() {
            None
        } else {
            Some(businesses)
        };
        self
    }

    /// 主机是否由本引擎同步
    pub fn in_scope(&self, host: &SourceHost) -> bool {
        !self.excluded_vendors.contains(&host.bk_cloud_vendor)
    }

    /// 业务是否在同步范围内
    pub fn business_in_scope(&self, bk_biz_id: i64) -> bool {
        self.businesses
            .as_ref()
            .map_or(true, |businesses| businesses.contains(&bk_biz_id))
    }
}

impl From<&SyncConfig> for ScopeFilter {
    fn from(config: &SyncConfig) -> Self {
        Self::new(config.scope.excluded_vendors.iter().cloned())
            .with_businesses(config.full_sync.businesses.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_vendor_is_out_of_scope() {
        let scope = ScopeFilter::from(&SyncConfig::default());

        let mut host = SourceHost {
            bk_host_id: 1,
            ..Default::default()
        };
        assert!(scope.in_scope(&host));

        host.bk_cloud_vendor = "2".to_string();
        assert!(!scope.in_scope(&host));

        host.bk_cloud_vendor = "5".to_string();
        assert!(scope.in_scope(&host));
    }

    #[test]
    fn test_configured_businesses_limit_scope() {
        let scope = ScopeFilter::from(&SyncConfig::default());
        assert!(scope.business_in_scope(999));

        let mut config = SyncConfig::default();
        config.full_sync.businesses = vec![100, 200];
        let scope = ScopeFilter::from(&config);
        assert!(scope.business_in_scope(100));
        assert!(!scope.business_in_scope(999));
    }
}
