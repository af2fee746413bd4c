//! 主机模型
//!
//! 该模块定义 CMDB 侧的主机记录（只读，来自配置平台）以及本地主机库中的镜像记录。
//! CMDB 主机本身不带所属业务字段，业务归属通过拓扑查询得到后再组装成本地记录。

use serde::{Deserialize, Serialize};

/// CMDB 主机记录
///
/// 字段名与 CMDB 接口保持一致，IP 类字段在接口上是逗号拼接的字符串。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHost {
    /// CMDB 主机 ID
    pub bk_host_id: i64,
    /// 主机名
    #[serde(default)]
    pub bk_host_name: String,
    /// 管控区域 ID
    #[serde(default)]
    pub bk_cloud_id: i64,
    /// 云地域
    #[serde(default)]
    pub bk_cloud_region: String,
    /// 云可用区
    #[serde(default)]
    pub bk_cloud_zone: String,
    /// 内网 IPv4，逗号分隔
    #[serde(default)]
    pub bk_host_innerip: String,
    /// 内网 IPv6，逗号分隔
    #[serde(default)]
    pub bk_host_innerip_v6: String,
    /// 外网 IPv4，逗号分隔
    #[serde(default)]
    pub bk_host_outerip: String,
    /// 外网 IPv6，逗号分隔
    #[serde(default)]
    pub bk_host_outerip_v6: String,
    /// 操作系统类型
    #[serde(default)]
    pub bk_os_type: String,
    /// 操作系统名称
    #[serde(default)]
    pub bk_os_name: String,
    /// 云厂商编码
    #[serde(default)]
    pub bk_cloud_vendor: String,
    /// 主机来源分类
    #[serde(default)]
    pub bk_host_source: String,
    /// 固资编号
    #[serde(default)]
    pub bk_asset_id: String,
    /// 云主机实例 ID
    #[serde(default)]
    pub bk_cloud_inst_id: String,
}

impl SourceHost {
    /// 同步时需要向 CMDB 请求的字段
    pub const FIELDS: &'static [&'static str] = &[
        "bk_host_id",
        "bk_host_name",
        "bk_cloud_id",
        "bk_cloud_region",
        "bk_cloud_zone",
        "bk_host_innerip",
        "bk_host_innerip_v6",
        "bk_host_outerip",
        "bk_host_outerip_v6",
        "bk_os_type",
        "bk_os_name",
        "bk_cloud_vendor",
        "bk_host_source",
        "bk_asset_id",
        "bk_cloud_inst_id",
    ];

    /// 结合业务归属生成本地主机规格
    pub fn to_spec(&self, bk_biz_id: i64) -> HostSpec {
        HostSpec {
            bk_host_id: self.bk_host_id,
            bk_biz_id,
            name: self.bk_host_name.clone(),
            bk_cloud_id: self.bk_cloud_id,
            region: self.bk_cloud_region.clone(),
            zone: self.bk_cloud_zone.clone(),
            inner_ipv4: split_ips(&self.bk_host_innerip),
            inner_ipv6: split_ips(&self.bk_host_innerip_v6),
            outer_ipv4: split_ips(&self.bk_host_outerip),
            outer_ipv6: split_ips(&self.bk_host_outerip_v6),
            os_type: self.bk_os_type.clone(),
            os_name: self.bk_os_name.clone(),
            vendor: self.bk_cloud_vendor.clone(),
            host_source: self.bk_host_source.clone(),
            asset_id: self.bk_asset_id.clone(),
            instance_id: self.bk_cloud_inst_id.clone(),
        }
    }
}

/// 拆分 CMDB 逗号拼接的 IP 字段，保留原有顺序
pub fn split_ips(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .collect()
}

/// 本地主机规格（不含主键）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    /// CMDB 主机 ID，用于与 CMDB 记录关联
    pub bk_host_id: i64,
    /// 所属业务 ID
    pub bk_biz_id: i64,
    /// 主机名
    pub name: String,
    /// 管控区域 ID
    pub bk_cloud_id: i64,
    /// 云地域
    pub region: String,
    /// 云可用区
    pub zone: String,
    /// 内网 IPv4
    pub inner_ipv4: Vec<String>,
    /// 内网 IPv6
    pub inner_ipv6: Vec<String>,
    /// 外网 IPv4
    pub outer_ipv4: Vec<String>,
    /// 外网 IPv6
    pub outer_ipv6: Vec<String>,
    /// 操作系统类型
    pub os_type: String,
    /// 操作系统名称
    pub os_name: String,
    /// 云厂商编码
    pub vendor: String,
    /// 主机来源分类
    pub host_source: String,
    /// 固资编号
    pub asset_id: String,
    /// 云主机实例 ID
    pub instance_id: String,
}

/// 本地主机库记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryHost {
    /// 主机库分配的主键
    pub id: String,
    /// 主机规格
    #[serde(flatten)]
    pub spec: HostSpec,
}

impl InventoryHost {
    /// 创建主机库记录
    pub fn new(id: impl Into<String>, spec: HostSpec) -> Self {
        Self {
            id: id.into(),
            spec,
        }
    }

    /// CMDB 主机 ID
    pub fn bk_host_id(&self) -> i64 {
        self.spec.bk_host_id
    }

    /// 所属业务 ID
    pub fn bk_biz_id(&self) -> i64 {
        self.spec.bk_biz_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", vec![])]
    #[case("10.0.0.1", vec!["10.0.0.1"])]
    #[case("10.0.0.2,10.0.0.1", vec!["10.0.0.2", "10.0.0.1"])]
    #[case(" 10.0.0.1 ,,10.0.0.3", vec!["10.0.0.1", "10.0.0.3"])]
    fn test_split_ips(#[case] raw: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_ips(raw), expected);
    }

    #[test]
    fn test_source_host_decode_with_missing_fields() {
        let host: SourceHost = serde_json::from_str(
            r#"{"bk_host_id": 7, "bk_host_innerip": "10.0.0.1", "unknown": 1}"#,
        )
        .unwrap();

        assert_eq!(host.bk_host_id, 7);
        assert_eq!(host.bk_host_innerip, "10.0.0.1");
        assert!(host.bk_cloud_vendor.is_empty());
    }

    #[test]
    fn test_to_spec_carries_business() {
        let host = SourceHost {
            bk_host_id: 1,
            bk_host_name: "h1".to_string(),
            bk_host_innerip: "10.0.0.1,10.0.0.2".to_string(),
            ..Default::default()
        };

        let spec = host.to_spec(42);
        assert_eq!(spec.bk_biz_id, 42);
        assert_eq!(spec.name, "h1");
        assert_eq!(spec.inner_ipv4, vec!["10.0.0.1", "10.0.0.2"]);
        assert!(spec.outer_ipv4.is_empty());
    }
}
