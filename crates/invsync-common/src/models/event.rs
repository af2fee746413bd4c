//! 事件模型
//!
//! 该模块定义 CMDB 资源监听接口的请求/响应结构、事件类型以及游标。
//! 事件详情按资源类型解析为强类型的 [`EventDetail`]。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::host::SourceHost;

/// 监听的资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// 主机
    #[serde(rename = "host")]
    Host,
    /// 主机与业务拓扑的关联关系
    #[serde(rename = "host_relation")]
    HostRelation,
}

impl ResourceType {
    /// 所有需要监听的资源类型
    pub const ALL: [ResourceType; 2] = [ResourceType::Host, ResourceType::HostRelation];

    /// CMDB 接口中的资源名
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Host => "host",
            ResourceType::HostRelation => "host_relation",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "host" => Ok(ResourceType::Host),
            "host_relation" => Ok(ResourceType::HostRelation),
            _ => Err(Error::Decode(format!("无效的资源类型: {}", s))),
        }
    }
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// 创建
    Create,
    /// 更新
    Update,
    /// 删除
    Delete,
}

impl EventType {
    /// 全部事件类型
    pub const ALL: [EventType; 3] = [EventType::Create, EventType::Update, EventType::Delete];
}

/// 游标
///
/// 标识 CMDB 事件流中的一个位置，空 token 表示"从当前时间开始监听"。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// 资源类型
    pub resource: ResourceType,
    /// 不透明的游标值
    pub token: String,
}

impl Cursor {
    /// 创建游标
    pub fn new(resource: ResourceType, token: impl Into<String>) -> Self {
        Self {
            resource,
            token: token.into(),
        }
    }

    /// 从当前时间开始监听的游标
    pub fn from_now(resource: ResourceType) -> Self {
        Self::new(resource, String::new())
    }

    /// 是否为空游标
    pub fn is_from_now(&self) -> bool {
        self.token.is_empty()
    }
}

/// 资源监听请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchRequest {
    /// 关注的事件类型
    #[serde(rename = "bk_event_types")]
    pub event_types: Vec<EventType>,
    /// 资源类型
    #[serde(rename = "bk_resource")]
    pub resource: ResourceType,
    /// 关注的字段，为空表示全部字段
    #[serde(rename = "bk_fields", default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// 起始游标
    #[serde(rename = "bk_cursor", default, skip_serializing_if = "String::is_empty")]
    pub cursor: String,
}

/// 资源监听响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchResponse {
    /// 是否监听到新的事件位置
    #[serde(rename = "bk_watched")]
    pub watched: bool,
    /// 事件列表
    #[serde(rename = "bk_events", default)]
    pub events: Vec<WatchEvent>,
}

/// 单个监听事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// 该事件对应的游标
    #[serde(rename = "bk_cursor")]
    pub cursor: String,
    /// 资源类型
    #[serde(rename = "bk_resource")]
    pub resource: ResourceType,
    /// 事件类型
    #[serde(rename = "bk_event_type")]
    pub event_type: EventType,
    /// 事件详情，按资源类型解析
    #[serde(rename = "bk_detail", default)]
    pub detail: serde_json::Value,
}

impl WatchEvent {
    /// 按资源类型解析事件详情
    pub fn decode_detail(&self) -> Result<EventDetail> {
        let detail = match self.resource {
            ResourceType::Host => {
                EventDetail::Host(serde_json::from_value(self.detail.clone())?)
            }
            ResourceType::HostRelation => {
                EventDetail::HostRelation(serde_json::from_value(self.detail.clone())?)
            }
        };

        Ok(detail)
    }
}

/// 强类型的事件详情
#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
    /// 主机详情
    Host(SourceHost),
    /// 主机关系详情
    HostRelation(HostRelation),
}

/// 主机与业务的关联关系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostRelation {
    /// CMDB 主机 ID
    pub bk_host_id: i64,
    /// 业务 ID
    pub bk_biz_id: i64,
}

impl HostRelation {
    /// 监听主机关系时关注的字段
    pub const FIELDS: &'static [&'static str] = &["bk_host_id", "bk_biz_id"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_watch_request_omits_empty_cursor() {
        let req = WatchRequest {
            event_types: EventType::ALL.to_vec(),
            resource: ResourceType::Host,
            fields: vec![],
            cursor: String::new(),
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["bk_resource"], "host");
        assert_eq!(value["bk_event_types"], json!(["create", "update", "delete"]));
        assert!(value.get("bk_cursor").is_none());
        assert!(value.get("bk_fields").is_none());
    }

    #[test]
    fn test_decode_watch_response() {
        let resp: WatchResponse = serde_json::from_value(json!({
            "bk_watched": true,
            "bk_events": [{
                "bk_cursor": "c1",
                "bk_resource": "host_relation",
                "bk_event_type": "create",
                "bk_detail": {"bk_host_id": 1, "bk_biz_id": 2, "bk_set_id": 3}
            }]
        }))
        .unwrap();

        assert!(resp.watched);
        let detail = resp.events[0].decode_detail().unwrap();
        assert_eq!(
            detail,
            EventDetail::HostRelation(HostRelation { bk_host_id: 1, bk_biz_id: 2 })
        );
    }

    #[test]
    fn test_decode_detail_dispatches_by_resource() {
        let event = WatchEvent {
            cursor: "c2".to_string(),
            resource: ResourceType::Host,
            event_type: EventType::Update,
            detail: json!({"bk_host_id": 9, "bk_host_name": "h9"}),
        };

        match event.decode_detail().unwrap() {
            EventDetail::Host(host) => assert_eq!(host.bk_host_name, "h9"),
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed_detail() {
        let event = WatchEvent {
            cursor: "c3".to_string(),
            resource: ResourceType::Host,
            event_type: EventType::Create,
            detail: json!({"bk_host_id": "not-a-number"}),
        };

        assert!(matches!(event.decode_detail(), Err(Error::Json(_))));
    }

    #[test]
    fn test_resource_type_round_trip() {
        for resource in ResourceType::ALL {
            assert_eq!(resource.as_str().parse::<ResourceType>().unwrap(), resource);
        }
        assert!("biz".parse::<ResourceType>().is_err());
    }
}
