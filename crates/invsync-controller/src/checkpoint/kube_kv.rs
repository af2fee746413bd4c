//! 基于 Kubernetes 对象的带租约键值存储
//!
//! 租约保存为 `coordination.k8s.io/v1` Lease 对象，按 `renewTime + leaseDurationSeconds`
//! 判断是否过期；键值保存为 ConfigMap，并通过标签记录所绑定的租约。
//! 读取时租约不存在或已过期的键视为不存在，与 etcd 租约语义一致。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use invsync_common::{Error, Result};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{LeaseId, LeaseKv};
use crate::config::CheckpointConfig;
use crate::leader::lease_expired;

const NAME_PREFIX: &str = "invsync-checkpoint";
const LEASE_LABEL: &str = "invsync.io/lease";
const FIELD_MANAGER: &str = "invsync";
const KEY_FIELD: &str = "key";
const VALUE_FIELD: &str = "value";

/// Kubernetes 对象实现的带租约键值存储
pub struct KubeLeaseKv {
    leases: Api<Lease>,
    config_maps: Api<ConfigMap>,
    /// 写入租约持有者字段的实例身份
    identity: String,
}

impl KubeLeaseKv {
    /// 创建键值存储，租约和键值都保存在给定命名空间
    pub fn new(client: Client, namespace: &str, identity: impl Into<String>) -> Self {
        Self {
            leases: Api::namespaced(client.clone(), namespace),
            config_maps: Api::namespaced(client, namespace),
            identity: identity.into(),
        }
    }

    /// 按配置创建键值存储
    pub fn from_config(
        client: Client,
        config: &CheckpointConfig,
        identity: impl Into<String>,
    ) -> Self {
        Self::new(client, &config.kube_namespace, identity)
    }

    async fn get_lease(&self, name: &str) -> Result<Option<Lease>> {
        self.leases
            .get_opt(name)
            .await
            .map_err(|e| Error::Lease(format!("获取租约 {} 失败: {}", name, e)))
    }

    /// 读取未过期的租约，不存在或已过期时返回错误
    async fn live_lease(&self, lease: LeaseId) -> Result<Lease> {
        let name = lease_object_name(lease);
        match self.get_lease(&name).await? {
            Some(object) if lease_alive(object.spec.as_ref(), Utc::now()) => Ok(object),
            _ => Err(Error::Lease(format!("租约 {} 不存在或已过期", lease))),
        }
    }

    /// 删除租约已失效的键及其租约，失败只记录日志
    async fn remove_stale(&self, name: &str, lease_name: Option<&str>) {
        if let Err(e) = self.config_maps.delete(name, &DeleteParams::default()).await {
            warn!("删除过期键 {} 失败: {}", name, e);
        }
        if let Some(lease_name) = lease_name {
            if let Err(e) = self.leases.delete(lease_name, &DeleteParams::default()).await {
                debug!("删除过期租约 {} 失败: {}", lease_name, e);
            }
        }
    }
}

#[async_trait]
impl LeaseKv for KubeLeaseKv {
    async fn grant(&self, ttl_seconds: i64) -> Result<LeaseId> {
        let lease = new_lease_id();
        let object = Lease {
            metadata: ObjectMeta {
                name: Some(lease_object_name(lease)),
                ..Default::default()
            },
            spec: Some(lease_spec(&self.identity, ttl_seconds, Utc::now())?),
        };

        self.leases
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| Error::Lease(format!("申请租约失败: {}", e)))?;

        debug!("已申请租约 {}，有效期 {} 秒", lease, ttl_seconds);
        Ok(lease)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        let mut object = self.live_lease(lease).await?;
        if let Some(spec) = object.spec.as_mut() {
            spec.renew_time = Some(MicroTime(Utc::now()));
        }

        match self
            .leases
            .replace(&lease_object_name(lease), &PostParams::default(), &object)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                Err(Error::Lease(format!("租约 {} 已被并发修改", lease)))
            }
            Err(e) => Err(Error::Lease(format!("续期租约 {} 失败: {}", lease, e))),
        }
    }

    async fn put(&self, key: &str, value: &str, lease: LeaseId) -> Result<()> {
        self.live_lease(lease).await?;

        let name = object_name(key)?;
        let object = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([(
                    LEASE_LABEL.to_string(),
                    lease_object_name(lease),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (KEY_FIELD.to_string(), key.to_string()),
                (VALUE_FIELD.to_string(), value.to_string()),
            ])),
            ..Default::default()
        };

        self.config_maps
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&object),
            )
            .await
            .map_err(|e| Error::Checkpoint(format!("写入键 {} 失败: {}", key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let name = object_name(key)?;
        let Some(object) = self
            .config_maps
            .get_opt(&name)
            .await
            .map_err(|e| Error::Checkpoint(format!("读取键 {} 失败: {}", key, e)))?
        else {
            return Ok(None);
        };

        let lease_name = bound_lease(&object);
        let lease = match lease_name {
            Some(lease_name) => self.get_lease(lease_name).await?,
            None => None,
        };

        let value = live_value(&object, lease.as_ref(), key, Utc::now())?;
        if value.is_none() {
            debug!("键 {} 的租约已失效", key);
            self.remove_stale(&name, lease_name).await;
        }
        Ok(value)
    }
}

/// 键对应的 ConfigMap 名称
///
/// 键中的非字母数字字符替换为 `-`，原始键保存在数据中用于校验。
fn object_name(key: &str) -> Result<String> {
    let suffix: String = key
        .trim_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();

    let name = format!("{}-{}", NAME_PREFIX, suffix.trim_matches('-'));
    if name.len() > 253 {
        return Err(Error::Checkpoint(format!("键过长: {}", key)));
    }
    Ok(name)
}

fn lease_object_name(lease: LeaseId) -> String {
    format!("{}-lease-{}", NAME_PREFIX, lease)
}

fn new_lease_id() -> LeaseId {
    (Uuid::new_v4().as_u128() >> 65) as LeaseId
}

/// 新租约的 Lease 内容
fn lease_spec(identity: &str, ttl_seconds: i64, now: DateTime<Utc>) -> Result<LeaseSpec> {
    let seconds = i32::try_from(ttl_seconds)
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| Error::Lease(format!("无效的租约有效期: {}", ttl_seconds)))?;

    Ok(LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(seconds),
        acquire_time: Some(MicroTime(now)),
        renew_time: Some(MicroTime(now)),
        ..Default::default()
    })
}

fn lease_alive(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    spec.map_or(false, |spec| !lease_expired(spec, now))
}

fn bound_lease(object: &ConfigMap) -> Option<&str> {
    object
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LEASE_LABEL))
        .map(String::as_str)
}

/// 按绑定租约的状态解析键值，租约缺失或过期时返回 None
fn live_value(
    object: &ConfigMap,
    lease: Option<&Lease>,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    let data = object.data.as_ref();
    let stored_key = data.and_then(|d| d.get(KEY_FIELD)).map(String::as_str);
    if stored_key != Some(key) {
        return Err(Error::Checkpoint(format!(
            "键 {} 与已存储的键 {:?} 冲突",
            key, stored_key
        )));
    }

    if !lease_alive(lease.and_then(|l| l.spec.as_ref()), now) {
        return Ok(None);
    }

    Ok(data.and_then(|d| d.get(VALUE_FIELD)).cloned())
}
