//! 基于 Kubernetes Lease 的选主
//!
//! 持有者身份和续期时间记录在 `coordination.k8s.io/v1` Lease 对象中，
//! 通过 `resourceVersion` 乐观并发控制避免两个实例同时接管。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use invsync_common::{Error, Result};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::LeaderGate;
use crate::config::LeaderConfig;

/// Kubernetes Lease 选主
pub struct KubeLeaseGate {
    /// Lease API
    api: Api<Lease>,
    /// Lease 名称
    lease_name: String,
    /// 当前实例身份
    identity: String,
    /// 租约时长
    lease_duration: Duration,
    /// 最近一次选主结果
    leader: AtomicBool,
}

impl KubeLeaseGate {
    /// 创建 Lease 选主
    pub fn new(
        client: Client,
        namespace: &str,
        lease_name: impl Into<String>,
        identity: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: lease_name.into(),
            identity: identity.into(),
            lease_duration,
            leader: AtomicBool::new(false),
        }
    }

    /// 按配置创建 Lease 选主
    pub fn from_config(client: Client, config: &LeaderConfig, identity: impl Into<String>) -> Self {
        Self::new(
            client,
            &config.lease_namespace,
            config.lease_name.clone(),
            identity,
            Duration::from_secs(config.lease_duration_seconds),
        )
    }

    async fn acquire(&self) -> Result<bool> {
        let now = Utc::now();
        let lease = self
            .api
            .get_opt(&self.lease_name)
            .await
            .map_err(|e| Error::Leader(format!("获取 Lease {} 失败: {}", self.lease_name, e)))?;

        match lease {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(self.lease_name.clone()),
                        ..Default::default()
                    },
                    spec: Some(self.claim(&LeaseSpec::default(), now)?),
                };

                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => {
                        info!("已创建 Lease {}，持有者 {}", self.lease_name, self.identity);
                        Ok(true)
                    }
                    Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
                    Err(e) => Err(Error::Leader(format!("创建 Lease 失败: {}", e))),
                }
            }
            Some(mut lease) => {
                let spec = lease.spec.clone().unwrap_or_default();
                let held_by_self = spec.holder_identity.as_deref() == Some(self.identity.as_str());

                if !held_by_self && !lease_expired(&spec, now) {
                    debug!(
                        "Lease {} 由 {:?} 持有",
                        self.lease_name, spec.holder_identity
                    );
                    return Ok(false);
                }

                lease.spec = Some(self.claim(&spec, now)?);
                match self
                    .api
                    .replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
                    Err(e) => Err(Error::Leader(format!("续期 Lease 失败: {}", e))),
                }
            }
        }
    }

    fn claim(&self, current: &LeaseSpec, now: DateTime<Utc>) -> Result<LeaseSpec> {
        claim_spec(&self.identity, self.lease_duration, current, now)
    }
}

/// 以给定身份占有租约，持有者变化时递增 `lease_transitions`
pub(crate) fn claim_spec(
    identity: &str,
    lease_duration: Duration,
    current: &LeaseSpec,
    now: DateTime<Utc>,
) -> Result<LeaseSpec> {
    let seconds = i32::try_from(lease_duration.as_secs())
        .map_err(|_| Error::Leader(format!("租约时长过长: {:?}", lease_duration)))?;
    let held_by_self = current.holder_identity.as_deref() == Some(identity);
    let transitions = current.lease_transitions.unwrap_or(0);

    Ok(LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(seconds),
        acquire_time: if held_by_self {
            current.acquire_time.clone()
        } else {
            Some(MicroTime(now))
        },
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(if held_by_self || current.holder_identity.is_none() {
            transitions
        } else {
            transitions + 1
        }),
        ..Default::default()
    })
}

/// 判断租约是否已过期，未设置续期时间或持有者视为过期
pub(crate) fn lease_expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    if spec.holder_identity.as_deref().map_or(true, str::is_empty) {
        return true;
    }

    match (&spec.renew_time, spec.lease_duration_seconds) {
        (Some(MicroTime(renewed)), Some(seconds)) => {
            *renewed + chrono::Duration::seconds(i64::from(seconds)) < now
        }
        _ => true,
    }
}

#[async_trait]
impl LeaderGate for KubeLeaseGate {
    async fn try_acquire(&self) -> Result<bool> {
        let result = self.acquire().await;
        self.leader
            .store(matches!(result, Ok(true)), Ordering::SeqCst);
        result
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}
