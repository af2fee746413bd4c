//! 配置管理模块
//!
//! 该模块负责加载同步引擎的配置文件，支持 YAML/JSON 格式，
//! 并允许通过 `INVSYNC__` 前缀的环境变量覆盖配置项。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 同步引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 游标存储配置
    pub checkpoint: CheckpointConfig,
    /// 选主配置
    pub leader: LeaderConfig,
    /// 事件监听配置
    pub watch: WatchConfig,
    /// 全量对账配置
    pub full_sync: FullSyncConfig,
    /// 主机库写入配置
    pub applier: ApplierConfig,
    /// 同步范围配置
    pub scope: ScopeConfig,
    /// CMDB 相关配置
    pub cmdb: CmdbConfig,
    /// 日志配置
    pub log: LogConfig,
}

/// 游标存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// 键命名空间
    pub namespace: String,
    /// 事件来源
    pub source: String,
    /// 租约有效期（秒）
    pub lease_ttl_seconds: i64,
    /// 使用 Kubernetes 存储游标时的命名空间
    pub kube_namespace: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            namespace: "hcm".to_string(),
            source: "cmdb".to_string(),
            lease_ttl_seconds: 3600,
            kube_namespace: "default".to_string(),
        }
    }
}

/// 选主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    /// 非主节点的重试间隔（秒）
    pub backoff_seconds: u64,
    /// 选主续期间隔（秒）
    pub renew_interval_seconds: u64,
    /// Lease 所在命名空间
    pub lease_namespace: String,
    /// Lease 名称
    pub lease_name: String,
    /// Lease 时长（秒），应大于续期间隔
    pub lease_duration_seconds: u64,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            backoff_seconds: 10,
            renew_interval_seconds: 5,
            lease_namespace: "default".to_string(),
            lease_name: "invsync-leader".to_string(),
            lease_duration_seconds: 15,
        }
    }
}

/// 事件监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// 监听失败或无事件时的重试间隔（毫秒）
    pub retry_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1000,
        }
    }
}

/// 全量对账配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FullSyncConfig {
    /// 对账间隔（秒）
    pub interval_seconds: u64,
    /// 分页大小
    pub page_size: usize,
    /// 需要对账的业务，为空表示从 CMDB 拉取全部业务
    pub businesses: Vec<i64>,
}

impl Default for FullSyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 6 * 3600,
            page_size: 500,
            businesses: Vec::new(),
        }
    }
}

/// 主机库写入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplierConfig {
    /// 单批最大条数
    pub batch_size: usize,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// 同步范围配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// 不由本引擎同步的云厂商编码，这些主机由各云厂商的同步任务维护
    pub excluded_vendors: Vec<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            // AWS、腾讯云、GCP、Azure、华为云
            excluded_vendors: ["1", "2", "3", "4", "15"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }
}

/// CMDB 相关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CmdbConfig {
    /// 表示"事件链节点不存在"的错误码
    pub cursor_expired_codes: Vec<i64>,
    /// 拓扑查询单批主机数
    pub relation_batch_size: usize,
}

impl Default for CmdbConfig {
    fn default() -> Self {
        Self {
            cursor_expired_codes: vec![1103007],
            relation_batch_size: 500,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 日志级别
    pub level: String,
    /// 是否输出 JSON 格式
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SyncConfig {
    /// 从文件加载配置，环境变量优先
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_file = config_path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

        // 确定配置文件格式
        let format = match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
        };

        let config = Config::builder()
            .add_source(File::with_name(config_file).format(format))
            .add_source(
                Environment::with_prefix("INVSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("构建配置失败")?;

        let sync_config = config
            .try_deserialize::<SyncConfig>()
            .context("配置格式错误")?;

        sync_config.validate()?;
        Ok(sync_config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint.lease_ttl_seconds <= 0 {
            return Err(anyhow!("checkpoint.lease_ttl_seconds 必须大于 0"));
        }
        if self.full_sync.page_size == 0 {
            return Err(anyhow!("full_sync.page_size 必须大于 0"));
        }
        if self.full_sync.interval_seconds == 0 {
            return Err(anyhow!("full_sync.interval_seconds 必须大于 0"));
        }
        if self.applier.batch_size == 0 {
            return Err(anyhow!("applier.batch_size 必须大于 0"));
        }
        if self.leader.renew_interval_seconds == 0
            || self.leader.lease_duration_seconds <= self.leader.renew_interval_seconds
        {
            return Err(anyhow!(
                "leader.lease_duration_seconds 必须大于 leader.renew_interval_seconds"
            ));
        }
        if i32::try_from(self.leader.lease_duration_seconds).is_err() {
            return Err(anyhow!("leader.lease_duration_seconds 超出 Lease 允许的范围"));
        }
        if self.cmdb.relation_batch_size == 0 {
            return Err(anyhow!("cmdb.relation_batch_size 必须大于 0"));
        }
        Ok(())
    }

    /// 非主节点的重试间隔
    pub fn leader_backoff(&self) -> Duration {
        Duration::from_secs(self.leader.backoff_seconds)
    }

    /// 选主续期间隔
    pub fn leader_renew_interval(&self) -> Duration {
        Duration::from_secs(self.leader.renew_interval_seconds)
    }

    /// 监听重试间隔
    pub fn watch_retry_interval(&self) -> Duration {
        Duration::from_millis(self.watch.retry_interval_ms)
    }

    /// 全量对账间隔
    pub fn full_sync_interval(&self) -> Duration {
        Duration::from_secs(self.full_sync.interval_seconds)
    }
}
