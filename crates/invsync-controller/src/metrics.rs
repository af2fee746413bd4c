//! 指标模块
//!
//! 该模块记录事件监听、主机库写入和全量对账的统计数据，
//! 并以 Prometheus 文本格式导出。

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// 同步引擎指标
#[derive(Clone)]
pub struct SyncMetrics {
    /// Prometheus 注册表
    registry: Registry,
    /// 监听请求次数，按资源类型区分
    watch_polls_total: IntCounterVec,
    /// 监听失败次数，按资源类型区分
    watch_errors_total: IntCounterVec,
    /// 游标重置次数，按资源类型区分
    cursor_resets_total: IntCounterVec,
    /// 事件解析失败次数
    decode_failures_total: IntCounterVec,
    /// 主机库写入条数，按操作区分
    applied_total: IntCounterVec,
    /// 主机库写入失败次数，按操作区分
    apply_failures_total: IntCounterVec,
    /// 全量对账中失败的业务数
    full_sync_failures_total: IntCounter,
    /// 全量对账耗时
    full_sync_duration_seconds: Histogram,
}

impl SyncMetrics {
    /// 创建并注册全部指标
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let watch_polls_total = IntCounterVec::new(
            Opts::new("invsync_watch_polls_total", "Total number of watch requests"),
            &["resource"],
        )?;
        let watch_errors_total = IntCounterVec::new(
            Opts::new("invsync_watch_errors_total", "Total number of failed watch requests"),
            &["resource"],
        )?;
        let cursor_resets_total = IntCounterVec::new(
            Opts::new("invsync_cursor_resets_total", "Total number of cursor resets"),
            &["resource"],
        )?;
        let decode_failures_total = IntCounterVec::new(
            Opts::new(
                "invsync_decode_failures_total",
                "Total number of events skipped because the detail could not be decoded",
            ),
            &["resource"],
        )?;
        let applied_total = IntCounterVec::new(
            Opts::new("invsync_applied_total", "Total number of inventory records written"),
            &["op"],
        )?;
        let apply_failures_total = IntCounterVec::new(
            Opts::new("invsync_apply_failures_total", "Total number of failed inventory batches"),
            &["op"],
        )?;
        let full_sync_failures_total = IntCounter::new(
            "invsync_full_sync_failures_total",
            "Total number of businesses that failed during full sync",
        )?;
        let full_sync_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "invsync_full_sync_duration_seconds",
            "Duration of full sync cycles",
        ))?;

        registry.register(Box::new(watch_polls_total.clone()))?;
        registry.register(Box::new(watch_errors_total.clone()))?;
        registry.register(Box::new(cursor_resets_total.clone()))?;
        registry.register(Box::new(decode_failures_total.clone()))?;
        registry.register(Box::new(applied_total.clone()))?;
        registry.register(Box::new(apply_failures_total.clone()))?;
        registry.register(Box::new(full_sync_failures_total.clone()))?;
        registry.register(Box::new(full_sync_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            watch_polls_total,
            watch_errors_total,
            cursor_resets_total,
            decode_failures_total,
            applied_total,
            apply_failures_total,
            full_sync_failures_total,
            full_sync_duration_seconds,
        })
    }

    pub fn inc_watch_poll(&self, resource: &str) {
        self.watch_polls_total.with_label_values(&[resource]).inc();
    }

    pub fn inc_watch_error(&self, resource: &str) {
        self.watch_errors_total.with_label_values(&[resource]).inc();
    }

    pub fn inc_cursor_reset(&self, resource: &str) {
        self.cursor_resets_total.with_label_values(&[resource]).inc();
    }

    pub fn inc_decode_failure(&self, resource: &str) {
        self.decode_failures_total.with_label_values(&[resource]).inc();
    }

    /// 记录写入成功的条数
    pub fn add_applied(&self, op: &str, count: usize) {
        self.applied_total
            .with_label_values(&[op])
            .inc_by(count as u64);
    }

    pub fn inc_apply_failure(&self, op: &str) {
        self.apply_failures_total.with_label_values(&[op]).inc();
    }

    pub fn inc_full_sync_failure(&self) {
        self.full_sync_failures_total.inc();
    }

    /// 记录一次全量对账耗时（秒）
    pub fn observe_full_sync(&self, seconds: f64) {
        self.full_sync_duration_seconds.observe(seconds);
    }

    /// 当前已写入条数
    pub fn applied(&self, op: &str) -> u64 {
        self.applied_total.with_label_values(&[op]).get()
    }

    /// 当前游标重置次数
    pub fn cursor_resets(&self, resource: &str) -> u64 {
        self.cursor_resets_total.with_label_values(&[resource]).get()
    }

    /// 获取 Prometheus 注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 导出 Prometheus 文本格式
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
