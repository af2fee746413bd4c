//! 同步引擎工具函数
//!
//! 包括分页拉取、可取消的休眠和耗时格式化。

use invsync_common::{Page, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 按固定页大小逐页拉取，直到返回不足一页
pub async fn collect_pages<T, F, Fut>(page_size: usize, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Page) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut page = Page::new(0, page_size.max(1));
    let mut items = Vec::new();

    loop {
        let batch = fetch(page.clone()).await?;
        let short = batch.len() < page.limit;
        items.extend(batch);

        if short {
            return Ok(items);
        }
        page = page.next();
    }
}

/// 休眠指定时间，被取消时提前返回 false
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// 格式化持续时间为人类可读的字符串
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();

    if seconds < 60 {
        return format!("{}.{:03} 秒", seconds, duration.subsec_millis());
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{} 分钟 {} 秒", minutes, seconds % 60);
    }

    let hours = minutes / 60;
    format!("{} 小时 {} 分钟", hours, minutes % 60)
}
