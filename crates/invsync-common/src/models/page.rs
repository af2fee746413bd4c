//! 分页模型

use serde::{Deserialize, Serialize};

/// 分页参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 起始偏移
    pub start: usize,
    /// 单页条数
    pub limit: usize,
    /// 排序字段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

impl Page {
    /// 创建分页参数
    pub fn new(start: usize, limit: usize) -> Self {
        Self {
            start,
            limit,
            sort: None,
        }
    }

    /// 指定排序字段
    pub fn sorted_by(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(field.into());
        self
    }

    /// 下一页
    pub fn next(&self) -> Self {
        Self {
            start: self.start + self.limit,
            limit: self.limit,
            sort: self.sort.clone(),
        }
    }
}
