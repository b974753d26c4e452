use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// 索引构建与查询过程中的错误
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// 单张图片解码失败，构建时只会跳过该图片
    #[error("无法解码图片 {path}: {reason}")]
    ItemDecode { path: PathBuf, reason: String },
    /// 向量维度与索引维度不一致
    #[error("向量维度不匹配：期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// 特征提取器不可用或返回了不符合约定的结果
    #[error("特征提取失败: {0}")]
    Extraction(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// 索引文件缺失、损坏或与元数据不匹配
    #[error("索引不可用: {0}")]
    IndexNotFound(String),
    /// 查询图片无法解码
    #[error("无效的查询图片: {0}")]
    InvalidImage(String),
    #[error("无效的图片记录: {0}")]
    InvalidRecord(String),
    #[error("无效的参数: {0}")]
    InvalidOptions(String),
    /// 整个构建过程超时
    #[error("索引构建超时（{0:?}）")]
    Timeout(Duration),
    #[error("后台任务异常退出: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn extraction(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Extraction(err.into())
    }

    pub fn index_not_found(reason: impl Into<String>) -> Self {
        Self::IndexNotFound(reason.into())
    }
}
