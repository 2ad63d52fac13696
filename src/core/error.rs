//! 锚点引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AnchorError 或批次摘要决定 Proceed / ProceedWithFallback / Retry / AskOperator 等。

use thiserror::Error;

/// 重定位 / 建图过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AnchorError {
    /// 平台 AR 子系统不可用，整批无法开始（需人工介入）
    #[error("Anchor adapter unavailable")]
    AdapterUnavailable,

    #[error("Anchor load failed: {0}")]
    LoadFailed(String),

    #[error("Tracking timeout: {0}")]
    TrackingTimeout(String),

    /// 建图质量不足，在调用 create_anchor 之前即拒绝
    #[error("Anchor quality insufficient: {0}")]
    QualityInsufficient(String),

    /// 平台拒绝创建锚点；只携带路点 ID，平台原因写入日志
    #[error("Anchor creation failed: {0}")]
    CreateFailed(String),

    #[error("Mapping file corrupt: {0}")]
    StoreCorrupt(String),

    #[error("Invalid route id: {0}")]
    InvalidRoute(String),

    /// 建图参数非法（空路点 ID、非正半径）
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 恢复引擎给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 全部锚点就绪，直接开始导航
    Proceed,
    /// 以备用坐标继续（列出降级路点）
    ProceedWithFallback(Vec<String>),
    /// 建议对列出的路点调用 retry_failed
    Retry(Vec<String>),
    /// 需要实验人员介入（如 AR 子系统未就绪）
    AskOperator(String),
    /// 拒绝当前操作（建图质量不足等）
    Reject(String),
}
