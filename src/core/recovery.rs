//! 错误恢复引擎
//!
//! 根据 AnchorError 或重定位批次摘要返回 RecoveryAction，供会话决定是直接导航、以备用坐标继续、重试还是请实验人员介入。

use crate::core::{AnchorError, RecoveryAction};
use crate::reloc::RelocSummary;

/// 语义化错误恢复：将错误 / 批次结果映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作
    pub fn advise(&self, err: &AnchorError) -> RecoveryAction {
        match err {
            AnchorError::AdapterUnavailable => RecoveryAction::AskOperator(
                "AR 子系统未就绪，请检查设备后重新开始重定位".to_string(),
            ),
            AnchorError::LoadFailed(id) | AnchorError::TrackingTimeout(id) => {
                RecoveryAction::Retry(vec![id.clone()])
            }
            AnchorError::StoreCorrupt(_) => RecoveryAction::ProceedWithFallback(Vec::new()),
            AnchorError::QualityInsufficient(id) => {
                RecoveryAction::Reject(format!("路点 {id} 建图质量不足，请移动设备扫描更多环境"))
            }
            AnchorError::CreateFailed(id) => {
                RecoveryAction::Reject(format!("路点 {id} 锚点创建失败，请在原位置重新建图"))
            }
            AnchorError::InvalidRoute(id) => RecoveryAction::Reject(format!("未知路线: {id}")),
            AnchorError::InvalidMapping(msg) => RecoveryAction::Reject(msg.clone()),
            AnchorError::Io(e) => RecoveryAction::AskOperator(format!("映射文件读写失败: {e}")),
            AnchorError::Json(e) => RecoveryAction::AskOperator(format!("映射文件序列化失败: {e}")),
        }
    }

    /// 批次完成后的建议：全部成功 → Proceed；成功率达标 → 备用坐标继续；否则建议重试降级路点
    pub fn advise_summary(&self, summary: &RelocSummary, min_success_rate: f32) -> RecoveryAction {
        if summary.is_complete_success() {
            return RecoveryAction::Proceed;
        }
        if summary.rate >= min_success_rate {
            RecoveryAction::ProceedWithFallback(summary.degraded.clone())
        } else {
            RecoveryAction::Retry(summary.degraded.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(total: usize, successful: usize, degraded: &[&str]) -> RelocSummary {
        let timed_out = total - successful;
        RelocSummary {
            total,
            successful,
            timed_out,
            failed: 0,
            rate: if total == 0 {
                1.0
            } else {
                successful as f32 / total as f32
            },
            degraded: degraded.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_recovery_adapter_unavailable() {
        let engine = RecoveryEngine::new();
        let action = engine.advise(&AnchorError::AdapterUnavailable);
        assert!(matches!(action, RecoveryAction::AskOperator(_)));
    }

    #[test]
    fn test_recovery_per_anchor_errors_retry() {
        let engine = RecoveryEngine::new();
        let action = engine.advise(&AnchorError::TrackingTimeout("WP03".to_string()));
        assert_eq!(action, RecoveryAction::Retry(vec!["WP03".to_string()]));
        let action = engine.advise(&AnchorError::LoadFailed("WP05".to_string()));
        assert_eq!(action, RecoveryAction::Retry(vec!["WP05".to_string()]));
    }

    #[test]
    fn test_recovery_quality_rejected() {
        let engine = RecoveryEngine::new();
        let action = engine.advise(&AnchorError::QualityInsufficient("WP01".to_string()));
        match action {
            RecoveryAction::Reject(msg) => assert!(msg.contains("WP01")),
            _ => panic!("Expected Reject"),
        }
    }

    #[test]
    fn test_recovery_create_failed_not_retried() {
        let engine = RecoveryEngine::new();
        // 建图失败与重定位无关，不应建议 retry_failed
        match engine.advise(&AnchorError::CreateFailed("WP04".to_string())) {
            RecoveryAction::Reject(msg) => assert!(msg.contains("WP04")),
            other => panic!("Expected Reject, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_corrupt_store_falls_back() {
        let engine = RecoveryEngine::new();
        let action = engine.advise(&AnchorError::StoreCorrupt("bad json".to_string()));
        assert!(matches!(action, RecoveryAction::ProceedWithFallback(_)));
    }

    #[test]
    fn test_summary_all_tracking() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.advise_summary(&summary(3, 3, &[]), 0.5),
            RecoveryAction::Proceed
        );
        // 空批次视为全部成功
        assert_eq!(
            engine.advise_summary(&summary(0, 0, &[]), 0.5),
            RecoveryAction::Proceed
        );
    }

    #[test]
    fn test_summary_partial() {
        let engine = RecoveryEngine::new();
        let action = engine.advise_summary(&summary(4, 3, &["WP02"]), 0.5);
        assert_eq!(
            action,
            RecoveryAction::ProceedWithFallback(vec!["WP02".to_string()])
        );

        let action = engine.advise_summary(&summary(4, 1, &["WP02", "WP03", "WP04"]), 0.5);
        assert!(matches!(action, RecoveryAction::Retry(ref ids) if ids.len() == 3));
    }
}
