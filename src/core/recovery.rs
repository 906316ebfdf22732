//! 错误恢复引擎
//!
//! 根据 EngineError 类型返回 RecoveryAction，供目标执行循环决定是退避重试、回滚、转人工还是终止。

use crate::core::{EngineError, FailureKind};

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 指数退避后原地重试（仅瞬时错误）
    RetryBackoff,
    /// 执行已准备好的回滚动作，随后按失败上报
    RollbackAndFail,
    /// 生成人工跟进任务（审批被拒/超时、检索不可信等）
    EscalateHuman,
    /// 终止当前目标（检查点拒绝、取消等）
    Abort,
}

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作
    pub fn handle(&self, err: &EngineError) -> RecoveryAction {
        match err.kind() {
            FailureKind::Transient => RecoveryAction::RetryBackoff,
            FailureKind::PermissionDenied => RecoveryAction::RollbackAndFail,
            // 干跑风险：副作用未发生，直接终止该步
            FailureKind::RiskDetected => RecoveryAction::Abort,
            FailureKind::ApprovalDenied => RecoveryAction::EscalateHuman,
            FailureKind::CheckpointHalt => RecoveryAction::Abort,
            FailureKind::Validation => RecoveryAction::EscalateHuman,
            FailureKind::Unknown => match err {
                EngineError::RetrievalError(_) => RecoveryAction::EscalateHuman,
                _ => RecoveryAction::Abort,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_transient() {
        let engine = RecoveryEngine::new();
        let err = EngineError::Transient("rate_limited".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::RetryBackoff);
    }

    #[test]
    fn test_recovery_permission_denied() {
        let engine = RecoveryEngine::new();
        let err = EngineError::PermissionDenied("shell".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::RollbackAndFail);
    }

    #[test]
    fn test_recovery_dry_run_risk() {
        let engine = RecoveryEngine::new();
        let err = EngineError::RiskDetected("would delete 200 files".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_approval_denied() {
        let engine = RecoveryEngine::new();
        let err = EngineError::ApprovalNotGranted("timeout".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::EscalateHuman);
    }

    #[test]
    fn test_recovery_checkpoint_halt() {
        let engine = RecoveryEngine::new();
        let err = EngineError::CheckpointHalt("pre_execution".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_retrieval_error() {
        let engine = RecoveryEngine::new();
        let err = EngineError::RetrievalError("stale data".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::EscalateHuman);
    }

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&EngineError::Cancelled), RecoveryAction::Abort);
    }
}
