//! 引擎错误类型与失败分类
//!
//! 与 RecoveryEngine 配合：根据 EngineError 决定 RetryBackoff / RollbackAndFail / EscalateHuman / Abort 等。
//! 瞬时错误码是固定词表，工具方报错时必须使用其中之一才会被判定为可重试。

use thiserror::Error;

/// 固定的瞬时错误码词表（限流、超时、网络错误）
pub const TRANSIENT_ERROR_CODES: [&str; 3] = ["rate_limited", "timeout", "network_error"];

/// 引擎运行过程中可能出现的错误（规划、工具、审批、检查点、检索等）
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Planner error: {0}")]
    PlannerError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// 错误码命中瞬时词表（rate_limited / timeout / network_error），可原地重试
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// 干跑阶段发现风险信号，真实副作用尚未发生
    #[error("Dry-run risk detected: {0}")]
    RiskDetected(String),

    #[error("Approval not granted: {0}")]
    ApprovalNotGranted(String),

    /// 检查点被拒绝或超时，当前目标终止（可由外部重新发起）
    #[error("Checkpoint halt: {0}")]
    CheckpointHalt(String),

    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 失败分类：贯穿执行、重试与上报语义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 可原地重试（受 retry_limit / retry_backoff 约束）
    Transient,
    /// 权限或策略拒绝：步骤级致命，不重试
    PermissionDenied,
    /// 干跑发现风险：步骤级致命，副作用未发生，无需回滚
    RiskDetected,
    /// 审批被拒或超时：步骤级致命，转人工跟进
    ApprovalDenied,
    /// 检查点拒绝/超时：当前目标终止
    CheckpointHalt,
    /// 验收未通过：触发根因分析与一次调整重执行
    Validation,
    /// 无法归类：统一按 FAILURE 上报
    Unknown,
}

/// 判断错误码是否命中瞬时词表
pub fn is_transient_code(code: &str) -> bool {
    TRANSIENT_ERROR_CODES.iter().any(|c| code.contains(c))
}

/// 按错误码归类失败种类（工具方返回的 error 字段）
pub fn classify_error_code(code: &str) -> FailureKind {
    if is_transient_code(code) {
        FailureKind::Transient
    } else if code.contains("permission_denied") {
        FailureKind::PermissionDenied
    } else if code.contains("dry_run_risk") {
        FailureKind::RiskDetected
    } else if code.contains("approval_not_granted") {
        FailureKind::ApprovalDenied
    } else if code.contains("checkpoint_halt") {
        FailureKind::CheckpointHalt
    } else {
        FailureKind::Unknown
    }
}

impl EngineError {
    /// 错误对应的失败分类
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Transient(_) => FailureKind::Transient,
            EngineError::PermissionDenied(_) => FailureKind::PermissionDenied,
            EngineError::RiskDetected(_) => FailureKind::RiskDetected,
            EngineError::ApprovalNotGranted(_) => FailureKind::ApprovalDenied,
            EngineError::CheckpointHalt(_) => FailureKind::CheckpointHalt,
            EngineError::ToolExecutionFailed(code) => classify_error_code(code),
            _ => FailureKind::Unknown,
        }
    }
}
