//! 工具执行契约
//!
//! ExecuteStep 的唯一入口。mode 为 DryRun 时实现方必须保证零副作用，
//! 只返回风险评估；失败时 error 字段在适用场合必须使用固定瞬时错误码
//! （rate_limited / timeout / network_error），否则按不可重试处理。

use async_trait::async_trait;

use crate::plan::Step;

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// 无副作用的模拟执行，用于风险评估
    DryRun,
    Live,
}

/// 单步执行报告
#[derive(Debug, Clone)]
pub struct StepReport {
    pub success: bool,
    pub output: String,
    /// 失败时的错误码（瞬时错误必须命中固定词表）
    pub error: Option<String>,
    /// 干跑发现的风险信号
    pub risk: Option<String>,
    pub cost: f64,
    pub tokens: u64,
    pub duration_ms: u64,
}

impl StepReport {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            risk: None,
            cost: 0.0,
            tokens: 0,
            duration_ms: 0,
        }
    }

    pub fn failed(code: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(code.into()),
            risk: None,
            cost: 0.0,
            tokens: 0,
            duration_ms: 0,
        }
    }

    /// 干跑返回的风险报告（本身视为成功完成的评估）
    pub fn risky(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            output: String::new(),
            error: None,
            risk: Some(reason.into()),
            cost: 0.0,
            tokens: 0,
            duration_ms: 0,
        }
    }

    pub fn with_cost(mut self, cost: f64, tokens: u64) -> Self {
        self.cost = cost;
        self.tokens = tokens;
        self
    }
}

/// 工具执行方契约
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn execute(&self, step: &Step, mode: ExecMode) -> StepReport;
}
