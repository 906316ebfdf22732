//! 资源与检查点治理
//!
//! 用量记账、停止条件评估与检查点评估。用量只由顶层循环与计划执行器
//! 在工作单元完成后写入；越界触发升级（非停止性通知），停止由
//! check_stop_conditions 驱动，在每轮循环开始与每个真实副作用前求值。

pub mod bounds;
pub mod checkpoint;

use std::sync::Mutex;

use serde::Serialize;

pub use bounds::{ResourceBounds, ResourceUsage, UsageSnapshot};
pub use checkpoint::{
    Checkpoint, CheckpointCondition, CheckpointDecision, CheckpointEvent, CheckpointMode,
    ContextSnapshot,
};

use crate::approval::{ApprovalChannel, ApprovalDecision};
use std::sync::Arc;

/// 升级原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    MaxIterationsReached,
    NoProgress,
    CostLimitExceeded,
    TimeLimitExceeded,
    TokenLimitExceeded,
    SafetyViolation,
}

/// 升级记录（附带当时的用量快照）
#[derive(Debug, Clone, Serialize)]
pub struct Escalation {
    pub reason: EscalationReason,
    pub detail: String,
    pub usage: UsageSnapshot,
    pub at: i64,
}

/// 停止条件相关的状态旗标
#[derive(Debug, Default)]
struct StopFlags {
    unsafe_action: bool,
    unresolvable_ambiguity: bool,
    /// 连续未被纠正的验收失败次数
    repeated_validation_failures: u32,
}

/// 连续验收失败达到该值视为「评估反复失败且未被纠正」
const REPEATED_VALIDATION_LIMIT: u32 = 3;

/// 治理器：边界 + 用量 + 旗标 + 升级记录 + 检查点评估
pub struct Governor {
    bounds: ResourceBounds,
    usage: Mutex<ResourceUsage>,
    flags: Mutex<StopFlags>,
    escalations: Mutex<Vec<Escalation>>,
    approval: Arc<ApprovalChannel>,
}

impl Governor {
    pub fn new(bounds: ResourceBounds, approval: Arc<ApprovalChannel>) -> Self {
        Self {
            bounds,
            usage: Mutex::new(ResourceUsage::default()),
            flags: Mutex::new(StopFlags::default()),
            escalations: Mutex::new(Vec::new()),
            approval,
        }
    }

    pub fn bounds(&self) -> &ResourceBounds {
        &self.bounds
    }

    pub fn approval(&self) -> &Arc<ApprovalChannel> {
        &self.approval
    }

    /// 只读用量快照
    pub fn usage(&self) -> UsageSnapshot {
        self.usage.lock().unwrap().snapshot()
    }

    /// 记录一个工作单元的消耗（仅顶层循环与计划执行器调用）
    pub fn record_work(&self, cost: f64, tokens: u64) {
        self.usage.lock().unwrap().record_work(cost, tokens);
    }

    pub fn tick_iteration(&self) {
        self.usage.lock().unwrap().tick_iteration();
    }

    pub fn mark_progress(&self) {
        self.usage.lock().unwrap().mark_progress();
    }

    pub fn flag_unsafe(&self, detail: &str) {
        self.flags.lock().unwrap().unsafe_action = true;
        self.escalate(EscalationReason::SafetyViolation, detail);
    }

    pub fn flag_unresolvable_ambiguity(&self) {
        self.flags.lock().unwrap().unresolvable_ambiguity = true;
    }

    pub fn note_validation_failure(&self) {
        self.flags.lock().unwrap().repeated_validation_failures += 1;
    }

    pub fn reset_validation_failures(&self) {
        self.flags.lock().unwrap().repeated_validation_failures = 0;
    }

    /// 记录一次升级（人工可见的通知，不停止循环）
    pub fn escalate(&self, reason: EscalationReason, detail: &str) -> Escalation {
        let escalation = Escalation {
            reason,
            detail: detail.to_string(),
            usage: self.usage(),
            at: chrono::Utc::now().timestamp(),
        };
        tracing::warn!(reason = ?reason, detail, "escalation");
        self.escalations.lock().unwrap().push(escalation.clone());
        escalation
    }

    pub fn escalations(&self) -> Vec<Escalation> {
        self.escalations.lock().unwrap().clone()
    }

    /// 用量对照上限，每项新越界各产生一次升级（重复越界不重复上报）
    pub fn manage_bounds(&self) -> Vec<Escalation> {
        let snapshot = self.usage();
        let mut new_escalations = Vec::new();
        let already: Vec<EscalationReason> = self
            .escalations
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.reason)
            .collect();

        let mut breach = |reason: EscalationReason, detail: String, out: &mut Vec<Escalation>| {
            if !already.contains(&reason) {
                out.push(self.escalate(reason, &detail));
            }
        };

        if let Some(limit) = self.bounds.time_limit {
            if snapshot.elapsed_secs >= limit.as_secs_f64() {
                breach(
                    EscalationReason::TimeLimitExceeded,
                    format!("elapsed {:.1}s >= limit {:.1}s", snapshot.elapsed_secs, limit.as_secs_f64()),
                    &mut new_escalations,
                );
            }
        }
        if let Some(limit) = self.bounds.cost_limit {
            if snapshot.cost >= limit {
                breach(
                    EscalationReason::CostLimitExceeded,
                    format!("cost {:.2} >= limit {:.2}", snapshot.cost, limit),
                    &mut new_escalations,
                );
            }
        }
        if let Some(limit) = self.bounds.token_limit {
            if snapshot.tokens >= limit {
                breach(
                    EscalationReason::TokenLimitExceeded,
                    format!("tokens {} >= limit {}", snapshot.tokens, limit),
                    &mut new_escalations,
                );
            }
        }
        new_escalations
    }

    /// 停止条件：歧义不可解、动作不安全、资源耗尽、评估反复失败未纠正。
    /// 在每轮循环开始与每个真实副作用前求值，命中即短路其余处理。
    pub fn check_stop_conditions(&self) -> bool {
        let flags = self.flags.lock().unwrap();
        if flags.unsafe_action || flags.unresolvable_ambiguity {
            return true;
        }
        if flags.repeated_validation_failures >= REPEATED_VALIDATION_LIMIT {
            return true;
        }
        drop(flags);

        let snapshot = self.usage();
        if let Some(limit) = self.bounds.time_limit {
            if snapshot.elapsed_secs >= limit.as_secs_f64() {
                return true;
            }
        }
        if let Some(limit) = self.bounds.cost_limit {
            if snapshot.cost >= limit {
                return true;
            }
        }
        if let Some(limit) = self.bounds.token_limit {
            if snapshot.tokens >= limit {
                return true;
            }
        }
        false
    }

    /// 无进度窗口是否已超时
    pub fn has_exceeded_no_progress(&self) -> bool {
        self.usage.lock().unwrap().since_progress() >= self.bounds.no_progress_timeout
    }

    /// 评估某事件上的全部检查点（按注册顺序）
    ///
    /// 无条件检查点恒匹配；advisory 仅发布任务；pause / require_approval
    /// 发布人工验证任务并阻塞到决策或超时。第一个 Rejected / Timeout
    /// 短路其余检查点；只有没有任何检查点要求停止时返回 Continue。
    pub async fn evaluate_checkpoints(
        &self,
        event: CheckpointEvent,
        ctx: &ContextSnapshot,
    ) -> CheckpointDecision {
        for cp in &self.bounds.checkpoints {
            if !cp.matches(event, ctx) {
                continue;
            }
            if !cp.mode.halts() {
                self.approval
                    .notify("checkpoint", event.as_str(), ctx.to_value());
                continue;
            }
            let timeout = cp.timeout.unwrap_or(self.bounds.approval_timeout);
            let decision = self
                .approval
                .request("checkpoint", event.as_str(), ctx.to_value(), timeout)
                .await;
            match decision {
                ApprovalDecision::Approved => continue,
                ApprovalDecision::Rejected => return CheckpointDecision::Rejected,
                ApprovalDecision::Timeout => return CheckpointDecision::Timeout,
            }
        }
        CheckpointDecision::Continue
    }
}
