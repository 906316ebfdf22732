//! 引擎过程事件：用于前端展示求解进度（可序列化为 JSON）

use serde::Serialize;

/// 求解过程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// 外层循环进入新一轮
    LoopIteration { iteration: u64 },
    /// 选中下一个目标
    GoalSelected { goal_id: String, description: String },
    /// 规划完成
    PlanCreated { goal_id: String, steps: usize },
    /// 计划过难，分解为子目标
    Decomposing { goal_id: String, subgoals: usize },
    /// 信息不足，进入信息收集
    InfoGathering { goal_id: String },
    /// grounding 软门：召回的范例数量
    GroundingChecked { goal_id: String, examples_found: usize },
    /// 研究数据校验未通过
    ResearchRejected { goal_id: String, reason: String },
    /// 检查点要求停止（拒绝或超时）
    CheckpointHalted { event: String, decision: String },
    /// 步骤触发人工审批
    ApprovalRequested { step_index: usize, trigger: String },
    StepStarted {
        step_index: usize,
        tool: String,
        action: String,
    },
    StepCompleted {
        step_index: usize,
        tool: String,
        preview: String,
    },
    StepFailed {
        step_index: usize,
        tool: String,
        reason: String,
    },
    /// 干跑发现风险，真实执行被取消
    DryRunRisk { step_index: usize, reason: String },
    /// 步骤失败后执行了回滚动作
    RollbackInvoked { step_index: usize, tool: String },
    /// 瞬时失败，安排退避重试
    RetryScheduled { attempt: u32, backoff_ms: u64 },
    /// 周期性进度摘要
    ProgressSummary {
        step_index: usize,
        total: usize,
        preview: String,
    },
    ReviewPassed { goal_id: String },
    ReviewFailed { goal_id: String, reason: String },
    GoalCompleted { goal_id: String },
    GoalFailed { goal_id: String, reason: String },
    /// 资源/安全阈值越界的非停止性通知
    Escalated { reason: String, detail: String },
    /// 已排入人工跟进队列
    HumanFollowupQueued { goal_id: String, reason: String },
    RunFinished {
        completed: usize,
        failed: usize,
        remaining: usize,
    },
}

/// 发送事件（无接收端时静默丢弃）
pub fn send_event(
    tx: &Option<tokio::sync::mpsc::UnboundedSender<EngineEvent>>,
    ev: EngineEvent,
) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
