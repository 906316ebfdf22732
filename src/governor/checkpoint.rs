//! 检查点：挂在固定生命周期事件上的人工介入门
//!
//! 事件词表是固定的，任何引擎改动都必须保持这组钩子及其在单个目标
//! 执行内的触发顺序不变。条件是对不可变上下文快照的纯谓词，
//! 快照为和类型（每个事件一个变体），保证求值无副作用、可单独测试。

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::core::OutcomeStatus;
use crate::goal::Priority;

/// 生命周期事件（固定词表）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointEvent {
    LoopIterationStart,
    GoalSelected,
    PlanCreated,
    PreExecution,
    BeforeStep,
    AfterStep,
    PostExecution,
    PostReviewPassed,
    AfterGoalExecution,
}

impl CheckpointEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointEvent::LoopIterationStart => "loop_iteration_start",
            CheckpointEvent::GoalSelected => "goal_selected",
            CheckpointEvent::PlanCreated => "plan_created",
            CheckpointEvent::PreExecution => "pre_execution",
            CheckpointEvent::BeforeStep => "before_step",
            CheckpointEvent::AfterStep => "after_step",
            CheckpointEvent::PostExecution => "post_execution",
            CheckpointEvent::PostReviewPassed => "post_review_passed",
            CheckpointEvent::AfterGoalExecution => "after_goal_execution",
        }
    }
}

/// 检查点模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// 仅发布任务提示，不阻塞
    Advisory,
    /// 暂停等待外部恢复指令
    Pause,
    /// 阻塞等待明确审批
    RequireApproval,
}

impl CheckpointMode {
    /// Pause 与 RequireApproval 都要求停下来等外部决策
    pub fn halts(&self) -> bool {
        matches!(self, CheckpointMode::Pause | CheckpointMode::RequireApproval)
    }
}

/// 检查点评估结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointDecision {
    /// 没有任何匹配的检查点要求停止
    Continue,
    Rejected,
    Timeout,
}

/// 事件上下文快照（和类型，每个事件一个变体；条件谓词的唯一输入）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContextSnapshot {
    LoopIteration {
        iteration: u64,
        terminal_goals: usize,
        remaining_goals: usize,
    },
    GoalSelected {
        goal_id: String,
        description: String,
        priority: Priority,
        depth: u32,
    },
    PlanCreated {
        goal_id: String,
        step_count: usize,
    },
    PreExecution {
        goal_id: String,
        step_count: usize,
    },
    Step {
        goal_id: String,
        step_index: usize,
        tool: String,
        action: String,
        /// after_step 时携带该步是否成功
        #[serde(skip_serializing_if = "Option::is_none")]
        succeeded: Option<bool>,
    },
    PostExecution {
        goal_id: String,
        steps_executed: usize,
    },
    ReviewPassed {
        goal_id: String,
        criteria_count: usize,
    },
    GoalExecuted {
        goal_id: String,
        status: OutcomeStatus,
    },
}

impl ContextSnapshot {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// 条件谓词：对快照的纯函数
pub type CheckpointCondition = Box<dyn Fn(&ContextSnapshot) -> bool + Send + Sync>;

/// 注册在某个生命周期事件上的检查点（初始化时登记，之后只读）
pub struct Checkpoint {
    pub event: CheckpointEvent,
    pub mode: CheckpointMode,
    /// 无条件时对该事件总是匹配
    pub condition: Option<CheckpointCondition>,
    /// 覆盖全局 approval_timeout
    pub timeout: Option<Duration>,
}

impl Checkpoint {
    pub fn new(event: CheckpointEvent, mode: CheckpointMode) -> Self {
        Self {
            event,
            mode,
            condition: None,
            timeout: None,
        }
    }

    pub fn with_condition(
        mut self,
        condition: impl Fn(&ContextSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 事件一致且条件满足（无条件恒为真）
    pub fn matches(&self, event: CheckpointEvent, ctx: &ContextSnapshot) -> bool {
        self.event == event
            && self
                .condition
                .as_ref()
                .map(|cond| cond(ctx))
                .unwrap_or(true)
    }
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("event", &self.event)
            .field("mode", &self.mode)
            .field("has_condition", &self.condition.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
