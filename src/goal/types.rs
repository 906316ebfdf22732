//! 目标树类型定义
//!
//! 目标节点、状态、优先级与验收判据。判据是纯数据（可序列化的枚举），
//! 评估逻辑在 review 模块，保持类型层无副作用。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type GoalId = String;

/// 目标状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// 等待依赖满足后被选中
    Pending,
    /// 正在被引擎执行（单写者）
    InProgress,
    /// 已完成（终态）
    Completed,
    /// 已失败（终态）
    Failed,
    /// 等待人工澄清
    NeedsClarification,
}

impl GoalStatus {
    /// 终态：完成或失败。目标只会转移到终态，从不删除，保留完整审计历史
    pub fn is_terminal(&self) -> bool {
        matches!(self, GoalStatus::Completed | GoalStatus::Failed)
    }
}

/// 优先级（Critical 最高）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// 验收判据的确定性检查（对执行记录求值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionCheck {
    /// 所有步骤都成功执行
    AllStepsSucceeded,
    /// 任一步骤输出包含给定文本
    OutputContains(String),
    /// 任一步骤输出匹配给定正则
    OutputMatches(String),
    /// 至少执行了 n 个步骤
    MinStepsExecuted(usize),
}

/// 验收判据：无 check 时仅作描述性记录，默认通过
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<CriterionCheck>,
}

impl AcceptanceCriterion {
    pub fn describe(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            check: None,
        }
    }

    pub fn checked(description: impl Into<String>, check: CriterionCheck) -> Self {
        Self {
            description: description.into(),
            check: Some(check),
        }
    }
}

/// 目标节点
///
/// 树内通过稳定 ID 寻址；parent / children 只是反向查找引用，不构成所有权。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub description: String,
    pub status: GoalStatus,
    pub priority: Priority,
    pub dependencies: Vec<GoalId>,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    /// 分解深度：根目标为 0，子目标为 parent.depth + 1
    pub depth: u32,
    pub parent: Option<GoalId>,
    pub children: Vec<GoalId>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    /// 历次失败原因（审计）
    pub failure_reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Goal {
    pub fn new(description: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            status: GoalStatus::Pending,
            priority: Priority::Medium,
            dependencies: Vec::new(),
            acceptance_criteria: Vec::new(),
            depth: 0,
            parent: None,
            children: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure_reasons: Vec::new(),
            meta: serde_json::Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<GoalId>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<AcceptanceCriterion>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }
}
