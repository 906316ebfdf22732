//! 计划与规划方契约
//!
//! Plan 由外部规划方产出，只能通过 update_plan / adjust_plan 变换为新值，
//! 从不原地修改步骤。规划方对相同输入必须确定性输出，以便引擎可被
//! 单独（Mock）测试。

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EngineError;
use crate::goal::Goal;

pub use mock::{MockPlanner, ScriptedPlanner};

/// 步骤类别（checkpoint 类步骤总是输出进度摘要）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Read,
    Write,
    /// 对外部系统的写入（触发人工审批）
    ExternalWrite,
    /// 摘要节点
    Checkpoint,
}

/// 计划中的单个步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    /// 工具引用（按名）
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    /// 所需权限标签，必须出现在约束的 tool_permissions 中
    pub required_permission: String,
    /// 是否支持干跑
    pub supports_dry_run: bool,
    pub kind: StepKind,
    /// 需求是否仍有歧义（触发人工审批）
    pub ambiguous: bool,
    /// 是否落在策略门控内（触发人工审批）
    pub policy_gated: bool,
    /// 预估成本，超过阈值视为大额资源升级（触发人工审批）
    pub estimated_cost: f64,
    /// 决策置信度，低于阈值触发人工审批
    pub confidence: f64,
}

impl Step {
    pub fn new(action: impl Into<String>, tool: impl Into<String>) -> Self {
        let tool = tool.into();
        Self {
            action: action.into(),
            required_permission: tool.clone(),
            tool,
            args: Value::Null,
            supports_dry_run: false,
            kind: StepKind::Read,
            ambiguous: false,
            policy_gated: false,
            estimated_cost: 0.0,
            confidence: 1.0,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = permission.into();
        self
    }

    pub fn with_kind(mut self, kind: StepKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn dry_runnable(mut self) -> Self {
        self.supports_dry_run = true;
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn ambiguous(mut self) -> Self {
        self.ambiguous = true;
        self
    }

    pub fn policy_gated(mut self) -> Self {
        self.policy_gated = true;
        self
    }
}

/// 有序步骤的执行计划
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    /// 可信来源 / 已验证范例的引用（空则触发 grounding 软门）
    #[serde(default)]
    pub grounding: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, Value>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            grounding: Vec::new(),
            meta: serde_json::Map::new(),
        }
    }

    pub fn with_grounding(mut self, grounding: Vec<String>) -> Self {
        self.grounding = grounding;
        self
    }

    /// 计划是否定义良好：非空且每步都有动作与工具
    pub fn is_well_defined(&self) -> bool {
        !self.steps.is_empty()
            && self
                .steps
                .iter()
                .all(|s| !s.action.is_empty() && !s.tool.is_empty())
    }
}

/// 信息收集的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoOutcome {
    /// 信息充分，附收集到的内容（将通过 update_plan 并入计划）
    Sufficient(String),
    /// 信息不足，需要外部介入
    Insufficient,
}

/// 根因分析结论（喂回规划方做计划调整）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    pub failure_kind: String,
    pub detail: String,
    pub failed_step: Option<usize>,
    pub suggested_fixes: Vec<String>,
}

/// 外部规划方契约
///
/// 相同输入必须产生相同输出（确定性），引擎的全部测试都依赖这一点。
#[async_trait]
pub trait Planner: Send + Sync {
    /// 为目标产出计划
    async fn create_plan(&self, goal: &Goal) -> Result<Plan, EngineError>;

    /// 将收集到的信息并入计划，返回新计划
    async fn update_plan(&self, plan: &Plan, info: &str) -> Result<Plan, EngineError>;

    /// 按根因调整计划，返回新计划
    async fn adjust_plan(&self, plan: &Plan, root_cause: &RootCause) -> Result<Plan, EngineError>;

    /// 将过难的计划分解为子目标（声明顺序即执行顺序）
    async fn decompose_plan(&self, plan: &Plan, parent: &Goal) -> Result<Vec<Goal>, EngineError>;

    /// 针对定义不良的计划收集信息（自主执行最高收益子任务或请求最小澄清）
    async fn gather_information(&self, goal: &Goal, plan: &Plan) -> Result<InfoOutcome, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_defined_requires_action_and_tool() {
        assert!(!Plan::new(vec![]).is_well_defined());
        assert!(Plan::new(vec![Step::new("do it", "echo")]).is_well_defined());
        assert!(!Plan::new(vec![Step::new("", "echo")]).is_well_defined());
    }
}
