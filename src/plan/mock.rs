//! Mock 规划方（用于测试与演示，无需真实 LLM 后端）
//!
//! MockPlanner：对任意目标确定性产出单步 echo 计划；
//! ScriptedPlanner：按队列回放预设的计划 / 分解 / 调整 / 信息结论，
//! 队列耗尽时退回 MockPlanner 的默认行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::EngineError;
use crate::goal::Goal;
use crate::plan::{InfoOutcome, Plan, Planner, RootCause, Step};

/// Mock 规划方：单步 echo 计划，自带 grounding 引用
#[derive(Debug, Default)]
pub struct MockPlanner;

fn default_plan(goal: &Goal) -> Plan {
    let step = Step::new(format!("Execute: {}", goal.description), "echo")
        .with_args(serde_json::json!({ "text": goal.description }));
    Plan::new(vec![step]).with_grounding(vec!["mock://worked-example".to_string()])
}

/// 按步骤拆出子目标（每步一个，声明顺序即执行顺序）
fn decompose_by_steps(plan: &Plan) -> Vec<Goal> {
    plan.steps
        .iter()
        .map(|step| Goal::new(step.action.clone()))
        .collect()
}

#[async_trait]
impl Planner for MockPlanner {
    async fn create_plan(&self, goal: &Goal) -> Result<Plan, EngineError> {
        Ok(default_plan(goal))
    }

    async fn update_plan(&self, plan: &Plan, info: &str) -> Result<Plan, EngineError> {
        let mut updated = plan.clone();
        updated
            .meta
            .insert("gathered_info".to_string(), serde_json::json!(info));
        Ok(updated)
    }

    async fn adjust_plan(&self, plan: &Plan, root_cause: &RootCause) -> Result<Plan, EngineError> {
        let mut adjusted = plan.clone();
        adjusted
            .meta
            .insert("adjusted_for".to_string(), serde_json::json!(root_cause.failure_kind));
        Ok(adjusted)
    }

    async fn decompose_plan(&self, plan: &Plan, _parent: &Goal) -> Result<Vec<Goal>, EngineError> {
        Ok(decompose_by_steps(plan))
    }

    async fn gather_information(
        &self,
        _goal: &Goal,
        _plan: &Plan,
    ) -> Result<InfoOutcome, EngineError> {
        Ok(InfoOutcome::Sufficient(String::new()))
    }
}

/// 脚本化规划方：按队列回放预设响应（测试用）
#[derive(Default)]
pub struct ScriptedPlanner {
    plans: Mutex<VecDeque<Plan>>,
    adjusted: Mutex<VecDeque<Plan>>,
    decompositions: Mutex<VecDeque<Vec<Goal>>>,
    info: Mutex<VecDeque<InfoOutcome>>,
    create_calls: AtomicUsize,
    adjust_calls: AtomicUsize,
    decompose_calls: AtomicUsize,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_plan(&self, plan: Plan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    pub fn push_adjusted(&self, plan: Plan) {
        self.adjusted.lock().unwrap().push_back(plan);
    }

    pub fn push_decomposition(&self, goals: Vec<Goal>) {
        self.decompositions.lock().unwrap().push_back(goals);
    }

    pub fn push_info(&self, outcome: InfoOutcome) {
        self.info.lock().unwrap().push_back(outcome);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn adjust_calls(&self) -> usize {
        self.adjust_calls.load(Ordering::SeqCst)
    }

    pub fn decompose_calls(&self) -> usize {
        self.decompose_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn create_plan(&self, goal: &Goal) -> Result<Plan, EngineError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| default_plan(goal)))
    }

    async fn update_plan(&self, plan: &Plan, info: &str) -> Result<Plan, EngineError> {
        MockPlanner.update_plan(plan, info).await
    }

    async fn adjust_plan(&self, plan: &Plan, root_cause: &RootCause) -> Result<Plan, EngineError> {
        self.adjust_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.adjusted.lock().unwrap().pop_front();
        match queued {
            Some(plan) => Ok(plan),
            None => MockPlanner.adjust_plan(plan, root_cause).await,
        }
    }

    async fn decompose_plan(&self, plan: &Plan, _parent: &Goal) -> Result<Vec<Goal>, EngineError> {
        self.decompose_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .decompositions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| decompose_by_steps(plan)))
    }

    async fn gather_information(
        &self,
        _goal: &Goal,
        _plan: &Plan,
    ) -> Result<InfoOutcome, EngineError> {
        Ok(self
            .info
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(InfoOutcome::Sufficient(String::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_planner_is_deterministic() {
        let goal = Goal::new("write a file");
        let a = MockPlanner.create_plan(&goal).await.unwrap();
        let b = MockPlanner.create_plan(&goal).await.unwrap();
        assert_eq!(a.steps.len(), 1);
        assert_eq!(a.steps[0].action, b.steps[0].action);
        assert!(a.is_well_defined());
        assert!(!a.grounding.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_planner_replays_queue() {
        let planner = ScriptedPlanner::new();
        planner.push_plan(Plan::new(vec![Step::new("queued", "echo")]));

        let goal = Goal::new("anything");
        let first = planner.create_plan(&goal).await.unwrap();
        assert_eq!(first.steps[0].action, "queued");

        // 队列耗尽后退回默认行为
        let second = planner.create_plan(&goal).await.unwrap();
        assert_eq!(second.steps[0].action, "Execute: anything");
        assert_eq!(planner.create_calls(), 2);
    }
}
