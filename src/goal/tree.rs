//! 目标树
//!
//! 按稳定 ID 寻址的节点仓（arena），维护依赖边与插入顺序。
//! 选择规则：依赖全部完成且自身 pending 的目标中，优先级最高者胜出，
//! 同优先级按插入顺序（先插入者先执行）。目标只转移状态，从不删除。

use std::collections::HashMap;

use serde_json::Value;

use crate::core::{EngineError, Outcome, OutcomeStatus};
use crate::goal::types::{AcceptanceCriterion, Goal, GoalId, GoalStatus, Priority};

/// 目标树：节点仓 + 插入顺序
#[derive(Debug, Default)]
pub struct GoalTree {
    nodes: HashMap<GoalId, Goal>,
    /// 插入顺序（同优先级时的决胜序），节点从不移除
    order: Vec<GoalId>,
    roots: Vec<GoalId>,
}

impl GoalTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从顶层目标与推断出的子目标构建树
    ///
    /// objectives 作为根目标（High 优先级，附默认验收判据）；
    /// subgoals 的 parent / dependencies 必须引用已插入的节点 ID。
    pub fn construct(
        objectives: &[String],
        subgoals: Vec<Goal>,
    ) -> Result<Self, EngineError> {
        let mut tree = Self::new();
        for objective in objectives {
            let goal = Goal::new(objective.clone())
                .with_priority(Priority::High)
                .with_criteria(vec![AcceptanceCriterion::describe(format!(
                    "Successfully complete: {objective}"
                ))]);
            tree.add_root(goal);
        }
        for subgoal in subgoals {
            match subgoal.parent.clone() {
                Some(parent_id) => {
                    tree.add_child(&parent_id, subgoal)?;
                }
                None => {
                    tree.add_root(subgoal);
                }
            }
        }
        Ok(tree)
    }

    /// 插入根目标（depth 0）
    pub fn add_root(&mut self, mut goal: Goal) -> GoalId {
        goal.depth = 0;
        goal.parent = None;
        let id = goal.id.clone();
        self.roots.push(id.clone());
        self.order.push(id.clone());
        self.nodes.insert(id.clone(), goal);
        id
    }

    /// 在 parent 下插入子目标：depth = parent.depth + 1，并登记反向引用
    pub fn add_child(&mut self, parent_id: &str, mut goal: Goal) -> Result<GoalId, EngineError> {
        let parent_depth = {
            let parent = self
                .nodes
                .get_mut(parent_id)
                .ok_or_else(|| EngineError::ConfigError(format!("parent goal {parent_id} not found")))?;
            parent.children.push(goal.id.clone());
            parent.depth
        };
        goal.depth = parent_depth + 1;
        goal.parent = Some(parent_id.to_string());
        let id = goal.id.clone();
        self.order.push(id.clone());
        self.nodes.insert(id.clone(), goal);
        Ok(id)
    }

    /// 分解插入：子目标依声明顺序入树，兄弟之间除声明的依赖外相互独立
    pub fn add_subgoals(
        &mut self,
        parent_id: &str,
        subgoals: Vec<Goal>,
    ) -> Result<Vec<GoalId>, EngineError> {
        let mut ids = Vec::with_capacity(subgoals.len());
        for subgoal in subgoals {
            ids.push(self.add_child(parent_id, subgoal)?);
        }
        Ok(ids)
    }

    pub fn get(&self, id: &str) -> Option<&Goal> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn dependencies_completed(&self, goal: &Goal) -> bool {
        goal.dependencies.iter().all(|dep| {
            self.nodes
                .get(dep)
                .map(|g| g.status == GoalStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// 选择下一个可执行目标
    ///
    /// 返回 None 表示树已解决或剩余目标全部被阻塞，两种情况对调用方
    /// 等价：外层循环终止。区分需要检视树本身（stats / blocked_ids）。
    pub fn select_next(&self) -> Option<&Goal> {
        let mut best: Option<&Goal> = None;
        for id in &self.order {
            let goal = &self.nodes[id];
            if goal.status != GoalStatus::Pending || !self.dependencies_completed(goal) {
                continue;
            }
            match best {
                // 严格大于才替换：同优先级保持先插入者
                Some(b) if goal.priority <= b.priority => {}
                _ => best = Some(goal),
            }
        }
        best
    }

    /// 标记目标进入执行（单写者：只有当前执行该目标的引擎调用）
    pub fn mark_in_progress(&mut self, id: &str) {
        if let Some(goal) = self.nodes.get_mut(id) {
            goal.status = GoalStatus::InProgress;
            goal.updated_at = chrono::Utc::now().timestamp();
        }
    }

    /// 将结果折叠回目标，返回是否有状态变化（唯一的进度信号）
    ///
    /// SUCCESS -> completed；FAILURE -> failed（失败原因入审计列表）；
    /// 其余状态保持不变，等待人工介入。
    pub fn update(&mut self, id: &str, outcome: &Outcome) -> bool {
        let Some(goal) = self.nodes.get_mut(id) else {
            return false;
        };
        let now = chrono::Utc::now().timestamp();
        match outcome.status {
            OutcomeStatus::Success => {
                goal.status = GoalStatus::Completed;
                goal.completed_at = Some(now);
                goal.updated_at = now;
                true
            }
            OutcomeStatus::Failure => {
                goal.status = GoalStatus::Failed;
                if let Some(err) = &outcome.error {
                    goal.failure_reasons.push(err.clone());
                }
                goal.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// 是否仍有未到终态的目标
    pub fn has_remaining(&self) -> bool {
        self.nodes.values().any(|g| !g.status.is_terminal())
    }

    /// 各状态的节点数
    pub fn stats(&self) -> HashMap<GoalStatus, usize> {
        let mut stats = HashMap::new();
        for goal in self.nodes.values() {
            *stats.entry(goal.status).or_insert(0) += 1;
        }
        stats
    }

    /// 已到终态的目标数（进度单调性的观测值）
    pub fn terminal_count(&self) -> usize {
        self.nodes.values().filter(|g| g.status.is_terminal()).count()
    }

    /// 在目标上记录一条元信息（grounding 校验结果等）
    pub fn set_meta(&mut self, id: &str, key: &str, value: Value) {
        if let Some(goal) = self.nodes.get_mut(id) {
            goal.meta.insert(key.to_string(), value);
            goal.updated_at = chrono::Utc::now().timestamp();
        }
    }

    /// 将产出转发给依赖方：写入 meta.inputs[from]，供后续目标的规划使用
    pub fn forward_artifacts(&mut self, from: &str, artifacts: Value) {
        let dependents: Vec<GoalId> = self
            .order
            .iter()
            .filter(|id| self.nodes[*id].dependencies.iter().any(|d| d == from))
            .cloned()
            .collect();
        for id in dependents {
            if let Some(goal) = self.nodes.get_mut(&id) {
                let inputs = goal
                    .meta
                    .entry("inputs".to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Value::Object(map) = inputs {
                    map.insert(from.to_string(), artifacts.clone());
                }
            }
        }
    }

    /// 因依赖失败而永远不可能被选中的目标（审计用，不改状态）
    pub fn blocked_ids(&self) -> Vec<GoalId> {
        self.order
            .iter()
            .filter(|id| {
                let goal = &self.nodes[*id];
                goal.status == GoalStatus::Pending
                    && goal.dependencies.iter().any(|dep| {
                        self.nodes
                            .get(dep)
                            .map(|g| g.status == GoalStatus::Failed)
                            .unwrap_or(false)
                    })
            })
            .cloned()
            .collect()
    }

    /// 审计快照（JSON），按插入顺序输出
    pub fn to_json(&self) -> Value {
        let nodes: Vec<Value> = self
            .order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter_map(|g| serde_json::to_value(g).ok())
            .collect();
        serde_json::json!({ "goals": nodes })
    }
}
