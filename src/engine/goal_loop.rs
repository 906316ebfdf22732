//! 目标执行循环（递归核心）
//!
//! 单个目标的九段状态机：深度护栏 → 规划 → 信息充分性 → grounding 软门 →
//! 复杂度门（分解递归）→ 执行准备（约束派生 + 研究数据校验）→ 终检 →
//! 预执行检查点 + 受限重试的计划执行 → 评审与一次调整重执行。
//! 分解递归按声明顺序执行子目标，第一个非成功结果立即原样上抛
//! （快速失败，不做兄弟间的部分成功聚合）。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::core::{normalize, EngineError, Outcome, RecoveryAction, RecoveryEngine};
use crate::engine::events::{send_event, EngineEvent};
use crate::engine::review::{ReviewVerdict, Reviewer};
use crate::executor::{derive_constraints, ExecConstraints, ExecutionRecord, PlanExecutor};
use crate::goal::{Goal, GoalId, GoalTree};
use crate::governor::{CheckpointDecision, CheckpointEvent, ContextSnapshot, Governor};
use crate::plan::{InfoOutcome, Plan, Planner};
use crate::retrieval::{has_trusted_provenance, is_stale, ResearchProvider};
use crate::telemetry::TelemetryFeed;

/// grounding 软门召回的范例数量
const GROUNDING_RECALL_K: usize = 3;

/// 目标级执行器：持有全部协作方，被顶层循环复用
pub struct GoalRunner {
    pub(crate) planner: Arc<dyn Planner>,
    pub(crate) executor: PlanExecutor,
    pub(crate) governor: Arc<Governor>,
    pub(crate) research: Option<Arc<dyn ResearchProvider>>,
    pub(crate) telemetry: Arc<TelemetryFeed>,
    pub(crate) reviewer: Reviewer,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) event_tx: Option<mpsc::UnboundedSender<EngineEvent>>,
    pub(crate) retrieval_max_age: Duration,
    pub(crate) require_trusted: bool,
}

impl GoalRunner {
    /// 检查点求值；Some 表示当前目标必须立即终止
    async fn checkpoint_gate(
        &self,
        event: CheckpointEvent,
        ctx: &ContextSnapshot,
        halt_error: &str,
    ) -> Option<Outcome> {
        let decision = self.governor.evaluate_checkpoints(event, ctx).await;
        match decision {
            CheckpointDecision::Continue => {
                self.telemetry.log_checkpoint(event.as_str(), "CONTINUE");
                None
            }
            CheckpointDecision::Rejected | CheckpointDecision::Timeout => {
                let name = if decision == CheckpointDecision::Rejected {
                    "REJECTED"
                } else {
                    "TIMEOUT"
                };
                self.telemetry.log_checkpoint(event.as_str(), name);
                send_event(
                    &self.event_tx,
                    EngineEvent::CheckpointHalted {
                        event: event.as_str().to_string(),
                        decision: name.to_string(),
                    },
                );
                Some(Outcome::stop_and_wait(halt_error).with_meta("decision", serde_json::json!(name)))
            }
        }
    }

    /// 终检：执行前对计划与约束做最后校验
    fn final_check(&self, plan: &Plan, constraints: &ExecConstraints) -> bool {
        if plan.steps.is_empty() {
            return false;
        }
        plan.steps.iter().all(|step| {
            constraints.tool_permissions.is_empty()
                || constraints.tool_permissions.contains(&step.required_permission)
        })
    }

    /// 受限重试的计划执行：瞬时失败按指数退避重试，最多 retry_limit 次
    async fn execute_with_retries(
        &self,
        goal: &Goal,
        plan: &Plan,
        constraints: &ExecConstraints,
    ) -> (Outcome, ExecutionRecord) {
        let bounds = self.governor.bounds();
        let (mut outcome, mut record) = self.executor.execute(goal, plan, constraints).await;
        let mut attempt: u32 = 0;
        // 恢复引擎只对瞬时错误给出 RetryBackoff，其余失败直接进入评审
        let retryable = |o: &Outcome| {
            o.error
                .as_deref()
                .map(|code| {
                    let err = EngineError::ToolExecutionFailed(code.to_string());
                    self.recovery.handle(&err) == RecoveryAction::RetryBackoff
                })
                .unwrap_or(false)
        };
        while attempt < bounds.retry_limit && !outcome.is_success() && retryable(&outcome) {
            let backoff = bounds.retry_backoff * 2u32.saturating_pow(attempt);
            send_event(
                &self.event_tx,
                EngineEvent::RetryScheduled {
                    attempt: attempt + 1,
                    backoff_ms: backoff.as_millis() as u64,
                },
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
            let (next_outcome, next_record) = self.executor.execute(goal, plan, constraints).await;
            outcome = next_outcome;
            record = next_record;
        }
        if attempt > 0 {
            outcome = outcome.with_meta("retry_count", serde_json::json!(attempt));
        }
        (outcome, record)
    }

    /// 执行单个目标（递归入口）
    pub fn execute_goal<'a>(
        &'a self,
        tree: &'a mut GoalTree,
        goal_id: GoalId,
        depth: u32,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            // 深度护栏：超限永远不 panic、不无限递归
            if let Some(max_depth) = self.governor.bounds().max_depth {
                if depth > max_depth {
                    return Outcome::stop_and_wait("max_depth_exceeded")
                        .with_meta("goal_id", serde_json::json!(goal_id))
                        .with_meta("depth", serde_json::json!(depth));
                }
            }
            let goal = match tree.get(&goal_id) {
                Some(g) => g.clone(),
                None => return Outcome::failure("goal_not_found"),
            };

            // 规划
            let mut plan = match self.planner.create_plan(&goal).await {
                Ok(plan) => plan,
                Err(e) => return Outcome::failure(e.to_string()),
            };
            send_event(
                &self.event_tx,
                EngineEvent::PlanCreated {
                    goal_id: goal.id.clone(),
                    steps: plan.steps.len(),
                },
            );
            let ctx = ContextSnapshot::PlanCreated {
                goal_id: goal.id.clone(),
                step_count: plan.steps.len(),
            };
            if let Some(halt) = self
                .checkpoint_gate(CheckpointEvent::PlanCreated, &ctx, "checkpoint_halt_on_plan_created")
                .await
            {
                return halt;
            }

            // 信息充分性：定义不良的计划先收集信息，不足则挂起等待外部介入
            if !plan.is_well_defined() {
                send_event(
                    &self.event_tx,
                    EngineEvent::InfoGathering {
                        goal_id: goal.id.clone(),
                    },
                );
                match self.planner.gather_information(&goal, &plan).await {
                    Ok(InfoOutcome::Sufficient(info)) => {
                        plan = match self.planner.update_plan(&plan, &info).await {
                            Ok(plan) => plan,
                            Err(e) => return Outcome::failure(e.to_string()),
                        };
                    }
                    Ok(InfoOutcome::Insufficient) => {
                        return Outcome::stop_and_wait("insufficient_information")
                            .with_meta("goal_id", serde_json::json!(goal.id));
                    }
                    Err(e) => return Outcome::failure(e.to_string()),
                }
            }

            // grounding 软门：缺少可信来源时召回范例，只记录校验结果，不拦截
            if plan.grounding.is_empty() {
                let examples = self
                    .telemetry
                    .learning()
                    .recall_examples(&goal.description, GROUNDING_RECALL_K);
                tree.set_meta(
                    &goal_id,
                    "grounding_examples_found",
                    serde_json::json!(examples.len()),
                );
                send_event(
                    &self.event_tx,
                    EngineEvent::GroundingChecked {
                        goal_id: goal.id.clone(),
                        examples_found: examples.len(),
                    },
                );
            }

            // 复杂度门：过难的计划分解为子目标并按序递归，快速失败
            if plan.steps.len() > self.governor.bounds().decompose_above_steps {
                let subgoals = match self.planner.decompose_plan(&plan, &goal).await {
                    Ok(subgoals) => subgoals,
                    Err(e) => return Outcome::failure(e.to_string()),
                };
                send_event(
                    &self.event_tx,
                    EngineEvent::Decomposing {
                        goal_id: goal.id.clone(),
                        subgoals: subgoals.len(),
                    },
                );
                let ids = match tree.add_subgoals(&goal_id, subgoals) {
                    Ok(ids) => ids,
                    Err(e) => return Outcome::failure(e.to_string()),
                };
                for id in ids {
                    tree.mark_in_progress(&id);
                    let sub_outcome = self.execute_goal(&mut *tree, id.clone(), depth + 1).await;
                    let sub_outcome = normalize(sub_outcome.to_value());
                    tree.update(&id, &sub_outcome);
                    if !sub_outcome.is_success() {
                        // 失败的子目标结果原样上抛，后续兄弟不再尝试
                        return sub_outcome;
                    }
                }
                return Outcome::success();
            }

            // 执行准备：约束派生 + 研究数据的来源与新鲜度校验（正确性门）
            let constraints = derive_constraints(&plan, self.governor.bounds());
            if let Some(research) = &self.research {
                match research.retrieve(&goal, &plan).await {
                    Ok(data) => {
                        let untrusted = self.require_trusted && !has_trusted_provenance(&data);
                        if untrusted || is_stale(&data, self.retrieval_max_age) {
                            let reason = if untrusted { "untrusted_provenance" } else { "stale_data" };
                            send_event(
                                &self.event_tx,
                                EngineEvent::ResearchRejected {
                                    goal_id: goal.id.clone(),
                                    reason: reason.to_string(),
                                },
                            );
                            return Outcome::needs_clarification("invalid_or_untrusted_rag")
                                .with_meta("reason", serde_json::json!(reason))
                                .with_meta("source", serde_json::json!(data.source));
                        }
                    }
                    Err(e) => {
                        return Outcome::needs_clarification("invalid_or_untrusted_rag")
                            .with_meta("retrieval_error", serde_json::json!(e.to_string()));
                    }
                }
            }

            // 终检：失败则生成人工任务并请求澄清
            if !self.final_check(&plan, &constraints) {
                self.governor.approval().notify(
                    "followup",
                    "final_check_failed",
                    serde_json::json!({
                        "goal_id": goal.id,
                        "description": goal.description,
                        "steps": plan.steps.len(),
                    }),
                );
                return Outcome::needs_clarification("final_check_failed");
            }

            // 预执行检查点
            let ctx = ContextSnapshot::PreExecution {
                goal_id: goal.id.clone(),
                step_count: plan.steps.len(),
            };
            if let Some(halt) = self
                .checkpoint_gate(CheckpointEvent::PreExecution, &ctx, "checkpoint_halt_pre_execution")
                .await
            {
                return halt;
            }

            let (outcome, record) = self.execute_with_retries(&goal, &plan, &constraints).await;

            // 检查点停止不进入评审：目标级终止直接上抛
            if outcome.is_halt() {
                return outcome;
            }

            // 评审
            match self.reviewer.evaluate(&goal, &record, &outcome) {
                ReviewVerdict::Passed => {
                    self.governor.reset_validation_failures();
                    tree.forward_artifacts(&goal_id, serde_json::json!(record.outputs));
                    send_event(
                        &self.event_tx,
                        EngineEvent::ReviewPassed {
                            goal_id: goal.id.clone(),
                        },
                    );
                    let ctx = ContextSnapshot::ReviewPassed {
                        goal_id: goal.id.clone(),
                        criteria_count: goal.acceptance_criteria.len(),
                    };
                    if let Some(halt) = self
                        .checkpoint_gate(
                            CheckpointEvent::PostReviewPassed,
                            &ctx,
                            "checkpoint_halt_post_review",
                        )
                        .await
                    {
                        return halt;
                    }
                    outcome
                }
                ReviewVerdict::Failed(reason) => {
                    self.governor.note_validation_failure();
                    send_event(
                        &self.event_tx,
                        EngineEvent::ReviewFailed {
                            goal_id: goal.id.clone(),
                            reason: reason.clone(),
                        },
                    );
                    let root_cause = self.reviewer.analyze(&outcome, &record, &reason);
                    let adjusted = match self.planner.adjust_plan(&plan, &root_cause).await {
                        Ok(plan) => plan,
                        Err(e) => return Outcome::failure(e.to_string()),
                    };
                    // 调整后仍然过难：带着新的分解请求澄清，不再自动重试
                    if adjusted.steps.len() > self.governor.bounds().decompose_above_steps {
                        let proposed: Vec<String> = match self.planner.decompose_plan(&adjusted, &goal).await
                        {
                            Ok(subgoals) => subgoals.into_iter().map(|g| g.description).collect(),
                            Err(e) => return Outcome::failure(e.to_string()),
                        };
                        return Outcome::needs_clarification("still_too_difficult")
                            .with_data(serde_json::json!({ "proposed_subgoals": proposed }));
                    }
                    // 调整后的计划只再执行一次，结果规范化返回
                    let (adjusted_outcome, _) =
                        self.executor.execute(&goal, &adjusted, &constraints).await;
                    if adjusted_outcome.is_success() {
                        self.governor.reset_validation_failures();
                    }
                    normalize(adjusted_outcome.to_value())
                }
            }
        })
    }
}
