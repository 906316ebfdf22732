//! 计划执行器
//!
//! 按序执行计划步骤（stepIndex 从 1 起），每步依次：before_step 检查点 →
//! 权限门 → 干跑风险门 → 派生回滚动作 → 人工审批门（五个独立触发条件取或）→
//! 停止条件复查 → 真实执行。步骤失败时已派生的回滚动作恰好执行一次；
//! 成功时记录遥测并按需输出进度摘要，然后 after_step 检查点。
//! 任何检查点的拒绝或超时立即终止，执行器从不越过被否决的检查点。

use std::collections::HashSet;
use std::time::Duration;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::approval::ApprovalDecision;
use crate::core::Outcome;
use crate::engine::events::{send_event, EngineEvent};
use crate::goal::Goal;
use crate::governor::{
    CheckpointDecision, CheckpointEvent, ContextSnapshot, Governor, ResourceBounds,
};
use crate::plan::{Plan, Step, StepKind};
use crate::telemetry::TelemetryFeed;
use crate::tools::{ExecMode, StepReport, ToolRunner};

/// 输出预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 从计划与边界派生的执行约束
#[derive(Debug, Clone)]
pub struct ExecConstraints {
    /// 允许的工具权限标签；空集合表示不设限
    pub tool_permissions: HashSet<String>,
    pub enable_dry_runs: bool,
    pub summary_every_n: Option<usize>,
    pub cost_escalation_threshold: f64,
    pub min_confidence: f64,
    pub approval_timeout: Duration,
}

/// 派生执行约束：权限、干跑开关、摘要周期与审批阈值都来自边界
pub fn derive_constraints(_plan: &Plan, bounds: &ResourceBounds) -> ExecConstraints {
    ExecConstraints {
        tool_permissions: bounds.tool_permissions.iter().cloned().collect(),
        enable_dry_runs: bounds.enable_dry_runs,
        summary_every_n: bounds.summary_every_n,
        cost_escalation_threshold: bounds.cost_escalation_threshold,
        min_confidence: bounds.min_confidence,
        approval_timeout: bounds.approval_timeout,
    }
}

/// 步骤需要人工验证的触发条件（五个独立条件取或，全部都要检查）
pub fn requires_verification(step: &Step, constraints: &ExecConstraints) -> Option<&'static str> {
    if step.ambiguous {
        return Some("ambiguous_requirement");
    }
    if step.kind == StepKind::ExternalWrite {
        return Some("external_write");
    }
    if step.policy_gated {
        return Some("policy_gate");
    }
    if step.estimated_cost > constraints.cost_escalation_threshold {
        return Some("resource_escalation");
    }
    if step.confidence < constraints.min_confidence {
        return Some("low_confidence");
    }
    None
}

/// 为步骤派生回滚动作：写类步骤生成逆操作步骤，读类无需回滚
pub fn derive_rollback(step: &Step) -> Option<Step> {
    match step.kind {
        StepKind::Write | StepKind::ExternalWrite => Some(
            Step::new(format!("rollback: {}", step.action), step.tool.clone())
                .with_args(serde_json::json!({
                    "rollback_of": step.action,
                    "original_args": step.args,
                }))
                .with_permission(step.required_permission.clone())
                .with_kind(StepKind::Write),
        ),
        StepKind::Read | StepKind::Checkpoint => None,
    }
}

/// 执行记录（供验收评审与根因分析使用）
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecord {
    /// 成功步骤的输出，按执行顺序
    pub outputs: Vec<String>,
    pub steps_executed: usize,
    pub steps_total: usize,
    /// 失败步骤的序号（1 起）
    pub failed_step: Option<usize>,
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!(
            "{}...",
            s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        s.to_string()
    }
}

/// 计划执行器
pub struct PlanExecutor {
    governor: Arc<Governor>,
    tools: Arc<dyn ToolRunner>,
    telemetry: Arc<TelemetryFeed>,
    event_tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl PlanExecutor {
    pub fn new(
        governor: Arc<Governor>,
        tools: Arc<dyn ToolRunner>,
        telemetry: Arc<TelemetryFeed>,
        event_tx: Option<mpsc::UnboundedSender<EngineEvent>>,
    ) -> Self {
        Self {
            governor,
            tools,
            telemetry,
            event_tx,
        }
    }

    fn permitted(&self, step: &Step, constraints: &ExecConstraints) -> bool {
        constraints.tool_permissions.is_empty()
            || constraints.tool_permissions.contains(&step.required_permission)
    }

    /// 检查点求值 + 遥测记录；返回 Some(halt outcome) 表示必须立即终止
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
                Some(
                    Outcome::stop_and_wait(halt_error)
                        .with_meta("decision", serde_json::json!(name)),
                )
            }
        }
    }

    /// 执行计划，返回结果与执行记录
    pub async fn execute(
        &self,
        goal: &Goal,
        plan: &Plan,
        constraints: &ExecConstraints,
    ) -> (Outcome, ExecutionRecord) {
        let mut record = ExecutionRecord {
            steps_total: plan.steps.len(),
            ..ExecutionRecord::default()
        };

        for (i, step) in plan.steps.iter().enumerate() {
            let step_index = i + 1;
            let ctx = ContextSnapshot::Step {
                goal_id: goal.id.clone(),
                step_index,
                tool: step.tool.clone(),
                action: step.action.clone(),
                succeeded: None,
            };

            if let Some(halt) = self
                .checkpoint_gate(CheckpointEvent::BeforeStep, &ctx, "checkpoint_halt_before_step")
                .await
            {
                return (halt.with_meta("step_index", serde_json::json!(step_index)), record);
            }

            if !self.permitted(step, constraints) {
                send_event(
                    &self.event_tx,
                    EngineEvent::StepFailed {
                        step_index,
                        tool: step.tool.clone(),
                        reason: "permission_denied".to_string(),
                    },
                );
                record.failed_step = Some(step_index);
                return (
                    Outcome::failure("permission_denied")
                        .with_meta("step_index", serde_json::json!(step_index))
                        .with_meta("permission", serde_json::json!(step.required_permission)),
                    record,
                );
            }

            // 干跑优先：发现风险信号则在任何真实副作用前取消该步
            if step.supports_dry_run && constraints.enable_dry_runs {
                let dry = self.tools.execute(step, ExecMode::DryRun).await;
                self.governor.record_work(dry.cost, dry.tokens);
                if let Some(risk) = dry.risk {
                    send_event(
                        &self.event_tx,
                        EngineEvent::DryRunRisk {
                            step_index,
                            reason: risk.clone(),
                        },
                    );
                    record.failed_step = Some(step_index);
                    return (
                        Outcome::failure("dry_run_risk_detected")
                            .with_meta("step_index", serde_json::json!(step_index))
                            .with_meta("risk", serde_json::json!(risk)),
                        record,
                    );
                }
            }

            // 真实执行前先派生回滚动作
            let rollback = derive_rollback(step);

            if let Some(trigger) = requires_verification(step, constraints) {
                send_event(
                    &self.event_tx,
                    EngineEvent::ApprovalRequested {
                        step_index,
                        trigger: trigger.to_string(),
                    },
                );
                let decision = self
                    .governor
                    .approval()
                    .request(
                        "step_approval",
                        trigger,
                        ctx.to_value(),
                        constraints.approval_timeout,
                    )
                    .await;
                if decision != ApprovalDecision::Approved {
                    // 审批被拒/超时按人工跟进上报
                    self.governor.approval().notify(
                        "followup",
                        "approval_not_granted",
                        ctx.to_value(),
                    );
                    record.failed_step = Some(step_index);
                    return (
                        Outcome::failure("approval_not_granted")
                            .with_meta("step_index", serde_json::json!(step_index))
                            .with_meta("trigger", serde_json::json!(trigger))
                            .with_meta("decision", serde_json::to_value(decision).unwrap_or_default()),
                        record,
                    );
                }
            }

            // 真实副作用前复查全局停止条件（距上次循环检查后状态可能已变化）
            if self.governor.check_stop_conditions() {
                record.failed_step = Some(step_index);
                return (
                    Outcome::stop_and_wait("stop_conditions_triggered")
                        .with_meta("step_index", serde_json::json!(step_index)),
                    record,
                );
            }

            send_event(
                &self.event_tx,
                EngineEvent::StepStarted {
                    step_index,
                    tool: step.tool.clone(),
                    action: step.action.clone(),
                },
            );
            let report = self.tools.execute(step, ExecMode::Live).await;
            self.governor.record_work(report.cost, report.tokens);
            self.telemetry.log_step(&goal.id, step_index, step, &report);

            if !report.success {
                let reason = report.error.clone().unwrap_or_else(|| "step_failed".to_string());
                send_event(
                    &self.event_tx,
                    EngineEvent::StepFailed {
                        step_index,
                        tool: step.tool.clone(),
                        reason: reason.clone(),
                    },
                );
                // 回滚对步骤失败是无条件的：已派生的动作恰好执行一次
                let mut rolled_back = false;
                if let Some(rb) = rollback {
                    let rb_report = self.tools.execute(&rb, ExecMode::Live).await;
                    self.governor.record_work(rb_report.cost, rb_report.tokens);
                    rolled_back = true;
                    send_event(
                        &self.event_tx,
                        EngineEvent::RollbackInvoked {
                            step_index,
                            tool: rb.tool.clone(),
                        },
                    );
                }
                record.failed_step = Some(step_index);
                return (
                    Outcome::failure(reason)
                        .with_meta("step_index", serde_json::json!(step_index))
                        .with_meta("rollback_invoked", serde_json::json!(rolled_back)),
                    record,
                );
            }

            record.outputs.push(report.output.clone());
            record.steps_executed += 1;
            send_event(
                &self.event_tx,
                EngineEvent::StepCompleted {
                    step_index,
                    tool: step.tool.clone(),
                    preview: preview(&report.output),
                },
            );

            let periodic = constraints
                .summary_every_n
                .map(|n| n > 0 && step_index % n == 0)
                .unwrap_or(false);
            if step.kind == StepKind::Checkpoint || periodic {
                send_event(
                    &self.event_tx,
                    EngineEvent::ProgressSummary {
                        step_index,
                        total: record.steps_total,
                        preview: preview(&report.output),
                    },
                );
            }

            let after_ctx = ContextSnapshot::Step {
                goal_id: goal.id.clone(),
                step_index,
                tool: step.tool.clone(),
                action: step.action.clone(),
                succeeded: Some(true),
            };
            if let Some(halt) = self
                .checkpoint_gate(CheckpointEvent::AfterStep, &after_ctx, "checkpoint_halt_after_step")
                .await
            {
                return (halt.with_meta("step_index", serde_json::json!(step_index)), record);
            }
        }

        let post_ctx = ContextSnapshot::PostExecution {
            goal_id: goal.id.clone(),
            steps_executed: record.steps_executed,
        };
        if let Some(halt) = self
            .checkpoint_gate(
                CheckpointEvent::PostExecution,
                &post_ctx,
                "checkpoint_halt_post_execution",
            )
            .await
        {
            return (halt, record);
        }

        let outcome = Outcome::success_with(serde_json::json!({
            "steps_executed": record.steps_executed,
            "outputs": record.outputs,
        }));
        (outcome, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalChannel;
    use crate::governor::{Checkpoint, CheckpointMode};

    fn harness(bounds: ResourceBounds) -> (PlanExecutor, Arc<ScriptedRunnerHandle>) {
        let (approval, _task_rx) = ApprovalChannel::new();
        let governor = Arc::new(Governor::new(bounds, Arc::new(approval)));
        let runner = Arc::new(crate::tools::ScriptedRunner::new());
        let executor = PlanExecutor::new(
            governor,
            runner.clone(),
            Arc::new(TelemetryFeed::in_memory()),
            None,
        );
        (executor, runner)
    }

    type ScriptedRunnerHandle = crate::tools::ScriptedRunner;

    #[tokio::test]
    async fn test_permission_denied_before_any_effect() {
        let bounds = ResourceBounds::default().with_tool_permissions(vec!["read".to_string()]);
        let (executor, runner) = harness(bounds);
        let goal = Goal::new("g");
        let plan = Plan::new(vec![Step::new("write file", "fs").with_permission("write")]);
        let constraints = derive_constraints(&plan, executor.governor.bounds());

        let (outcome, record) = executor.execute(&goal, &plan, &constraints).await;
        assert_eq!(outcome.error.as_deref(), Some("permission_denied"));
        assert!(runner.calls().is_empty());
        assert_eq!(record.steps_executed, 0);
    }

    #[tokio::test]
    async fn test_dry_run_risk_cancels_real_execution() {
        let (executor, runner) = harness(ResourceBounds::default());
        runner.push_dry_report(StepReport::risky("would drop table"));

        let goal = Goal::new("g");
        let plan = Plan::new(vec![Step::new("drop table", "db")
            .with_kind(StepKind::Write)
            .dry_runnable()]);
        let constraints = derive_constraints(&plan, executor.governor.bounds());

        let (outcome, _) = executor.execute(&goal, &plan, &constraints).await;
        assert_eq!(outcome.error.as_deref(), Some("dry_run_risk_detected"));
        // 只有一次干跑调用，没有真实执行
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].dry_run);
    }

    #[tokio::test]
    async fn test_rollback_invoked_exactly_once_on_failure() {
        let (executor, runner) = harness(ResourceBounds::default());
        runner.push_report(StepReport::failed("disk_full"));

        let goal = Goal::new("g");
        let plan = Plan::new(vec![Step::new("write file", "fs").with_kind(StepKind::Write)]);
        let constraints = derive_constraints(&plan, executor.governor.bounds());

        let (outcome, record) = executor.execute(&goal, &plan, &constraints).await;
        assert_eq!(outcome.error.as_deref(), Some("disk_full"));
        assert_eq!(outcome.meta.get("rollback_invoked"), Some(&serde_json::json!(true)));
        assert_eq!(record.failed_step, Some(1));

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].action.starts_with("rollback:"));
    }

    #[tokio::test]
    async fn test_read_step_failure_has_no_rollback() {
        let (executor, runner) = harness(ResourceBounds::default());
        runner.push_report(StepReport::failed("not_found"));

        let goal = Goal::new("g");
        let plan = Plan::new(vec![Step::new("read file", "fs")]);
        let constraints = derive_constraints(&plan, executor.governor.bounds());

        let (outcome, _) = executor.execute(&goal, &plan, &constraints).await;
        assert_eq!(outcome.meta.get("rollback_invoked"), Some(&serde_json::json!(false)));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rejecting_pre_step_checkpoint_runs_nothing() {
        let bounds = ResourceBounds::default().with_checkpoint(
            Checkpoint::new(CheckpointEvent::BeforeStep, CheckpointMode::Pause)
                .with_timeout(Duration::from_millis(20)),
        );
        let (executor, runner) = harness(bounds);

        let goal = Goal::new("g");
        let plan = Plan::new(vec![Step::new("anything", "echo")]);
        let constraints = derive_constraints(&plan, executor.governor.bounds());

        let (outcome, record) = executor.execute(&goal, &plan, &constraints).await;
        assert_eq!(outcome.error.as_deref(), Some("checkpoint_halt_before_step"));
        assert!(runner.calls().is_empty());
        assert_eq!(record.steps_executed, 0);
    }

    #[tokio::test]
    async fn test_verification_triggers_are_an_or_of_five() {
        let constraints = ExecConstraints {
            tool_permissions: HashSet::new(),
            enable_dry_runs: true,
            summary_every_n: None,
            cost_escalation_threshold: 5.0,
            min_confidence: 0.3,
            approval_timeout: Duration::from_secs(1),
        };
        assert_eq!(
            requires_verification(&Step::new("a", "t").ambiguous(), &constraints),
            Some("ambiguous_requirement")
        );
        assert_eq!(
            requires_verification(
                &Step::new("a", "t").with_kind(StepKind::ExternalWrite),
                &constraints
            ),
            Some("external_write")
        );
        assert_eq!(
            requires_verification(&Step::new("a", "t").policy_gated(), &constraints),
            Some("policy_gate")
        );
        assert_eq!(
            requires_verification(&Step::new("a", "t").with_estimated_cost(9.0), &constraints),
            Some("resource_escalation")
        );
        assert_eq!(
            requires_verification(&Step::new("a", "t").with_confidence(0.1), &constraints),
            Some("low_confidence")
        );
        assert_eq!(requires_verification(&Step::new("a", "t"), &constraints), None);
    }
}
