//! 顶层求解循环
//!
//! 反复从目标树选取下一个可执行目标，经治理器放行后交给目标执行循环，
//! 并把结果折叠回树。STOP_AND_WAIT / NEEDS_CLARIFICATION 排队人工跟进并
//! 停止整个运行；FAILURE 记为目标失败后继续下一个可执行目标，除非全局
//! 停止条件同时触发。每个 goal-result 对恰好调用一次 Update。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalChannel, HumanTask};
use crate::config::RetrievalSection;
use crate::core::{normalize, Outcome, OutcomeStatus, RecoveryEngine};
use crate::engine::events::{send_event, EngineEvent};
use crate::engine::goal_loop::GoalRunner;
use crate::engine::review::Reviewer;
use crate::executor::PlanExecutor;
use crate::goal::GoalTree;
use crate::governor::{
    CheckpointDecision, CheckpointEvent, ContextSnapshot, Escalation, EscalationReason, Governor,
    ResourceBounds, UsageSnapshot,
};
use crate::plan::Planner;
use crate::retrieval::ResearchProvider;
use crate::telemetry::TelemetryFeed;
use crate::tools::ToolRunner;

/// 一次运行的最终报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: OutcomeStatus,
    pub completed: usize,
    pub failed: usize,
    pub remaining: usize,
    pub iterations: u64,
    pub usage: UsageSnapshot,
    pub escalations: Vec<Escalation>,
    /// 运行提前停止的原因（正常跑完为 None）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_on: Option<String>,
}

/// 目标驱动执行引擎
pub struct Engine {
    planner: Arc<dyn Planner>,
    tools: Arc<dyn ToolRunner>,
    governor: Arc<Governor>,
    approval: Arc<ApprovalChannel>,
    research: Option<Arc<dyn ResearchProvider>>,
    telemetry: Arc<TelemetryFeed>,
    event_tx: Option<mpsc::UnboundedSender<EngineEvent>>,
    cancel_token: CancellationToken,
    retrieval_cfg: RetrievalSection,
}

impl Engine {
    /// 创建引擎，返回 (引擎, 人工任务接收端)
    pub fn new(
        planner: Arc<dyn Planner>,
        tools: Arc<dyn ToolRunner>,
        bounds: ResourceBounds,
    ) -> (Self, mpsc::UnboundedReceiver<HumanTask>) {
        let (approval, task_rx) = ApprovalChannel::new();
        let approval = Arc::new(approval);
        let governor = Arc::new(Governor::new(bounds, approval.clone()));
        (
            Self {
                planner,
                tools,
                governor,
                approval,
                research: None,
                telemetry: Arc::new(TelemetryFeed::in_memory()),
                event_tx: None,
                cancel_token: CancellationToken::new(),
                retrieval_cfg: RetrievalSection::default(),
            },
            task_rx,
        )
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryFeed>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_research(mut self, research: Arc<dyn ResearchProvider>) -> Self {
        self.research = Some(research);
        self
    }

    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_retrieval_config(mut self, cfg: RetrievalSection) -> Self {
        self.retrieval_cfg = cfg;
        self
    }

    /// 审批通道（外部系统用它推送决策）
    pub fn approval(&self) -> Arc<ApprovalChannel> {
        self.approval.clone()
    }

    pub fn governor(&self) -> Arc<Governor> {
        self.governor.clone()
    }

    pub fn telemetry(&self) -> Arc<TelemetryFeed> {
        self.telemetry.clone()
    }

    fn goal_runner(&self) -> GoalRunner {
        GoalRunner {
            planner: self.planner.clone(),
            executor: PlanExecutor::new(
                self.governor.clone(),
                self.tools.clone(),
                self.telemetry.clone(),
                self.event_tx.clone(),
            ),
            governor: self.governor.clone(),
            research: self.research.clone(),
            telemetry: self.telemetry.clone(),
            reviewer: Reviewer::new(self.telemetry.learning().clone()),
            recovery: RecoveryEngine::new(),
            event_tx: self.event_tx.clone(),
            retrieval_max_age: Duration::from_secs(self.retrieval_cfg.max_age_secs),
            require_trusted: self.retrieval_cfg.require_trusted,
        }
    }

    /// 人工跟进：描述确切的目标与原因，排入审批方的任务队列
    fn queue_human_followup(&self, goal_id: &str, description: &str, outcome: &Outcome) {
        let reason = outcome
            .error
            .clone()
            .unwrap_or_else(|| "needs_human_attention".to_string());
        self.approval.notify(
            "followup",
            &reason,
            serde_json::json!({
                "goal_id": goal_id,
                "description": description,
                "status": outcome.status,
                "meta": outcome.meta,
            }),
        );
        send_event(
            &self.event_tx,
            EngineEvent::HumanFollowupQueued {
                goal_id: goal_id.to_string(),
                reason,
            },
        );
    }

    fn report(&self, tree: &GoalTree, halted_on: Option<String>, halt_status: Option<OutcomeStatus>) -> RunReport {
        let stats = tree.stats();
        let completed = stats.get(&crate::goal::GoalStatus::Completed).copied().unwrap_or(0);
        let failed = stats.get(&crate::goal::GoalStatus::Failed).copied().unwrap_or(0);
        let remaining = tree.len() - completed - failed;
        let usage = self.governor.usage();

        let status = if remaining == 0 && failed == 0 && !tree.is_empty() {
            OutcomeStatus::Success
        } else if let Some(status) = halt_status {
            status
        } else {
            OutcomeStatus::Failure
        };

        send_event(
            &self.event_tx,
            EngineEvent::RunFinished {
                completed,
                failed,
                remaining,
            },
        );
        RunReport {
            status,
            completed,
            failed,
            remaining,
            iterations: usage.iterations,
            usage,
            escalations: self.governor.escalations(),
            halted_on,
        }
    }

    /// 运行求解循环直到树解决、被阻塞或被治理器停下
    pub async fn run(&self, tree: &mut GoalTree) -> RunReport {
        let runner = self.goal_runner();

        while tree.has_remaining() {
            let iteration = self.governor.usage().iterations;
            send_event(&self.event_tx, EngineEvent::LoopIteration { iteration });

            if self.cancel_token.is_cancelled() {
                return self.report(tree, Some("cancelled".to_string()), Some(OutcomeStatus::StopAndWait));
            }

            for escalation in self.governor.manage_bounds() {
                self.telemetry.log_escalation(&escalation);
                send_event(
                    &self.event_tx,
                    EngineEvent::Escalated {
                        reason: format!("{:?}", escalation.reason),
                        detail: escalation.detail.clone(),
                    },
                );
            }

            // 主安全阀：命中即短路其余处理
            if self.governor.check_stop_conditions() {
                return self.report(
                    tree,
                    Some("stop_conditions_triggered".to_string()),
                    Some(OutcomeStatus::StopAndWait),
                );
            }

            if let Some(max) = self.governor.bounds().max_iterations {
                if iteration >= max {
                    let escalation = self
                        .governor
                        .escalate(EscalationReason::MaxIterationsReached, &format!("iteration {iteration}"));
                    self.telemetry.log_escalation(&escalation);
                    return self.report(
                        tree,
                        Some("max_iterations_reached".to_string()),
                        Some(OutcomeStatus::StopAndWait),
                    );
                }
            }

            if self.governor.has_exceeded_no_progress() {
                let escalation = self.governor.escalate(EscalationReason::NoProgress, "no goal reached a terminal status within the window");
                self.telemetry.log_escalation(&escalation);
                return self.report(
                    tree,
                    Some("no_progress".to_string()),
                    Some(OutcomeStatus::StopAndWait),
                );
            }

            let ctx = ContextSnapshot::LoopIteration {
                iteration,
                terminal_goals: tree.terminal_count(),
                remaining_goals: tree.len() - tree.terminal_count(),
            };
            if self
                .governor
                .evaluate_checkpoints(CheckpointEvent::LoopIterationStart, &ctx)
                .await
                != CheckpointDecision::Continue
            {
                return self.report(
                    tree,
                    Some("checkpoint_halt_loop_iteration_start".to_string()),
                    Some(OutcomeStatus::StopAndWait),
                );
            }

            // None 表示树已解决或全部被阻塞，两种情况同样终止循环
            let Some(goal) = tree.select_next() else {
                break;
            };
            let (goal_id, description, priority, depth) = (
                goal.id.clone(),
                goal.description.clone(),
                goal.priority,
                goal.depth,
            );
            send_event(
                &self.event_tx,
                EngineEvent::GoalSelected {
                    goal_id: goal_id.clone(),
                    description: description.clone(),
                },
            );

            let ctx = ContextSnapshot::GoalSelected {
                goal_id: goal_id.clone(),
                description: description.clone(),
                priority,
                depth,
            };
            if self
                .governor
                .evaluate_checkpoints(CheckpointEvent::GoalSelected, &ctx)
                .await
                != CheckpointDecision::Continue
            {
                return self.report(
                    tree,
                    Some("checkpoint_halt_goal_selected".to_string()),
                    Some(OutcomeStatus::StopAndWait),
                );
            }

            tree.mark_in_progress(&goal_id);
            let outcome = runner.execute_goal(tree, goal_id.clone(), 0).await;
            let outcome = normalize(outcome.to_value());
            self.telemetry.log_goal(&goal_id, &outcome);

            if outcome.is_halt() {
                self.queue_human_followup(&goal_id, &description, &outcome);
                return self.report(tree, outcome.error.clone(), Some(outcome.status));
            }

            let ctx = ContextSnapshot::GoalExecuted {
                goal_id: goal_id.clone(),
                status: outcome.status,
            };
            if self
                .governor
                .evaluate_checkpoints(CheckpointEvent::AfterGoalExecution, &ctx)
                .await
                != CheckpointDecision::Continue
            {
                return self.report(
                    tree,
                    Some("checkpoint_halt_after_goal_execution".to_string()),
                    Some(OutcomeStatus::StopAndWait),
                );
            }

            // 每个 goal-result 对恰好折叠一次
            let progress = tree.update(&goal_id, &outcome);
            if progress {
                self.governor.mark_progress();
            }

            match outcome.status {
                OutcomeStatus::Success => {
                    send_event(
                        &self.event_tx,
                        EngineEvent::GoalCompleted {
                            goal_id: goal_id.clone(),
                        },
                    );
                }
                OutcomeStatus::Failure => {
                    send_event(
                        &self.event_tx,
                        EngineEvent::GoalFailed {
                            goal_id: goal_id.clone(),
                            reason: outcome.error.clone().unwrap_or_default(),
                        },
                    );
                    // 失败目标记账后继续下一个可执行目标，除非停止条件同时触发
                    if self.governor.check_stop_conditions() {
                        return self.report(
                            tree,
                            Some("stop_conditions_triggered".to_string()),
                            Some(OutcomeStatus::StopAndWait),
                        );
                    }
                }
                _ => {}
            }

            self.governor.tick_iteration();
        }

        self.report(tree, None, None)
    }
}
