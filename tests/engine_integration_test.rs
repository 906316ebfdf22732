//! 求解循环集成测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use hive::approval::ApprovalDecision;
    use hive::core::OutcomeStatus;
    use hive::engine::Engine;
    use hive::goal::{GoalStatus, GoalTree};
    use hive::governor::{Checkpoint, CheckpointEvent, CheckpointMode, ResourceBounds};
    use hive::plan::{MockPlanner, Plan, ScriptedPlanner, Step, StepKind};
    use hive::retrieval::{ResearchData, StaticResearch};
    use hive::tools::{ScriptedRunner, StepReport};

    fn objectives(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn fast_bounds() -> ResourceBounds {
        ResourceBounds {
            retry_backoff: Duration::from_millis(1),
            ..ResourceBounds::default()
        }
    }

    #[tokio::test]
    async fn test_three_independent_objectives_all_complete() {
        let mut tree =
            GoalTree::construct(&objectives(&["objective a", "objective b", "objective c"]), vec![])
                .expect("tree");
        let bounds = ResourceBounds {
            max_iterations: Some(10),
            ..fast_bounds()
        };
        let (engine, _task_rx) =
            Engine::new(Arc::new(MockPlanner), Arc::new(ScriptedRunner::new()), bounds);

        let report = engine.run(&mut tree).await;

        assert_eq!(report.status, OutcomeStatus::Success);
        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 0);
        assert!(!tree.has_remaining());
        assert!(report.iterations <= 10);
    }

    #[tokio::test]
    async fn test_decomposition_fails_fast_without_reverting_siblings() {
        let mut tree = GoalTree::construct(&objectives(&["big objective"]), vec![]).expect("tree");

        // 父计划两步，阈值 1：必然分解为两个子目标
        let planner = ScriptedPlanner::new();
        planner.push_plan(Plan::new(vec![
            Step::new("first part", "echo"),
            Step::new("second part", "echo"),
        ]));

        // 子目标 a 成功；子目标 b 首次与调整后各失败一次（非瞬时，不重试）
        let runner = ScriptedRunner::new();
        runner.push_report(StepReport::ok("first done"));
        runner.push_report(StepReport::failed("tool_crashed"));
        runner.push_report(StepReport::failed("tool_crashed"));

        let bounds = ResourceBounds {
            decompose_above_steps: 1,
            ..fast_bounds()
        };
        let (engine, _task_rx) = Engine::new(Arc::new(planner), Arc::new(runner), bounds);
        let report = engine.run(&mut tree).await;

        // 父目标失败，第一个子目标的成功不被回退
        assert_eq!(report.failed, 2);
        assert_eq!(report.completed, 1);
        let stats = tree.stats();
        assert_eq!(stats.get(&GoalStatus::Completed), Some(&1));
        assert_eq!(stats.get(&GoalStatus::Failed), Some(&2));
    }

    #[tokio::test]
    async fn test_always_rejecting_pre_execution_checkpoint_blocks_all_steps() {
        let mut tree = GoalTree::construct(&objectives(&["guarded objective"]), vec![]).expect("tree");
        let bounds = fast_bounds().with_checkpoint(
            Checkpoint::new(CheckpointEvent::PreExecution, CheckpointMode::RequireApproval)
                .with_timeout(Duration::from_millis(30)),
        );
        let runner = Arc::new(ScriptedRunner::new());
        let (engine, mut task_rx) = Engine::new(Arc::new(MockPlanner), runner.clone(), bounds);

        let report = engine.run(&mut tree).await;

        // 检查点否决是绝对的：没有任何步骤被执行
        assert!(runner.calls().is_empty());
        assert_eq!(report.status, OutcomeStatus::StopAndWait);
        assert_eq!(report.halted_on.as_deref(), Some("checkpoint_halt_pre_execution"));

        // 检查点任务 + 人工跟进任务都已排队
        let mut kinds = Vec::new();
        while let Ok(task) = task_rx.try_recv() {
            kinds.push(task.kind);
        }
        assert!(kinds.iter().any(|k| k == "checkpoint"));
        assert!(kinds.iter().any(|k| k == "followup"));
    }

    #[tokio::test]
    async fn test_before_step_pause_times_out_after_exactly_the_timeout() {
        let mut tree = GoalTree::construct(&objectives(&["paused objective"]), vec![]).expect("tree");
        let timeout = Duration::from_millis(100);
        let bounds = fast_bounds().with_checkpoint(
            Checkpoint::new(CheckpointEvent::BeforeStep, CheckpointMode::Pause).with_timeout(timeout),
        );
        let runner = Arc::new(ScriptedRunner::new());
        let (engine, _task_rx) = Engine::new(Arc::new(MockPlanner), runner.clone(), bounds);

        let start = Instant::now();
        let report = engine.run(&mut tree).await;
        let elapsed = start.elapsed();

        assert_eq!(report.halted_on.as_deref(), Some("checkpoint_halt_before_step"));
        assert!(runner.calls().is_empty());
        // 不提前、也不无限等待
        assert!(elapsed >= timeout, "halted before the timeout: {elapsed:?}");
        assert!(elapsed < timeout * 20, "did not resolve near the timeout: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_approved_checkpoint_resumes_execution() {
        let mut tree = GoalTree::construct(&objectives(&["approved objective"]), vec![]).expect("tree");
        let bounds = fast_bounds().with_checkpoint(Checkpoint::new(
            CheckpointEvent::PreExecution,
            CheckpointMode::Pause,
        ));
        let (engine, mut task_rx) =
            Engine::new(Arc::new(MockPlanner), Arc::new(ScriptedRunner::new()), bounds);

        let approval = engine.approval();
        tokio::spawn(async move {
            while let Some(task) = task_rx.recv().await {
                if task.kind == "checkpoint" {
                    approval.resolve(&task.id, ApprovalDecision::Approved);
                }
            }
        });

        let report = engine.run(&mut tree).await;
        assert_eq!(report.status, OutcomeStatus::Success);
        assert_eq!(report.completed, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_at_most_retry_limit_plus_one_times() {
        let mut tree = GoalTree::construct(&objectives(&["flaky objective"]), vec![]).expect("tree");

        let planner = ScriptedPlanner::new();
        planner.push_plan(Plan::new(vec![Step::new("call flaky service", "flaky")]));
        // 调整后的计划同样指向 flaky 工具
        planner.push_adjusted(Plan::new(vec![Step::new("call flaky service", "flaky")]));

        let runner = Arc::new(ScriptedRunner::new());
        // 首轮 1 + 重试 3 次全部瞬时失败，调整后再失败一次
        for _ in 0..5 {
            runner.push_report(StepReport::failed("rate_limited"));
        }

        let bounds = ResourceBounds {
            retry_limit: 3,
            ..fast_bounds()
        };
        let (engine, _task_rx) = Engine::new(Arc::new(planner), runner.clone(), bounds);
        let report = engine.run(&mut tree).await;

        // 首轮恰好 retry_limit + 1 次尝试，加上调整后的一次重执行
        assert_eq!(runner.live_calls_for("flaky"), 5);
        assert_eq!(report.failed, 1);
        let goal = tree.select_next();
        assert!(goal.is_none());
    }

    #[tokio::test]
    async fn test_approval_denied_step_fails_goal_and_queues_tasks() {
        let mut tree = GoalTree::construct(&objectives(&["external write"]), vec![]).expect("tree");

        let external_step = Step::new("push to remote", "git").with_kind(StepKind::ExternalWrite);
        let planner = ScriptedPlanner::new();
        planner.push_plan(Plan::new(vec![external_step.clone()]).with_grounding(vec!["docs".into()]));
        planner.push_adjusted(Plan::new(vec![external_step]).with_grounding(vec!["docs".into()]));

        let runner = Arc::new(ScriptedRunner::new());
        let (engine, mut task_rx) = Engine::new(Arc::new(planner), runner.clone(), fast_bounds());

        let approval = engine.approval();
        tokio::spawn(async move {
            while let Some(task) = task_rx.recv().await {
                if task.kind == "step_approval" {
                    approval.resolve(&task.id, ApprovalDecision::Rejected);
                }
            }
        });

        let report = engine.run(&mut tree).await;

        assert_eq!(report.failed, 1);
        // 审批被拒：真实副作用从未发生
        assert!(runner.calls().is_empty());
        let stats = tree.stats();
        assert_eq!(stats.get(&GoalStatus::Failed), Some(&1));
    }

    #[tokio::test]
    async fn test_stale_research_data_needs_clarification() {
        let mut tree = GoalTree::construct(&objectives(&["researched objective"]), vec![]).expect("tree");
        let stale = ResearchData {
            content: "old knowledge".to_string(),
            source: "docs.rs".to_string(),
            trusted: true,
            fetched_at: chrono::Utc::now().timestamp() - 999_999,
        };
        let (engine, _task_rx) = Engine::new(
            Arc::new(MockPlanner),
            Arc::new(ScriptedRunner::new()),
            fast_bounds(),
        );
        let engine = engine.with_research(Arc::new(StaticResearch::new(stale)));

        let report = engine.run(&mut tree).await;

        assert_eq!(report.status, OutcomeStatus::NeedsClarification);
        assert_eq!(report.halted_on.as_deref(), Some("invalid_or_untrusted_rag"));
        // 目标未进入终态，等待人工澄清后重新发起
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_depth_bound_stops_recursion_without_crash() {
        let mut tree = GoalTree::construct(&objectives(&["deep objective"]), vec![]).expect("tree");

        let planner = ScriptedPlanner::new();
        // 所有计划都是两步：每层都触发分解，深度必然越限
        for _ in 0..8 {
            planner.push_plan(Plan::new(vec![
                Step::new("part one", "echo"),
                Step::new("part two", "echo"),
            ]));
        }

        let bounds = ResourceBounds {
            decompose_above_steps: 1,
            max_depth: Some(2),
            ..fast_bounds()
        };
        let (engine, _task_rx) =
            Engine::new(Arc::new(planner), Arc::new(ScriptedRunner::new()), bounds);
        let report = engine.run(&mut tree).await;

        assert_eq!(report.status, OutcomeStatus::StopAndWait);
        assert_eq!(report.halted_on.as_deref(), Some("max_depth_exceeded"));
    }

    #[tokio::test]
    async fn test_no_progress_window_escalates() {
        let mut tree = GoalTree::construct(&objectives(&["any objective"]), vec![]).expect("tree");
        let bounds = ResourceBounds {
            no_progress_timeout: Duration::from_secs(0),
            ..fast_bounds()
        };
        let (engine, _task_rx) =
            Engine::new(Arc::new(MockPlanner), Arc::new(ScriptedRunner::new()), bounds);
        let report = engine.run(&mut tree).await;

        assert_eq!(report.halted_on.as_deref(), Some("no_progress"));
        assert!(report
            .escalations
            .iter()
            .any(|e| format!("{:?}", e.reason).contains("NoProgress")));
    }

    #[tokio::test]
    async fn test_terminal_goal_count_is_monotonic() {
        let mut tree = GoalTree::construct(
            &objectives(&["first", "second", "third", "fourth"]),
            vec![],
        )
        .expect("tree");

        // 第二个被执行的目标失败，其余成功：终态数只增不减，失败不中断运行
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_report(StepReport::ok("done"));
        runner.push_report(StepReport::failed("tool_crashed"));
        runner.push_report(StepReport::failed("tool_crashed"));

        let (engine, _task_rx) = Engine::new(Arc::new(MockPlanner), runner, fast_bounds());
        let report = engine.run(&mut tree).await;

        assert_eq!(report.completed + report.failed, 4);
        assert_eq!(report.remaining, 0);
        assert_eq!(report.failed, 1);
        assert!(!tree.has_remaining());
    }
}
