//! Mock 工具执行方（测试与演示用）
//!
//! EchoRunner：总是成功，回显动作文本；
//! ScriptedRunner：按队列回放预设报告并记录每次调用（含干跑与回滚），
//! 队列耗尽时默认成功。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::plan::Step;
use crate::tools::runner::{ExecMode, StepReport, ToolRunner};

/// 回显工具：演示与冒烟测试
#[derive(Debug, Default)]
pub struct EchoRunner;

#[async_trait]
impl ToolRunner for EchoRunner {
    async fn execute(&self, step: &Step, mode: ExecMode) -> StepReport {
        match mode {
            ExecMode::DryRun => StepReport::ok(format!("[dry-run] {}", step.action)),
            ExecMode::Live => {
                let text = step
                    .args
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or(step.action.as_str());
                StepReport::ok(format!("Echo: {text}")).with_cost(0.01, 8)
            }
        }
    }
}

/// 一次工具调用的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCall {
    pub tool: String,
    pub action: String,
    pub dry_run: bool,
}

/// 脚本化工具执行方：Live 与 DryRun 各自一条回放队列
#[derive(Default)]
pub struct ScriptedRunner {
    live_reports: Mutex<VecDeque<StepReport>>,
    dry_reports: Mutex<VecDeque<StepReport>>,
    calls: Mutex<Vec<RunnerCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_report(&self, report: StepReport) {
        self.live_reports.lock().unwrap().push_back(report);
    }

    pub fn push_dry_report(&self, report: StepReport) {
        self.dry_reports.lock().unwrap().push_back(report);
    }

    /// 全部调用记录（含回滚步骤）
    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// 某工具的 Live 调用次数
    pub fn live_calls_for(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.tool == tool && !c.dry_run)
            .count()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn execute(&self, step: &Step, mode: ExecMode) -> StepReport {
        self.calls.lock().unwrap().push(RunnerCall {
            tool: step.tool.clone(),
            action: step.action.clone(),
            dry_run: mode == ExecMode::DryRun,
        });
        let queue = match mode {
            ExecMode::DryRun => &self.dry_reports,
            ExecMode::Live => &self.live_reports,
        };
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StepReport::ok(format!("done: {}", step.action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_runner_dry_run_has_no_effect_marker() {
        let step = Step::new("say hi", "echo");
        let report = EchoRunner.execute(&step, ExecMode::DryRun).await;
        assert!(report.success);
        assert!(report.output.starts_with("[dry-run]"));
    }

    #[tokio::test]
    async fn test_scripted_runner_replays_and_records() {
        let runner = ScriptedRunner::new();
        runner.push_report(StepReport::failed("rate_limited"));

        let step = Step::new("fetch", "http");
        let first = runner.execute(&step, ExecMode::Live).await;
        assert_eq!(first.error.as_deref(), Some("rate_limited"));

        let second = runner.execute(&step, ExecMode::Live).await;
        assert!(second.success);

        assert_eq!(runner.live_calls_for("http"), 2);
    }
}
