//! 遥测记录与学习转发
//!
//! 记录 token / 成本 / 延迟与错误指标，并无条件转发学习库更新。
//! 对当前目标没有任何控制流影响：落盘失败只告警，从不中断执行。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::core::Outcome;
use crate::governor::Escalation;
use crate::plan::{RootCause, Step};
use crate::telemetry::learning::LearningStore;
use crate::tools::StepReport;

/// 单条遥测事件（追加写）
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub id: String,
    pub at: i64,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cost: f64,
    pub tokens: u64,
    pub duration_ms: u64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl TelemetryEvent {
    fn new(event_type: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            at: chrono::Utc::now().timestamp(),
            event_type: event_type.to_string(),
            goal_id: None,
            step: None,
            tool: None,
            success: true,
            error: None,
            cost: 0.0,
            tokens: 0,
            duration_ms: 0,
            confidence: 1.0,
            detail: None,
        }
    }
}

/// 遥测落点：只需要追加写
pub trait TelemetrySink: Send + Sync {
    fn append(&self, event: &TelemetryEvent) -> anyhow::Result<()>;
}

/// 空落点：未启用遥测时使用
#[derive(Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn append(&self, _event: &TelemetryEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// JSONL 落点：每事件一行，追加写入 events.jsonl
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("events.jsonl"),
        }
    }
}

impl TelemetrySink for JsonlSink {
    fn append(&self, event: &TelemetryEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// 遥测与学习反馈入口
pub struct TelemetryFeed {
    sink: Arc<dyn TelemetrySink>,
    learning: Arc<LearningStore>,
}

impl TelemetryFeed {
    pub fn new(sink: Arc<dyn TelemetrySink>, learning: Arc<LearningStore>) -> Self {
        Self { sink, learning }
    }

    /// 纯内存（测试与演示用）
    pub fn in_memory() -> Self {
        Self::new(Arc::new(NullSink), Arc::new(LearningStore::in_memory()))
    }

    pub fn learning(&self) -> &Arc<LearningStore> {
        &self.learning
    }

    fn append(&self, event: TelemetryEvent) {
        if let Err(e) = self.sink.append(&event) {
            tracing::warn!(event_type = %event.event_type, "telemetry append failed: {e}");
        }
    }

    /// 记录单步执行并转发学习更新（无条件）
    pub fn log_step(&self, goal_id: &str, index: usize, step: &Step, report: &StepReport) {
        let mut event = TelemetryEvent::new("step_execution");
        event.goal_id = Some(goal_id.to_string());
        event.step = Some(format!("{}: {}", index, step.action));
        event.tool = Some(step.tool.clone());
        event.success = report.success;
        event.error = report.error.clone();
        event.cost = report.cost;
        event.tokens = report.tokens;
        event.duration_ms = report.duration_ms;
        event.confidence = step.confidence;
        self.append(event);

        self.update_learning(step, report);
    }

    /// 学习更新：情景轨迹 + 工具统计 + 范例库；失败时自动做一次根因记录
    fn update_learning(&self, step: &Step, report: &StepReport) {
        self.learning.record_trace(&step.action, &step.tool, report);
        self.learning.update_tool_stats(&step.tool, report);
        self.learning.update_example_bank(&step.action, &step.tool, report);

        if !report.success {
            let code = report.error.clone().unwrap_or_else(|| "unknown".to_string());
            self.learning.record_rca(RootCause {
                failure_kind: code.clone(),
                detail: format!("step '{}' via {} failed: {}", step.action, step.tool, code),
                failed_step: None,
                suggested_fixes: self
                    .learning
                    .low_success_tools(0.5)
                    .into_iter()
                    .map(|(tool, rate)| {
                        format!("consider alternative to {tool} (success rate {rate:.2})")
                    })
                    .collect(),
            });
        }
    }

    pub fn log_goal(&self, goal_id: &str, outcome: &Outcome) {
        let mut event = TelemetryEvent::new("goal_completion");
        event.goal_id = Some(goal_id.to_string());
        event.success = outcome.is_success();
        event.error = outcome.error.clone();
        self.append(event);
    }

    pub fn log_checkpoint(&self, event_name: &str, decision: &str) {
        let mut event = TelemetryEvent::new("checkpoint");
        event.step = Some(event_name.to_string());
        event.success = decision == "CONTINUE" || decision == "APPROVED";
        event.detail = Some(serde_json::json!({ "decision": decision }));
        self.append(event);
    }

    pub fn log_escalation(&self, escalation: &Escalation) {
        let mut event = TelemetryEvent::new("escalation");
        event.success = false;
        event.detail = serde_json::to_value(escalation).ok();
        self.append(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;

    #[test]
    fn test_failed_step_feeds_rca() {
        let feed = TelemetryFeed::in_memory();
        let step = Step::new("fetch page", "http");
        feed.log_step("g1", 1, &step, &StepReport::failed("network_error"));

        let records = feed.learning().rca_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].root_cause.failure_kind, "network_error");
    }

    #[test]
    fn test_successful_step_enters_example_bank() {
        let feed = TelemetryFeed::in_memory();
        let step = Step::new("say hello", "echo");
        feed.log_step("g1", 1, &step, &StepReport::ok("hello"));

        assert_eq!(feed.learning().example_count(), 1);
        assert!(feed.learning().rca_records().is_empty());
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path());
        sink.append(&TelemetryEvent::new("step_execution")).unwrap();
        sink.append(&TelemetryEvent::new("goal_completion")).unwrap();

        let data = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(data.lines().count(), 2);
    }
}
