//! 学习库：情景轨迹、工具成功率、已验证范例与根因分析记录
//!
//! 为规划方的后续决策提供读取入口（范例召回、工具统计）。
//! 写入全部尽力而为：JSON 落盘失败只告警，根因分析额外以 Markdown
//! 追加到 LEARNINGS.md 供人工回看。控制流永不受此模块影响。

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::plan::RootCause;
use crate::tools::StepReport;

/// 情景轨迹保留上限
const MAX_TRACES: usize = 100;
/// 失败轨迹保留上限
const MAX_FAILURE_TRACES: usize = 50;
/// 范例库保留上限
const MAX_EXAMPLES: usize = 200;
/// 根因分析记录保留上限
const MAX_RCA: usize = 50;

/// 一条情景轨迹
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicTrace {
    pub step: String,
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: i64,
}

/// 单工具的累计统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    pub total_uses: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_cost: f64,
    pub average_duration_ms: f64,
}

impl ToolStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_uses == 0 {
            return 1.0;
        }
        self.successes as f64 / self.total_uses as f64
    }
}

/// 已验证范例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkedExample {
    pub step: String,
    pub tool: String,
    pub output_preview: String,
    pub at: i64,
}

/// 根因分析记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaRecord {
    pub root_cause: RootCause,
    /// 库内相似失败的数量
    pub similar_failures: usize,
    pub at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LearningMemory {
    traces: Vec<EpisodicTrace>,
    failure_traces: Vec<EpisodicTrace>,
    tool_stats: HashMap<String, ToolStats>,
    examples: Vec<WorkedExample>,
    rca_records: Vec<RcaRecord>,
}

/// 学习库
pub struct LearningStore {
    dir: Option<PathBuf>,
    inner: Mutex<LearningMemory>,
}

fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

impl LearningStore {
    /// 纯内存学习库（测试用）
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            inner: Mutex::new(LearningMemory::default()),
        }
    }

    /// 持久化学习库：启动时加载 memory.json（不存在则从空开始）
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let memory = Self::load(&dir).unwrap_or_default();
        Self {
            dir: Some(dir),
            inner: Mutex::new(memory),
        }
    }

    fn memory_path(dir: &Path) -> PathBuf {
        dir.join("memory.json")
    }

    fn learnings_path(dir: &Path) -> PathBuf {
        dir.join("LEARNINGS.md")
    }

    fn load(dir: &Path) -> Option<LearningMemory> {
        let data = std::fs::read_to_string(Self::memory_path(dir)).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// 落盘（尽力而为，失败只告警）
    fn save(&self, memory: &LearningMemory) {
        let Some(dir) = &self.dir else { return };
        let result = std::fs::create_dir_all(dir).and_then(|_| {
            let data = serde_json::to_string_pretty(memory).unwrap_or_default();
            std::fs::write(Self::memory_path(dir), data)
        });
        if let Err(e) = result {
            tracing::warn!("failed to persist learning memory: {e}");
        }
    }

    /// 记录一条情景轨迹
    pub fn record_trace(&self, step: &str, tool: &str, report: &StepReport) {
        let trace = EpisodicTrace {
            step: step.to_string(),
            tool: tool.to_string(),
            success: report.success,
            error: report.error.clone(),
            at: chrono::Utc::now().timestamp(),
        };
        let mut memory = self.inner.lock().unwrap();
        if trace.success {
            memory.traces.push(trace);
            let n = memory.traces.len();
            if n > MAX_TRACES {
                memory.traces.drain(0..n - MAX_TRACES);
            }
        } else {
            memory.failure_traces.push(trace);
            let n = memory.failure_traces.len();
            if n > MAX_FAILURE_TRACES {
                memory.failure_traces.drain(0..n - MAX_FAILURE_TRACES);
            }
        }
        self.save(&memory);
    }

    /// 更新工具统计（移动平均）
    pub fn update_tool_stats(&self, tool: &str, report: &StepReport) {
        let mut memory = self.inner.lock().unwrap();
        let stats = memory.tool_stats.entry(tool.to_string()).or_default();
        stats.total_uses += 1;
        if report.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        let n = stats.total_uses as f64;
        stats.average_cost = (stats.average_cost * (n - 1.0) + report.cost) / n;
        stats.average_duration_ms =
            (stats.average_duration_ms * (n - 1.0) + report.duration_ms as f64) / n;
        self.save(&memory);
    }

    /// 成功步骤入范例库
    pub fn update_example_bank(&self, step: &str, tool: &str, report: &StepReport) {
        if !report.success {
            return;
        }
        let mut memory = self.inner.lock().unwrap();
        memory.examples.push(WorkedExample {
            step: step.to_string(),
            tool: tool.to_string(),
            output_preview: preview(&report.output, 200),
            at: chrono::Utc::now().timestamp(),
        });
        let n = memory.examples.len();
        if n > MAX_EXAMPLES {
            memory.examples.drain(0..n - MAX_EXAMPLES);
        }
        self.save(&memory);
    }

    /// 记录根因分析结论，返回含相似失败计数的记录；同时追加 Markdown
    pub fn record_rca(&self, root_cause: RootCause) -> RcaRecord {
        let mut memory = self.inner.lock().unwrap();
        let similar_failures = memory
            .failure_traces
            .iter()
            .filter(|t| {
                t.error
                    .as_deref()
                    .map(|e| e.contains(&root_cause.failure_kind))
                    .unwrap_or(false)
            })
            .count();
        let record = RcaRecord {
            root_cause,
            similar_failures,
            at: chrono::Utc::now().timestamp(),
        };
        memory.rca_records.push(record.clone());
        let n = memory.rca_records.len();
        if n > MAX_RCA {
            memory.rca_records.drain(0..n - MAX_RCA);
        }
        self.save(&memory);
        drop(memory);

        self.append_rca_markdown(&record);
        record
    }

    /// 按关键词重叠召回最相关的 k 条范例
    pub fn recall_examples(&self, query: &str, k: usize) -> Vec<WorkedExample> {
        let query_tokens = tokenize_lower(query);
        let memory = self.inner.lock().unwrap();
        let mut scored: Vec<(usize, &WorkedExample)> = memory
            .examples
            .iter()
            .map(|ex| {
                let tokens = tokenize_lower(&ex.step);
                (query_tokens.intersection(&tokens).count(), ex)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(k).map(|(_, ex)| ex.clone()).collect()
    }

    /// 工具成功率（从未使用过返回 None）
    pub fn tool_success_rate(&self, tool: &str) -> Option<f64> {
        let memory = self.inner.lock().unwrap();
        memory.tool_stats.get(tool).map(|s| s.success_rate())
    }

    /// 成功率低于阈值的工具（根因分析的修正建议来源）
    pub fn low_success_tools(&self, threshold: f64) -> Vec<(String, f64)> {
        let memory = self.inner.lock().unwrap();
        memory
            .tool_stats
            .iter()
            .map(|(tool, stats)| (tool.clone(), stats.success_rate()))
            .filter(|(_, rate)| *rate < threshold)
            .collect()
    }

    pub fn rca_records(&self) -> Vec<RcaRecord> {
        self.inner.lock().unwrap().rca_records.clone()
    }

    pub fn example_count(&self) -> usize {
        self.inner.lock().unwrap().examples.len()
    }

    /// 确保文件存在且带标题（首次创建时写入）
    fn ensure_header(path: &Path, title: &str) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(p) = path.parent() {
            std::fs::create_dir_all(p)?;
        }
        let header = format!("# {}\n\n*Root cause analyses appended below.*\n\n---\n\n", title);
        std::fs::write(path, header)
    }

    /// 根因分析 → LEARNINGS.md（尽力而为）
    fn append_rca_markdown(&self, record: &RcaRecord) {
        let Some(dir) = &self.dir else { return };
        let path = Self::learnings_path(dir);
        let _ = Self::ensure_header(&path, "Learnings");
        let fixes = if record.root_cause.suggested_fixes.is_empty() {
            "-".to_string()
        } else {
            record.root_cause.suggested_fixes.join("; ")
        };
        let block = format!(
            "\n## [{}] {}\n\n- **Detail**: {}\n- **Similar failures**: {}\n- **Suggested fixes**: {}\n\n",
            record.root_cause.failure_kind,
            chrono::Local::now().format("%Y-%m-%d %H:%M"),
            record.root_cause.detail.trim().replace('\n', " "),
            record.similar_failures,
            fixes,
        );
        let _ = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(block.as_bytes()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_report(output: &str) -> StepReport {
        StepReport::ok(output)
    }

    #[test]
    fn test_tool_stats_accumulate() {
        let store = LearningStore::in_memory();
        store.update_tool_stats("echo", &ok_report("a").with_cost(1.0, 10));
        store.update_tool_stats("echo", &StepReport::failed("timeout"));

        assert_eq!(store.tool_success_rate("echo"), Some(0.5));
        assert!(store.tool_success_rate("unknown").is_none());
        assert_eq!(store.low_success_tools(0.6), vec![("echo".to_string(), 0.5)]);
    }

    #[test]
    fn test_example_bank_only_keeps_successes() {
        let store = LearningStore::in_memory();
        store.update_example_bank("write report", "writer", &ok_report("wrote it"));
        store.update_example_bank("bad step", "writer", &StepReport::failed("boom"));

        assert_eq!(store.example_count(), 1);
        let recalled = store.recall_examples("report write", 3);
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].tool, "writer");
        assert!(store.recall_examples("unrelated query", 3).is_empty());
    }

    #[test]
    fn test_rca_counts_similar_failures() {
        let store = LearningStore::in_memory();
        store.record_trace("s1", "http", &StepReport::failed("network_error"));
        store.record_trace("s2", "http", &StepReport::failed("network_error: reset"));

        let record = store.record_rca(RootCause {
            failure_kind: "network_error".to_string(),
            detail: "connection reset".to_string(),
            failed_step: Some(2),
            suggested_fixes: vec![],
        });
        assert_eq!(record.similar_failures, 2);
        assert_eq!(store.rca_records().len(), 1);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LearningStore::open(dir.path());
            store.update_example_bank("persisted step", "echo", &ok_report("out"));
        }
        let reopened = LearningStore::open(dir.path());
        assert_eq!(reopened.example_count(), 1);
    }
}
