//! 资源边界与用量计数
//!
//! ResourceBounds 构造后不可变；ResourceUsage 是单调递增计数器，
//! 只允许顶层循环与计划执行器在每个工作单元完成后写入，
//! 检查点与条件谓词只能拿到只读快照。

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::EngineSection;
use crate::governor::checkpoint::Checkpoint;

/// 资源边界（构造后只读）
#[derive(Debug)]
pub struct ResourceBounds {
    pub max_iterations: Option<u64>,
    pub max_depth: Option<u32>,
    pub cost_limit: Option<f64>,
    pub time_limit: Option<Duration>,
    pub token_limit: Option<u64>,
    /// 超过此时长无任何目标状态变化则升级 no_progress
    pub no_progress_timeout: Duration,
    pub retry_limit: u32,
    pub retry_backoff: Duration,
    /// 审批默认等待时长（检查点可单独覆盖）
    pub approval_timeout: Duration,
    pub enable_dry_runs: bool,
    /// 每 n 步输出一次进度摘要
    pub summary_every_n: Option<usize>,
    /// 允许使用的工具权限标签
    pub tool_permissions: Vec<String>,
    /// 计划步数超过该值即判定过难，转入分解
    pub decompose_above_steps: usize,
    /// 单步预估成本超过该值触发人工审批
    pub cost_escalation_threshold: f64,
    /// 单步置信度低于该值触发人工审批
    pub min_confidence: f64,
    /// 注册的检查点（唯一的人工介入注入方式）
    pub checkpoints: Vec<Checkpoint>,
}

impl Default for ResourceBounds {
    fn default() -> Self {
        Self {
            max_iterations: Some(100),
            max_depth: Some(5),
            cost_limit: None,
            time_limit: None,
            token_limit: None,
            no_progress_timeout: Duration::from_secs(1800),
            retry_limit: 3,
            retry_backoff: Duration::from_secs(1),
            approval_timeout: Duration::from_secs(300),
            enable_dry_runs: true,
            summary_every_n: None,
            tool_permissions: Vec::new(),
            decompose_above_steps: 10,
            cost_escalation_threshold: 10.0,
            min_confidence: 0.3,
            checkpoints: Vec::new(),
        }
    }
}

impl ResourceBounds {
    /// 从 [engine] 配置段构造
    pub fn from_config(cfg: &EngineSection) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            max_depth: cfg.max_depth,
            cost_limit: cfg.cost_limit,
            time_limit: cfg.time_limit_secs.map(Duration::from_secs),
            token_limit: cfg.token_limit,
            no_progress_timeout: Duration::from_secs(cfg.no_progress_timeout_secs),
            retry_limit: cfg.retry_limit,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            approval_timeout: Duration::from_secs(cfg.approval_timeout_secs),
            enable_dry_runs: cfg.enable_dry_runs,
            summary_every_n: cfg.summary_every_n,
            tool_permissions: cfg.tool_permissions.clone(),
            decompose_above_steps: cfg.decompose_above_steps,
            cost_escalation_threshold: cfg.cost_escalation_threshold,
            min_confidence: cfg.min_confidence,
            checkpoints: Vec::new(),
        }
    }

    /// 注册检查点（仅初始化阶段使用）
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoints.push(checkpoint);
        self
    }

    pub fn with_tool_permissions(mut self, permissions: Vec<String>) -> Self {
        self.tool_permissions = permissions;
        self
    }
}

/// 用量计数器（内部持有起始时刻）
#[derive(Debug)]
pub struct ResourceUsage {
    pub iterations: u64,
    pub cost: f64,
    pub tokens: u64,
    started_at: Instant,
    last_progress: Instant,
}

impl Default for ResourceUsage {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            iterations: 0,
            cost: 0.0,
            tokens: 0,
            started_at: now,
            last_progress: now,
        }
    }
}

impl ResourceUsage {
    pub fn record_work(&mut self, cost: f64, tokens: u64) {
        self.cost += cost;
        self.tokens += tokens;
    }

    pub fn tick_iteration(&mut self) {
        self.iterations += 1;
    }

    pub fn mark_progress(&mut self) {
        self.last_progress = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn since_progress(&self) -> Duration {
        self.last_progress.elapsed()
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            iterations: self.iterations,
            cost: self.cost,
            tokens: self.tokens,
            elapsed_secs: self.elapsed().as_secs_f64(),
            since_progress_secs: self.since_progress().as_secs_f64(),
        }
    }
}

/// 用量只读快照（暴露给检查点条件、升级记录与最终报告）
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageSnapshot {
    pub iterations: u64,
    pub cost: f64,
    pub tokens: u64,
    pub elapsed_secs: f64,
    pub since_progress_secs: f64,
}
