//! 审批通道
//!
//! 人工验证任务的发布与决策等待。submit 发布任务并登记 oneshot 发送端，
//! 外部审批方通过 resolve 推送决策；request 在超时内可取消地等待，
//! 决策推送到达立即唤醒，否则到期返回 Timeout。引擎从不假设人工同步响应：
//! Timeout 与 Rejected 的停止效果相同，但单独记录以便审计区分。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// 审批决策
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    /// 超时未决策，停止效果等同 Rejected，但单独记录
    Timeout,
}

/// 发布给外部审批方的人工任务
#[derive(Debug, Clone, Serialize)]
pub struct HumanTask {
    pub id: String,
    /// checkpoint / step_approval / followup
    pub kind: String,
    pub reason: String,
    pub context: serde_json::Value,
    pub created_at: i64,
}

/// 审批通道：任务流出（mpsc）+ 决策流入（按任务 ID 的 oneshot）
pub struct ApprovalChannel {
    task_tx: mpsc::UnboundedSender<HumanTask>,
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalChannel {
    /// 创建通道，返回 (通道, 人工任务接收端)
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HumanTask>) {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        (
            Self {
                task_tx,
                pending: Mutex::new(HashMap::new()),
            },
            task_rx,
        )
    }

    fn make_task(kind: &str, reason: &str, context: serde_json::Value) -> HumanTask {
        HumanTask {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            reason: reason.to_string(),
            context,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// 仅发布任务，不等待决策（advisory 检查点、人工跟进队列）
    pub fn notify(&self, kind: &str, reason: &str, context: serde_json::Value) -> String {
        let task = Self::make_task(kind, reason, context);
        let id = task.id.clone();
        // 接收端可能已关闭；发布是尽力而为
        let _ = self.task_tx.send(task);
        id
    }

    /// 外部审批方推送决策；任务不存在或等待方已放弃时返回 false
    pub fn resolve(&self, task_id: &str, decision: ApprovalDecision) -> bool {
        let sender = self.pending.lock().unwrap().remove(task_id);
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    /// 发布任务并在超时内等待决策；超时后清理登记并返回 Timeout
    pub async fn request(
        &self,
        kind: &str,
        reason: &str,
        context: serde_json::Value,
        timeout: Duration,
    ) -> ApprovalDecision {
        let task = Self::make_task(kind, reason, context);
        let id = task.id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);
        if self.task_tx.send(task).is_err() {
            // 无人接收任务，决策永远不会到达，直接按超时处理
            self.pending.lock().unwrap().remove(&id);
            tracing::warn!(task_id = %id, "approval task has no receiver, treating as timeout");
            return ApprovalDecision::Timeout;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => ApprovalDecision::Timeout,
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                tracing::info!(task_id = %id, kind, "approval wait timed out");
                ApprovalDecision::Timeout
            }
        }
    }
}
