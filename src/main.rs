//! 演示入口：用 Mock 协作方跑一次完整求解循环
//!
//! 目标从环境变量 HIVE_OBJECTIVES 读取（逗号分隔），结束后输出最终报告 JSON。

use std::sync::Arc;

use tokio::sync::mpsc;

use hive::config::{load_config, AppConfig};
use hive::engine::Engine;
use hive::goal::GoalTree;
use hive::governor::{Checkpoint, CheckpointEvent, CheckpointMode, ResourceBounds};
use hive::plan::MockPlanner;
use hive::telemetry::{JsonlSink, LearningStore, TelemetryFeed};
use hive::tools::EchoRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let objectives_raw = std::env::var("HIVE_OBJECTIVES")
        .unwrap_or_else(|_| "Implement example feature end-to-end".to_string());
    let objectives: Vec<String> = objectives_raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let workspace = cfg
        .app
        .workspace_root
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap().join("workspace"));

    let telemetry = if cfg.telemetry.enabled {
        Arc::new(TelemetryFeed::new(
            Arc::new(JsonlSink::new(workspace.join(&cfg.telemetry.telemetry_dir))),
            Arc::new(LearningStore::open(workspace.join(&cfg.telemetry.learning_dir))),
        ))
    } else {
        Arc::new(TelemetryFeed::in_memory())
    };

    let bounds = ResourceBounds::from_config(&cfg.engine).with_checkpoint(Checkpoint::new(
        CheckpointEvent::GoalSelected,
        CheckpointMode::Advisory,
    ));

    let (engine, mut task_rx) = Engine::new(Arc::new(MockPlanner), Arc::new(EchoRunner), bounds);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let engine = engine
        .with_telemetry(telemetry)
        .with_retrieval_config(cfg.retrieval.clone())
        .with_event_tx(event_tx);

    // 演示无人值守：人工任务与过程事件只落日志
    tokio::spawn(async move {
        while let Some(task) = task_rx.recv().await {
            tracing::info!(kind = %task.kind, reason = %task.reason, "human task queued");
        }
    });
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            tracing::debug!(event = ?ev, "engine");
        }
    });

    let mut tree = GoalTree::construct(&objectives, Vec::new())?;
    tracing::info!(goals = tree.len(), "starting solving loop");
    let report = engine.run(&mut tree).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
