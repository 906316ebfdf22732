//! 遥测与学习反馈：步骤/目标指标记录、根因分析沉淀与范例召回

pub mod feed;
pub mod learning;

pub use feed::{JsonlSink, NullSink, TelemetryEvent, TelemetryFeed, TelemetrySink};
pub use learning::{EpisodicTrace, LearningStore, RcaRecord, ToolStats, WorkedExample};
