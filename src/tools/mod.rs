//! 工具契约与 Mock 实现
//!
//! 工具语义不在引擎内定义：引擎只依赖 ToolRunner 契约 —— 必须无副作用地
//! 执行干跑模式、失败时用固定瞬时错误码词表上报。

pub mod mock;
pub mod runner;

pub use mock::{EchoRunner, RunnerCall, ScriptedRunner};
pub use runner::{ExecMode, StepReport, ToolRunner};
