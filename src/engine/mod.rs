//! 目标执行引擎：顶层求解循环、递归目标执行、评审与过程事件

pub mod events;
pub mod goal_loop;
pub mod loop_;
pub mod review;

pub use events::{send_event, EngineEvent};
pub use goal_loop::GoalRunner;
pub use loop_::{Engine, RunReport};
pub use review::{ReviewVerdict, Reviewer};
