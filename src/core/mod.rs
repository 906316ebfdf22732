//! 核心类型：错误分类、恢复动作、统一结果信封

pub mod error;
pub mod outcome;
pub mod recovery;

pub use error::{classify_error_code, is_transient_code, EngineError, FailureKind, TRANSIENT_ERROR_CODES};
pub use outcome::{normalize, Outcome, OutcomeStatus};
pub use recovery::{RecoveryAction, RecoveryEngine};
