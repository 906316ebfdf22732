//! 统一结果信封
//!
//! 每个工作单元（目标、计划、步骤）的返回都收敛到 Outcome：
//! status + 可选 data / error / meta。normalize 是唯一的规范化边界：
//! 裸状态字符串会被包装，无法识别的值一律归为 FAILURE + unknown_result_type。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工作单元的最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failure,
    /// 需要外部介入后重新发起（检查点拒绝、深度超限、信息不足等）
    StopAndWait,
    /// 需要人工澄清后才能继续（验证不通过、检索数据不可信等）
    NeedsClarification,
}

impl OutcomeStatus {
    /// 解析裸状态字符串（兼容旧值），无法识别时返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(OutcomeStatus::Success),
            "FAILURE" => Some(OutcomeStatus::Failure),
            "STOP_AND_WAIT" => Some(OutcomeStatus::StopAndWait),
            "NEEDS_CLARIFICATION" => Some(OutcomeStatus::NeedsClarification),
            _ => None,
        }
    }
}

/// 统一结果信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 证据、重试次数、成本、耗时等附加信息
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, Value>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            status: OutcomeStatus::Success,
            data: None,
            error: None,
            meta: serde_json::Map::new(),
        }
    }

    pub fn success_with(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::success()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            data: None,
            error: Some(error.into()),
            meta: serde_json::Map::new(),
        }
    }

    pub fn stop_and_wait(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::StopAndWait,
            data: None,
            error: Some(error.into()),
            meta: serde_json::Map::new(),
        }
    }

    pub fn needs_clarification(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::NeedsClarification,
            data: None,
            error: Some(error.into()),
            meta: serde_json::Map::new(),
        }
    }

    /// 追加一条 meta 信息（链式）
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// 需要人工介入的两种挂起状态
    pub fn is_halt(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::StopAndWait | OutcomeStatus::NeedsClarification
        )
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 规范化边界：任意 JSON 值 -> Outcome
///
/// - 合法信封原样返回
/// - 裸状态字符串（"SUCCESS" 等旧值）包装为仅含 status 的信封
/// - 其余一律 FAILURE + unknown_result_type，原始值放入 meta.raw
pub fn normalize(value: Value) -> Outcome {
    if let Value::String(ref s) = value {
        if let Some(status) = OutcomeStatus::parse(s) {
            return Outcome {
                status,
                data: None,
                error: None,
                meta: serde_json::Map::new(),
            };
        }
    }
    if value.is_object() {
        if let Ok(outcome) = serde_json::from_value::<Outcome>(value.clone()) {
            return outcome;
        }
    }
    Outcome::failure("unknown_result_type").with_meta("raw", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_status() {
        let o = normalize(Value::String("SUCCESS".to_string()));
        assert_eq!(o.status, OutcomeStatus::Success);
        assert!(o.error.is_none());

        let o = normalize(Value::String("STOP_AND_WAIT".to_string()));
        assert_eq!(o.status, OutcomeStatus::StopAndWait);
    }

    #[test]
    fn test_normalize_unknown_value() {
        let o = normalize(serde_json::json!(42));
        assert_eq!(o.status, OutcomeStatus::Failure);
        assert_eq!(o.error.as_deref(), Some("unknown_result_type"));
        assert_eq!(o.meta.get("raw"), Some(&serde_json::json!(42)));

        let o = normalize(Value::String("NOT_A_STATUS".to_string()));
        assert_eq!(o.error.as_deref(), Some("unknown_result_type"));
    }

    #[test]
    fn test_normalize_envelope_passthrough() {
        let original = Outcome::failure("permission_denied").with_meta("step", serde_json::json!(3));
        let o = normalize(original.to_value());
        assert_eq!(o, original);
    }

    #[test]
    fn test_normalize_idempotent() {
        let inputs = vec![
            serde_json::json!("SUCCESS"),
            serde_json::json!({"status": "FAILURE", "error": "boom"}),
            serde_json::json!(["not", "a", "result"]),
            Value::Null,
        ];
        for input in inputs {
            let once = normalize(input.clone());
            let twice = normalize(once.to_value());
            assert_eq!(once, twice, "normalize must be idempotent for {input}");
        }
    }
}
