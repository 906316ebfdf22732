//! 研究/检索提供方契约
//!
//! 引擎在执行准备阶段向提供方索取支撑数据，并在使用前校验来源可信度
//! 与新鲜度。不可信或过期的数据不会被静默使用：该门是正确性门，
//! 直接产生 NEEDS_CLARIFICATION。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::EngineError;
use crate::goal::Goal;
use crate::plan::Plan;

/// 检索到的研究数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchData {
    pub content: String,
    /// 数据来源（空来源视为不可信）
    pub source: String,
    pub trusted: bool,
    /// 抓取时间（Unix 秒）
    pub fetched_at: i64,
}

impl ResearchData {
    pub fn trusted_now(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            trusted: true,
            fetched_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// 来源是否可信
pub fn has_trusted_provenance(data: &ResearchData) -> bool {
    data.trusted && !data.source.is_empty()
}

/// 是否已过期
pub fn is_stale(data: &ResearchData, max_age: Duration) -> bool {
    let age = chrono::Utc::now().timestamp() - data.fetched_at;
    age < 0 || age as u64 > max_age.as_secs()
}

/// 检索提供方契约
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn retrieve(&self, goal: &Goal, plan: &Plan) -> Result<ResearchData, EngineError>;
}

/// 静态提供方：总是返回同一份数据（测试与演示用）
pub struct StaticResearch {
    data: ResearchData,
}

impl StaticResearch {
    pub fn new(data: ResearchData) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ResearchProvider for StaticResearch {
    async fn retrieve(&self, _goal: &Goal, _plan: &Plan) -> Result<ResearchData, EngineError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provenance_requires_trusted_and_source() {
        let mut data = ResearchData::trusted_now("content", "docs.rs");
        assert!(has_trusted_provenance(&data));

        data.trusted = false;
        assert!(!has_trusted_provenance(&data));

        let anonymous = ResearchData {
            content: "c".to_string(),
            source: String::new(),
            trusted: true,
            fetched_at: chrono::Utc::now().timestamp(),
        };
        assert!(!has_trusted_provenance(&anonymous));
    }

    #[test]
    fn test_staleness_window() {
        let fresh = ResearchData::trusted_now("c", "s");
        assert!(!is_stale(&fresh, Duration::from_secs(60)));

        let old = ResearchData {
            fetched_at: chrono::Utc::now().timestamp() - 3600,
            ..fresh.clone()
        };
        assert!(is_stale(&old, Duration::from_secs(60)));
        // 未来时间戳同样视为不可用
        let future = ResearchData {
            fetched_at: chrono::Utc::now().timestamp() + 3600,
            ..fresh
        };
        assert!(is_stale(&future, Duration::from_secs(60)));
    }
}
