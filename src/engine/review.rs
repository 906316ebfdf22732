//! 验收评审与根因分析
//!
//! 在执行结果上运行验收测试与判据校验。判据是确定性的（无 LLM 依赖），
//! 第一条不满足的判据即判失败。失败后做根因分析：归类失败、统计库内
//! 相似失败、并根据工具成功率给出修正建议，结论喂回规划方做计划调整。

use std::sync::Arc;

use regex::Regex;

use crate::core::Outcome;
use crate::executor::ExecutionRecord;
use crate::goal::{CriterionCheck, Goal};
use crate::plan::RootCause;
use crate::telemetry::LearningStore;

/// 评审结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Passed,
    /// 未通过及其原因
    Failed(String),
}

/// 工具成功率低于该值时进入修正建议
const LOW_SUCCESS_THRESHOLD: f64 = 0.5;

/// 评审器
pub struct Reviewer {
    learning: Arc<LearningStore>,
}

impl Reviewer {
    pub fn new(learning: Arc<LearningStore>) -> Self {
        Self { learning }
    }

    fn criterion_met(check: &CriterionCheck, record: &ExecutionRecord) -> bool {
        match check {
            CriterionCheck::AllStepsSucceeded => {
                record.failed_step.is_none() && record.steps_executed == record.steps_total
            }
            CriterionCheck::OutputContains(needle) => {
                record.outputs.iter().any(|o| o.contains(needle))
            }
            CriterionCheck::OutputMatches(pattern) => match Regex::new(pattern) {
                Ok(re) => record.outputs.iter().any(|o| re.is_match(o)),
                // 非法正则视为判据不满足，而不是 panic
                Err(_) => false,
            },
            CriterionCheck::MinStepsExecuted(n) => record.steps_executed >= *n,
        }
    }

    /// 对执行结果运行验收判据
    pub fn evaluate(&self, goal: &Goal, record: &ExecutionRecord, outcome: &Outcome) -> ReviewVerdict {
        if !outcome.is_success() {
            return ReviewVerdict::Failed(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution_failed".to_string()),
            );
        }
        for criterion in &goal.acceptance_criteria {
            let Some(check) = &criterion.check else {
                // 纯描述性判据默认通过
                continue;
            };
            if !Self::criterion_met(check, record) {
                return ReviewVerdict::Failed(format!("criterion not met: {}", criterion.description));
            }
        }
        ReviewVerdict::Passed
    }

    /// 根因分析：失败归类 + 工具成功率修正建议，结论写入学习库
    pub fn analyze(
        &self,
        outcome: &Outcome,
        record: &ExecutionRecord,
        reason: &str,
    ) -> RootCause {
        let failure_kind = outcome
            .error
            .clone()
            .unwrap_or_else(|| "validation_failed".to_string());
        let suggested_fixes: Vec<String> = self
            .learning
            .low_success_tools(LOW_SUCCESS_THRESHOLD)
            .into_iter()
            .map(|(tool, rate)| format!("consider alternative to {tool} (success rate {rate:.2})"))
            .collect();
        let root_cause = RootCause {
            failure_kind,
            detail: reason.to_string(),
            failed_step: record.failed_step,
            suggested_fixes,
        };
        self.learning.record_rca(root_cause.clone());
        root_cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::AcceptanceCriterion;

    fn reviewer() -> Reviewer {
        Reviewer::new(Arc::new(LearningStore::in_memory()))
    }

    fn clean_record(outputs: Vec<&str>) -> ExecutionRecord {
        ExecutionRecord {
            steps_total: outputs.len(),
            steps_executed: outputs.len(),
            outputs: outputs.into_iter().map(String::from).collect(),
            failed_step: None,
        }
    }

    #[test]
    fn test_descriptive_criteria_pass_by_default() {
        let goal = Goal::new("g").with_criteria(vec![AcceptanceCriterion::describe("looks right")]);
        let verdict = reviewer().evaluate(&goal, &clean_record(vec!["out"]), &Outcome::success());
        assert_eq!(verdict, ReviewVerdict::Passed);
    }

    #[test]
    fn test_output_contains_criterion() {
        let goal = Goal::new("g").with_criteria(vec![AcceptanceCriterion::checked(
            "mentions the answer",
            CriterionCheck::OutputContains("42".to_string()),
        )]);
        let r = reviewer();
        assert_eq!(
            r.evaluate(&goal, &clean_record(vec!["answer is 42"]), &Outcome::success()),
            ReviewVerdict::Passed
        );
        match r.evaluate(&goal, &clean_record(vec!["no answer"]), &Outcome::success()) {
            ReviewVerdict::Failed(reason) => assert!(reason.contains("mentions the answer")),
            ReviewVerdict::Passed => panic!("expected failure"),
        }
    }

    #[test]
    fn test_output_matches_handles_bad_regex() {
        let goal = Goal::new("g").with_criteria(vec![AcceptanceCriterion::checked(
            "matches pattern",
            CriterionCheck::OutputMatches("[unclosed".to_string()),
        )]);
        match reviewer().evaluate(&goal, &clean_record(vec!["anything"]), &Outcome::success()) {
            ReviewVerdict::Failed(_) => {}
            ReviewVerdict::Passed => panic!("invalid regex must not pass"),
        }
    }

    #[test]
    fn test_failed_execution_fails_review() {
        let goal = Goal::new("g");
        let verdict = reviewer().evaluate(
            &goal,
            &ExecutionRecord::default(),
            &Outcome::failure("permission_denied"),
        );
        assert_eq!(verdict, ReviewVerdict::Failed("permission_denied".to_string()));
    }

    #[test]
    fn test_analysis_records_rca() {
        let r = reviewer();
        let record = ExecutionRecord {
            failed_step: Some(2),
            ..ExecutionRecord::default()
        };
        let cause = r.analyze(&Outcome::failure("disk_full"), &record, "write failed");
        assert_eq!(cause.failure_kind, "disk_full");
        assert_eq!(cause.failed_step, Some(2));
        assert_eq!(r.learning.rca_records().len(), 1);
    }
}
