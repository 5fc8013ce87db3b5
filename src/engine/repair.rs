// ==========================================
// 连载生产流水线 - 自动修复循环
// ==========================================
// 规则:
// - 原文已通过: 直接返回, 0 次尝试
// - 每次尝试: 按严重度生成修改意见 -> 请求修订 -> 重新评分
// - 只有 overall 严格提高才替换当前最优, 永不倒退
// - 通过或达到目标分即成功结束
// - 从第 2 次尝试起, 提升不足 min_improvement 提前结束并转人工
// - 每次尝试都保留审计记录
// ==========================================

use crate::domain::quality::{IssueSeverity, QualityReport};
use crate::domain::types::QualityAction;
use crate::engine::generation::GenerationError;
use crate::engine::quality::{ChapterEvaluator, QualityContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 修订请求方 (生成引擎的修订入口)
#[async_trait]
pub trait ChapterReviser: Send + Sync {
    async fn revise(&self, content: &str, instructions: &[String]) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairSettings {
    pub max_attempts: u32,
    pub target_score: f64,
    pub min_improvement: f64,
}

/// 单次修订的审计记录
#[derive(Debug, Clone, PartialEq)]
pub struct RepairAttemptRecord {
    pub attempt_index: u32,
    pub score_before: f64,
    pub score_after: f64,
    pub action_after: QualityAction,
    pub accepted: bool,
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub content: String,
    pub report: QualityReport,
    pub success: bool,
    pub needs_human_review: bool,
    pub reason: Option<String>,
    pub attempts: Vec<RepairAttemptRecord>,
    /// 修订请求失败导致循环中止
    pub generation_error: Option<GenerationError>,
}

/// 按严重度排序的修改意见
///
/// 维度顺序: 连贯性 > 重复 > 战力 > 新信息 > 节奏 > 扩展维度
/// 同一维度内 error 在前
pub fn build_instructions(report: &QualityReport) -> Vec<String> {
    let mut issues: Vec<_> = report.issues.iter().collect();
    issues.sort_by(|a, b| {
        a.dimension.cmp(&b.dimension).then_with(|| {
            let rank = |s: IssueSeverity| if s == IssueSeverity::Error { 0 } else { 1 };
            rank(a.severity).cmp(&rank(b.severity))
        })
    });

    let mut instructions: Vec<String> = Vec::new();
    for issue in issues {
        let line = format!("[{}] {} ({})", issue.dimension, issue.suggestion, issue.message);
        if !instructions.contains(&line) {
            instructions.push(line);
        }
    }
    instructions
}

pub struct AutoRepairLoop {
    evaluator: Arc<dyn ChapterEvaluator>,
    settings: RepairSettings,
}

impl AutoRepairLoop {
    pub fn new(evaluator: Arc<dyn ChapterEvaluator>, settings: RepairSettings) -> Self {
        Self { evaluator, settings }
    }

    fn is_success(&self, report: &QualityReport) -> bool {
        report.passed() || report.overall >= self.settings.target_score
    }

    pub async fn run(
        &self,
        original: String,
        original_report: QualityReport,
        context: &QualityContext,
        reviser: &dyn ChapterReviser,
    ) -> RepairOutcome {
        if original_report.passed() {
            return RepairOutcome {
                content: original,
                report: original_report,
                success: true,
                needs_human_review: false,
                reason: None,
                attempts: Vec::new(),
                generation_error: None,
            };
        }

        let mut best_content = original;
        let mut best_report = original_report;
        let mut attempts: Vec<RepairAttemptRecord> = Vec::new();

        for attempt in 1..=self.settings.max_attempts {
            let instructions = build_instructions(&best_report);
            let revised = match reviser.revise(&best_content, &instructions).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(attempt, error = %e, "修订请求失败, 修复循环中止");
                    return RepairOutcome {
                        content: best_content,
                        report: best_report,
                        success: false,
                        needs_human_review: true,
                        reason: Some(format!("第 {} 次修订请求失败: {}", attempt, e)),
                        attempts,
                        generation_error: Some(e),
                    };
                }
            };

            let report = self.evaluator.evaluate(&revised, context);
            let previous_best = best_report.overall;
            let improvement = report.overall - previous_best;
            let accepted = report.overall > previous_best;

            debug!(
                attempt,
                score_before = previous_best,
                score_after = report.overall,
                action = %report.action,
                accepted,
                "修订已评分"
            );
            attempts.push(RepairAttemptRecord {
                attempt_index: attempt,
                score_before: previous_best,
                score_after: report.overall,
                action_after: report.action,
                accepted,
                instructions,
            });

            if accepted {
                best_content = revised;
                best_report = report;
            }

            if self.is_success(&best_report) {
                info!(attempt, score = best_report.overall, "修复成功");
                return RepairOutcome {
                    content: best_content,
                    report: best_report,
                    success: true,
                    needs_human_review: false,
                    reason: None,
                    attempts,
                    generation_error: None,
                };
            }

            // 第 1 次尝试不做提升幅度检查
            if attempt >= 2 && improvement < self.settings.min_improvement {
                info!(attempt, improvement, "修复提升不足, 提前转人工");
                return RepairOutcome {
                    content: best_content,
                    report: best_report,
                    success: false,
                    needs_human_review: true,
                    reason: Some(format!(
                        "第 {} 次修订仅提升 {:.2} 分, 低于最小提升 {:.2}",
                        attempt, improvement, self.settings.min_improvement
                    )),
                    attempts,
                    generation_error: None,
                };
            }
        }

        let reason = format!(
            "{} 次修订后仍未通过, 最高分 {:.2}",
            self.settings.max_attempts, best_report.overall
        );
        RepairOutcome {
            content: best_content,
            report: best_report,
            success: false,
            needs_human_review: true,
            reason: Some(reason),
            attempts,
            generation_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quality::{QualityDimension, QualityIssue};
    use std::sync::Mutex;

    fn report(overall: f64, action: QualityAction) -> QualityReport {
        QualityReport {
            continuity: 50.0,
            repetition: 0.0,
            power_sanity: 100.0,
            new_information: 50.0,
            pacing: 80.0,
            extended: None,
            overall,
            action,
            hard_failures: vec![],
            issues: vec![
                QualityIssue {
                    dimension: QualityDimension::Pacing,
                    severity: IssueSeverity::Warning,
                    message: "pacing".into(),
                    suggestion: "fix pacing".into(),
                },
                QualityIssue {
                    dimension: QualityDimension::Continuity,
                    severity: IssueSeverity::Error,
                    message: "continuity".into(),
                    suggestion: "fix continuity".into(),
                },
            ],
            word_count: 2500,
            detected_power_level: None,
        }
    }

    /// 修订文本形如 "score:52", 评分器直接读出分数
    struct ScriptedEvaluator;

    impl ChapterEvaluator for ScriptedEvaluator {
        fn evaluate(&self, content: &str, _context: &QualityContext) -> QualityReport {
            let score: f64 = content
                .strip_prefix("score:")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            let action = if score >= 70.0 {
                QualityAction::Pass
            } else if score >= 50.0 {
                QualityAction::HumanReview
            } else {
                QualityAction::AutoRewrite
            };
            report(score, action)
        }
    }

    struct ScriptedReviser {
        scores: Mutex<Vec<f64>>,
    }

    impl ScriptedReviser {
        fn new(scores: &[f64]) -> Self {
            let mut scores = scores.to_vec();
            scores.reverse();
            Self {
                scores: Mutex::new(scores),
            }
        }
    }

    #[async_trait]
    impl ChapterReviser for ScriptedReviser {
        async fn revise(&self, _content: &str, _instructions: &[String]) -> Result<String, GenerationError> {
            let next = self.scores.lock().unwrap().pop();
            match next {
                Some(score) => Ok(format!("score:{}", score)),
                None => Err(GenerationError::Retryable("no more".into())),
            }
        }
    }

    fn repair_loop(max_attempts: u32) -> AutoRepairLoop {
        AutoRepairLoop::new(
            Arc::new(ScriptedEvaluator),
            RepairSettings {
                max_attempts,
                target_score: 75.0,
                min_improvement: 5.0,
            },
        )
    }

    #[tokio::test]
    async fn test_passing_original_returns_without_attempts() {
        let reviser = ScriptedReviser::new(&[]);
        let outcome = repair_loop(3)
            .run("score:80".into(), report(80.0, QualityAction::Pass), &QualityContext::default(), &reviser)
            .await;
        assert!(outcome.success);
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_plateau_stops_after_second_attempt() {
        let reviser = ScriptedReviser::new(&[52.0, 53.0, 90.0]);
        let outcome = repair_loop(3)
            .run("score:45".into(), report(45.0, QualityAction::AutoRewrite), &QualityContext::default(), &reviser)
            .await;
        assert!(!outcome.success);
        assert!(outcome.needs_human_review);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.report.overall, 53.0);
        assert!(outcome.reason.is_some());
    }

    #[tokio::test]
    async fn test_first_attempt_is_never_cut_short() {
        let reviser = ScriptedReviser::new(&[46.0, 60.0, 72.0]);
        let outcome = repair_loop(3)
            .run("score:45".into(), report(45.0, QualityAction::AutoRewrite), &QualityContext::default(), &reviser)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.report.action, QualityAction::Pass);
    }

    #[tokio::test]
    async fn test_regression_is_never_accepted() {
        let reviser = ScriptedReviser::new(&[55.0, 40.0]);
        let outcome = repair_loop(2)
            .run("score:45".into(), report(45.0, QualityAction::AutoRewrite), &QualityContext::default(), &reviser)
            .await;
        assert_eq!(outcome.report.overall, 55.0);
        assert!(!outcome.attempts[1].accepted);
        let mut best = 45.0;
        for attempt in &outcome.attempts {
            assert!(attempt.score_before >= best);
            if attempt.accepted {
                best = attempt.score_after;
            }
        }
    }

    #[tokio::test]
    async fn test_exhausted_attempts_return_best() {
        let reviser = ScriptedReviser::new(&[51.0, 58.0, 64.0]);
        let outcome = repair_loop(3)
            .run("score:45".into(), report(45.0, QualityAction::AutoRewrite), &QualityContext::default(), &reviser)
            .await;
        assert!(!outcome.success);
        assert!(outcome.needs_human_review);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.content, "score:64");
    }

    #[tokio::test]
    async fn test_revision_error_aborts_with_audit_trail() {
        let reviser = ScriptedReviser::new(&[50.0]);
        let outcome = repair_loop(3)
            .run("score:45".into(), report(45.0, QualityAction::AutoRewrite), &QualityContext::default(), &reviser)
            .await;
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.generation_error.is_some());
        assert!(outcome.needs_human_review);
    }

    #[test]
    fn test_instructions_follow_severity_order() {
        let instructions = build_instructions(&report(45.0, QualityAction::AutoRewrite));
        assert!(instructions[0].starts_with("[continuity]"));
        assert!(instructions[1].starts_with("[pacing]"));
    }
}
