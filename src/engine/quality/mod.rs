// ==========================================
// 连载生产流水线 - 质量闸门
// ==========================================
// 纯函数: 相同正文 + 相同上下文 (含最近章节窗口) 必然得到相同报告
// 每个维度独立打分, 再按固定权重合成 overall
// ==========================================

pub mod continuity;
pub mod extended;
pub mod new_info;
pub mod pacing;
pub mod power;
pub mod repetition;
pub mod text;

use crate::domain::chapter::count_words;
use crate::domain::production::ProductionContext;
use crate::domain::quality::{
    ExtendedScores, IssueSeverity, QualityDimension, QualityIssue, QualityReport,
    QualityThresholds,
};
use crate::domain::types::QualityAction;

// ==========================================
// 权重
// ==========================================
// 重复度/套话为"越高越差", 合成时取 100 - score
pub const BASE_WEIGHTS: [f64; 5] = [0.30, 0.20, 0.20, 0.15, 0.15];
pub const EXTENDED_WEIGHTS: [f64; 8] = [0.25, 0.15, 0.15, 0.10, 0.10, 0.10, 0.075, 0.075];

/// 单个维度的打分结果
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionScore {
    pub score: f64,
    pub issues: Vec<QualityIssue>,
}

impl DimensionScore {
    pub fn perfect() -> Self {
        Self {
            score: 100.0,
            issues: Vec::new(),
        }
    }

    pub fn clamped(mut self) -> Self {
        self.score = self.score.clamp(0.0, 100.0);
        self
    }
}

pub(crate) fn warning(dimension: QualityDimension, message: String, suggestion: String) -> QualityIssue {
    QualityIssue {
        dimension,
        severity: IssueSeverity::Warning,
        message,
        suggestion,
    }
}

// ==========================================
// QualityContext - 评分所需上下文
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityContext {
    pub dead_characters: Vec<String>,
    pub previous_power_level: Option<i32>,
    pub arc_max_power_delta: Option<i32>,
    pub realm_ladder: Vec<String>,
    /// 最近 N 章正文, 章节号升序
    pub recent_chapters: Vec<String>,
}

impl QualityContext {
    pub fn from_production(context: &ProductionContext, recent_chapters: Vec<String>) -> Self {
        Self {
            dead_characters: context.dead_characters.clone(),
            previous_power_level: context.power_level,
            arc_max_power_delta: context.arc_max_power_delta,
            realm_ladder: context.realm_ladder.clone(),
            recent_chapters,
        }
    }
}

/// 评分接口 (修复循环依赖它而不是具体实现)
pub trait ChapterEvaluator: Send + Sync {
    fn evaluate(&self, content: &str, context: &QualityContext) -> QualityReport;
}

/// 结论判定
///
/// - 无有效文字: fail
/// - overall < auto_rewrite_below 或 硬失败 >= 2: auto_rewrite
/// - overall < pass_at 或 硬失败 == 1: human_review
/// - 其他: pass
pub fn classify_action(
    overall: f64,
    hard_failure_count: usize,
    word_count: i32,
    th: &QualityThresholds,
) -> QualityAction {
    if word_count <= 0 {
        QualityAction::Fail
    } else if overall < th.auto_rewrite_below || hard_failure_count >= 2 {
        QualityAction::AutoRewrite
    } else if overall < th.pass_at || hard_failure_count == 1 {
        QualityAction::HumanReview
    } else {
        QualityAction::Pass
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ==========================================
// QualityGate
// ==========================================
#[derive(Debug, Clone)]
pub struct QualityGate {
    thresholds: QualityThresholds,
    extended: bool,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds, extended: bool) -> Self {
        Self {
            thresholds,
            extended,
        }
    }

    pub fn evaluate(&self, content: &str, context: &QualityContext) -> QualityReport {
        let th = &self.thresholds;
        let lower = text::lowercase(content);
        let word_count = count_words(content);

        let continuity = continuity::score(&lower, context, th);
        let repetition = repetition::score(content, context, th);
        let (power, detected_power_level) = power::score(&lower, context, th);
        let new_info = new_info::score(&lower, th);
        let pacing = pacing::score(content, word_count, th);

        // 硬失败线 (新信息量永不计入)
        let mut hard_failures = Vec::new();
        if continuity.score < th.min_continuity {
            hard_failures.push(QualityDimension::Continuity);
        }
        if repetition.score > th.max_repetition {
            hard_failures.push(QualityDimension::Repetition);
        }
        if power.score < th.min_power_sanity {
            hard_failures.push(QualityDimension::PowerSanity);
        }
        if pacing.score < th.min_pacing {
            hard_failures.push(QualityDimension::Pacing);
        }

        let mut issues: Vec<QualityIssue> = Vec::new();
        for dim in [&continuity, &repetition, &power, &new_info, &pacing] {
            issues.extend(dim.issues.iter().cloned());
        }

        let (overall, extended) = if self.extended {
            let dialogue = extended::dialogue_quality(content);
            let cliche = extended::cliche(&lower);
            let exposition = extended::exposition(content, &lower);

            if dialogue.score < th.min_dialogue_quality {
                hard_failures.push(QualityDimension::DialogueQuality);
            }
            if cliche.score > th.max_cliche {
                hard_failures.push(QualityDimension::Cliche);
            }
            if exposition.score < th.min_exposition {
                hard_failures.push(QualityDimension::Exposition);
            }
            for dim in [&dialogue, &cliche, &exposition] {
                issues.extend(dim.issues.iter().cloned());
            }

            let w = EXTENDED_WEIGHTS;
            let overall = w[0] * continuity.score
                + w[1] * (100.0 - repetition.score)
                + w[2] * power.score
                + w[3] * new_info.score
                + w[4] * pacing.score
                + w[5] * dialogue.score
                + w[6] * (100.0 - cliche.score)
                + w[7] * exposition.score;
            (
                overall,
                Some(ExtendedScores {
                    dialogue_quality: dialogue.score,
                    cliche: cliche.score,
                    exposition: exposition.score,
                }),
            )
        } else {
            let w = BASE_WEIGHTS;
            let overall = w[0] * continuity.score
                + w[1] * (100.0 - repetition.score)
                + w[2] * power.score
                + w[3] * new_info.score
                + w[4] * pacing.score;
            (overall, None)
        };

        // 硬失败维度的问题升级为 error; 没有具体问题的硬失败补一条
        for dim in &hard_failures {
            let mut found = false;
            for issue in issues.iter_mut().filter(|i| i.dimension == *dim) {
                issue.severity = IssueSeverity::Error;
                found = true;
            }
            if !found {
                issues.push(QualityIssue {
                    dimension: *dim,
                    severity: IssueSeverity::Error,
                    message: format!("{} 未达到硬性下限", dim),
                    suggestion: format!("重点修订 {} 相关内容", dim),
                });
            }
        }

        if word_count == 0 {
            issues.push(QualityIssue {
                dimension: QualityDimension::Pacing,
                severity: IssueSeverity::Error,
                message: "正文为空".to_string(),
                suggestion: "重新生成完整章节".to_string(),
            });
        }

        let overall = round2(overall.clamp(0.0, 100.0));
        let action = classify_action(overall, hard_failures.len(), word_count, th);

        QualityReport {
            continuity: continuity.score,
            repetition: repetition.score,
            power_sanity: power.score,
            new_information: new_info.score,
            pacing: pacing.score,
            extended,
            overall,
            action,
            hard_failures,
            issues,
            word_count,
            detected_power_level,
        }
    }
}

impl ChapterEvaluator for QualityGate {
    fn evaluate(&self, content: &str, context: &QualityContext) -> QualityReport {
        QualityGate::evaluate(self, content, context)
    }
}
