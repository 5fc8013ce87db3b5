// ==========================================
// 质检 - 新信息量
// ==========================================
// 命中类别数 × 每类分值, 封顶 100
// 低于最低类别数只产生 warning, 永远不算硬失败
// ==========================================

use super::text::contains_any;
use super::{warning, DimensionScore};
use crate::domain::quality::{QualityDimension, QualityThresholds};

pub const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "plot_advancement",
        &["discovered", "decided", "revealed", "escaped", "arrived at", "the plan", "finally", "发现", "决定", "计划", "终于"],
    ),
    (
        "character_development",
        &["realized", "understood", "regret", "resolve", "for the first time", "明白", "醒悟", "后悔", "决心"],
    ),
    (
        "relationship_change",
        &["trust", "betray", "alliance", "allies", "sworn", "forgave", "信任", "背叛", "结盟", "原谅"],
    ),
    (
        "world_reveal",
        &["legend", "ancient", "history of", "the old records", "forbidden", "传说", "上古", "禁地", "古籍"],
    ),
    (
        "power_gain",
        &["technique", "mastered", "learned to", "gained", "new strength", "功法", "掌握", "学会", "领悟"],
    ),
];

/// 命中的类别名称
pub fn categories_present(lower: &str) -> Vec<&'static str> {
    CATEGORIES
        .iter()
        .filter(|(_, markers)| contains_any(lower, markers))
        .map(|(name, _)| *name)
        .collect()
}

pub fn score(lower: &str, th: &QualityThresholds) -> DimensionScore {
    let present = categories_present(lower);
    let mut result = DimensionScore {
        score: (present.len() as f64 * th.new_info_points_per_category).min(100.0),
        issues: Vec::new(),
    };

    if present.len() < th.min_new_info_categories {
        let missing: Vec<&str> = CATEGORIES
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !present.contains(name))
            .collect();
        result.issues.push(warning(
            QualityDimension::NewInformation,
            format!(
                "本章只推进了 {} 类新信息, 低于 {} 类",
                present.len(),
                th.min_new_info_categories
            ),
            format!("至少补充一类推进: {}", missing.join(", ")),
        ));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_scales_with_categories() {
        let th = QualityThresholds::default();
        let text = "she discovered the ancient gate and realized the truth.";
        let result = score(text, &th);
        assert_eq!(result.score, 75.0);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_too_few_categories_only_warns() {
        let th = QualityThresholds::default();
        let result = score("the wind blew.", &th);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.issues.len(), 1);
    }
}
