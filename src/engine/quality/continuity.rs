// ==========================================
// 质检 - 连贯性
// ==========================================
// 100 起扣:
// - 已死亡角色出场: 每人扣 dead_character_penalty
//   拉丁名按整词匹配 ("Lin" 不命中 "line"), 含 CJK 的名字按子串匹配
// - 全文无任何承接/回顾标记: 扣 missing_transition_penalty
// ==========================================

use super::text::contains_any;
use super::{warning, DimensionScore, QualityContext};
use crate::domain::chapter::is_cjk;
use crate::domain::quality::{QualityDimension, QualityThresholds};
use regex::Regex;

const TRANSITION_MARKERS: &[&str] = &[
    "meanwhile",
    "later",
    "earlier",
    "afterward",
    "the next morning",
    "the next day",
    "that night",
    "previously",
    "since the",
    "remembered",
    "recalled",
    "back at",
    "与此同时",
    "之后",
    "随后",
    "第二天",
    "片刻后",
    "此前",
    "回想",
];

/// 正文 (已小写) 中是否出现该名字
fn mentions(lower: &str, needle: &str) -> bool {
    if needle.chars().any(is_cjk) {
        return lower.contains(needle);
    }
    match Regex::new(&format!(r"\b{}\b", regex::escape(needle))) {
        Ok(re) => re.is_match(lower),
        Err(_) => lower.contains(needle),
    }
}

pub fn score(lower: &str, ctx: &QualityContext, th: &QualityThresholds) -> DimensionScore {
    let mut result = DimensionScore::perfect();

    for name in &ctx.dead_characters {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if mentions(lower, &needle) {
            result.score -= th.dead_character_penalty;
            result.issues.push(warning(
                QualityDimension::Continuity,
                format!("已死亡角色「{}」在正文中出场", name.trim()),
                format!("删除「{}」的出场, 或改写为回忆/他人提及", name.trim()),
            ));
        }
    }

    if !contains_any(lower, TRANSITION_MARKERS) {
        result.score -= th.missing_transition_penalty;
        result.issues.push(warning(
            QualityDimension::Continuity,
            "未发现任何承接或回顾前情的过渡".to_string(),
            "在开头补一句承接上一章的过渡或简短回顾".to_string(),
        ));
    }

    result.clamped()
}
