// ==========================================
// 质检 - 战力成长合理性
// ==========================================
// 100 起扣:
// - 等级/境界跨度超过本篇章上限
// - 有跨越但全文没有任何铺垫
// - 出现"轻松获得力量"的描写
// ==========================================

use super::text::{contains_any, sentences};
use super::{warning, DimensionScore, QualityContext};
use crate::domain::quality::{QualityDimension, QualityThresholds};
use regex::Regex;
use std::sync::OnceLock;

const ADVANCE_MARKERS: &[&str] = &[
    "reached",
    "advanced to",
    "ascended",
    "stepped into",
    "rose to",
    "attained",
    "broke through",
    "晋升",
    "踏入",
    "达到",
    "突破",
];

const BUILDUP_MARKERS: &[&str] = &[
    "trained",
    "training",
    "cultivated",
    "meditat",
    "practiced",
    "struggled",
    "endured",
    "sacrific",
    "exhaust",
    "bled",
    "months of",
    "days of",
    "苦修",
    "闭关",
    "修炼",
    "历经",
    "代价",
];

fn level_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\b(?:level|tier|stage|layer|rank)\s+(\d{1,3})\b",
            r"第\s*(\d{1,3})\s*(?:层|重|级|阶)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn effortless_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"effortlessly|without (?:any )?effort|without lifting a finger|suddenly (?:reached|became|advanced)|轻而易举|毫不费力|莫名其妙地突破",
            )
            .ok()
        })
        .as_ref()
}

/// 从"晋升类"句子中检测本章达到的等级
///
/// 数字等级与境界阶梯 (下标 + 1) 取最大值
pub fn detect_power_level(lower: &str, realm_ladder: &[String]) -> Option<i32> {
    let realms: Vec<(i32, String)> = realm_ladder
        .iter()
        .enumerate()
        .map(|(i, r)| (i as i32 + 1, r.trim().to_lowercase()))
        .filter(|(_, r)| !r.is_empty())
        .collect();

    let mut detected: Option<i32> = None;
    for sentence in sentences(lower) {
        if !contains_any(sentence, ADVANCE_MARKERS) {
            continue;
        }
        for re in level_patterns() {
            for caps in re.captures_iter(sentence) {
                if let Some(level) = caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok()) {
                    detected = Some(detected.map_or(level, |d| d.max(level)));
                }
            }
        }
        for (level, realm) in &realms {
            if sentence.contains(realm.as_str()) {
                detected = Some(detected.map_or(*level, |d| d.max(*level)));
            }
        }
    }
    detected
}

pub fn score(
    lower: &str,
    ctx: &QualityContext,
    th: &QualityThresholds,
) -> (DimensionScore, Option<i32>) {
    let mut result = DimensionScore::perfect();
    let detected = detect_power_level(lower, &ctx.realm_ladder);

    if let (Some(previous), Some(current)) = (ctx.previous_power_level, detected) {
        let jump = current - previous;
        if jump > 0 {
            let max_delta = ctx.arc_max_power_delta.unwrap_or(th.default_max_power_delta);
            if jump > max_delta {
                result.score -= th.power_jump_penalty;
                result.issues.push(warning(
                    QualityDimension::PowerSanity,
                    format!("战力从 {} 跳到 {}, 超过本篇章单章上限 {}", previous, current, max_delta),
                    format!("把提升压到 {} 级以内, 其余留到后续章节", max_delta),
                ));
            }
            if !contains_any(lower, BUILDUP_MARKERS) {
                result.score -= th.missing_buildup_penalty;
                result.issues.push(warning(
                    QualityDimension::PowerSanity,
                    "战力提升缺少任何修炼或铺垫".to_string(),
                    "在提升之前补写修炼、苦战或付出的过程".to_string(),
                ));
            }
        }
    }

    if effortless_pattern().is_some_and(|re| re.is_match(lower)) {
        result.score -= th.effortless_gain_penalty;
        result.issues.push(warning(
            QualityDimension::PowerSanity,
            "出现不付代价就获得力量的描写".to_string(),
            "为力量的获得加上代价、风险或努力".to_string(),
        ));
    }

    (result.clamped(), detected)
}
