// ==========================================
// 质检 - 扩展维度 (对白质量 / 套话 / 说明性段落)
// ==========================================
// 仅在 extended_quality 开启时参与评分
// ==========================================

use super::text::{count_occurrences, dialogue_segments, paragraphs};
use super::{warning, DimensionScore};
use crate::domain::chapter::count_words;
use crate::domain::quality::QualityDimension;

const CLICHES: &[&str] = &[
    "a chill ran down",
    "little did",
    "courting death",
    "you dare",
    "heaven-defying",
    "frog in a well",
    "in the blink of an eye",
    "his jaw dropped",
    "cold sweat",
    "sent shivers",
    "找死",
    "井底之蛙",
    "不知天高地厚",
    "倒吸一口凉气",
    "癞蛤蟆想吃天鹅肉",
];

const EXPOSITION_MARKERS: &[&str] = &[
    "as everyone knew",
    "it was said that",
    "according to legend",
    "as you know",
    "it should be noted",
    "众所周知",
    "据说",
    "要知道",
];

/// 无对白的超长段落视为说明性大段
const INFO_DUMP_WORDS: i32 = 150;

pub fn dialogue_quality(content: &str) -> DimensionScore {
    let segments = dialogue_segments(content);
    if segments.is_empty() {
        return DimensionScore {
            score: 50.0,
            issues: vec![warning(
                QualityDimension::DialogueQuality,
                "全章没有对白".to_string(),
                "加入推动冲突的对话, 让人物通过语言交锋".to_string(),
            )],
        };
    }

    let mut result = DimensionScore::perfect();
    let total_words: i32 = segments.iter().map(|s| count_words(s)).sum();
    let avg_words = total_words as f64 / segments.len() as f64;
    if avg_words < 3.0 {
        result.score -= 25.0;
        result.issues.push(warning(
            QualityDimension::DialogueQuality,
            format!("对白平均只有 {:.1} 词, 多为空洞短句", avg_words),
            "让对白承载信息或情绪, 减少单纯的惊呼与应答".to_string(),
        ));
    }

    let exclaims = segments
        .iter()
        .filter(|s| s.ends_with('!') || s.ends_with('！'))
        .count();
    if exclaims * 2 > segments.len() {
        result.score -= 20.0;
        result.issues.push(warning(
            QualityDimension::DialogueQuality,
            format!("{} / {} 句对白以感叹号结尾", exclaims, segments.len()),
            "降低感叹句比例, 用措辞而非标点表达情绪".to_string(),
        ));
    }

    let said = content.to_lowercase().matches(" said").count();
    if segments.len() >= 3 && said * 10 > segments.len() * 8 {
        result.score -= 15.0;
        result.issues.push(warning(
            QualityDimension::DialogueQuality,
            "对白标签几乎全是 said".to_string(),
            "用动作描写代替部分对白标签".to_string(),
        ));
    }

    result.clamped()
}

/// 套话 (越高越差): 每处 10 分, 封顶 100
pub fn cliche(lower: &str) -> DimensionScore {
    let hits = count_occurrences(lower, CLICHES);
    let mut result = DimensionScore {
        score: (hits as f64 * 10.0).min(100.0),
        issues: Vec::new(),
    };
    if hits > 0 {
        let found: Vec<&str> = CLICHES.iter().copied().filter(|c| lower.contains(c)).collect();
        result.issues.push(warning(
            QualityDimension::Cliche,
            format!("出现 {} 处套话: {}", hits, found.join(" / ")),
            "把套话换成贴合当前场景的具体描写".to_string(),
        ));
    }
    result
}

pub fn exposition(content: &str, lower: &str) -> DimensionScore {
    let mut result = DimensionScore::perfect();

    let dumps = paragraphs(content)
        .into_iter()
        .filter(|p| dialogue_segments(p).is_empty() && count_words(p) > INFO_DUMP_WORDS)
        .count();
    if dumps > 0 {
        result.score -= 20.0 * dumps as f64;
        result.issues.push(warning(
            QualityDimension::Exposition,
            format!("{} 个段落为无对白的大段说明", dumps),
            "把设定拆进行动与对话中逐步交代".to_string(),
        ));
    }

    let markers = count_occurrences(lower, EXPOSITION_MARKERS);
    if markers > 0 {
        result.score -= 10.0 * markers as f64;
        result.issues.push(warning(
            QualityDimension::Exposition,
            format!("{} 处直接向读者解释设定", markers),
            "删去旁白式解释, 让角色在情境中发现信息".to_string(),
        ));
    }

    result.clamped()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialogue_without_quotes() {
        assert_eq!(dialogue_quality("No one spoke.").score, 50.0);
    }

    #[test]
    fn test_exclamation_heavy_dialogue() {
        let text = "\"No!\" \"Run now!\" \"We should wait for the others here.\"";
        let result = dialogue_quality(text);
        assert_eq!(result.score, 80.0);
    }

    #[test]
    fn test_cliche_counts_occurrences() {
        let result = cliche("you dare? you dare! a chill ran down his spine.");
        assert_eq!(result.score, 30.0);
    }

    #[test]
    fn test_exposition_markers_and_dumps() {
        let dump = "lore ".repeat(160);
        let text = format!("{}\nAs everyone knew, the sect was old.", dump.trim_end());
        let lower = text.to_lowercase();
        assert_eq!(exposition(&text, &lower).score, 70.0);
    }
}
