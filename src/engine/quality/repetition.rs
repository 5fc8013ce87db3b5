// ==========================================
// 质检 - 重复度 (越高越差)
// ==========================================
// - 情节桥段: 固定分类, 每类一个正则
// - 重点短语: 去停用词后的连续 4 词 (中文为连续 4 字)
// 当前章出现, 且在最近 N 章中出现次数 >= repetition_threshold 即计为重复
// ==========================================

use super::{warning, DimensionScore, QualityContext};
use crate::domain::quality::{QualityDimension, QualityThresholds};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

const BEAT_PATTERNS: &[(&str, &str)] = &[
    ("face_slap", r"(?i)\b(slapp?ed|humiliat\w*|looked down on)\b|打脸|狗眼看人低"),
    ("breakthrough", r"(?i)\bbr(?:eak|oke)\s*through\b|突破"),
    ("auction", r"(?i)\bauction\w*\b|拍卖"),
    ("ambush", r"(?i)\bambush\w*\b|伏击|埋伏"),
    ("treasure", r"(?i)\b(treasure|ancient relic|inheritance)\b|宝物|传承"),
    ("tournament", r"(?i)\b(tournament|duel)\b|比武|大比"),
    ("alchemy", r"(?i)\b(alchemy|pill furnace|refined a pill)\b|炼丹"),
    ("rescue", r"(?i)\b(rescued|saved) (her|him) just in time\b|英雄救美"),
    ("secret_realm", r"(?i)\bsecret realm\b|秘境"),
    ("tribulation", r"(?i)\btribulation\b|天劫|雷劫"),
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "at", "by", "for", "with",
    "from", "as", "is", "was", "were", "be", "been", "he", "she", "it", "they", "his", "her",
    "their", "him", "them", "i", "you", "we", "that", "this", "had", "has", "have", "not", "no",
    "into", "then", "than", "so", "its", "my", "your", "our", "me", "us",
];

fn beats() -> &'static [(&'static str, Regex)] {
    static BEATS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    BEATS.get_or_init(|| {
        BEAT_PATTERNS
            .iter()
            .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
            .collect()
    })
}

/// 出现的桥段名称
pub fn detect_beats(content: &str) -> BTreeSet<&'static str> {
    beats()
        .iter()
        .filter(|(_, re)| re.is_match(content))
        .map(|(name, _)| *name)
        .collect()
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF)
}

/// 重点短语集合
pub fn significant_phrases(content: &str) -> BTreeSet<String> {
    let lower = content.to_lowercase();
    let mut phrases = BTreeSet::new();

    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .collect();
    for window in words.windows(4) {
        phrases.insert(window.join(" "));
    }

    let mut run: Vec<char> = Vec::new();
    for c in lower.chars().chain(std::iter::once(' ')) {
        if is_cjk(c) {
            run.push(c);
            continue;
        }
        for window in run.windows(4) {
            phrases.insert(window.iter().collect());
        }
        run.clear();
    }

    phrases
}

pub fn score(content: &str, ctx: &QualityContext, th: &QualityThresholds) -> DimensionScore {
    let mut result = DimensionScore { score: 0.0, issues: Vec::new() };
    if ctx.recent_chapters.is_empty() {
        return result;
    }

    let recent_beats: Vec<BTreeSet<&str>> =
        ctx.recent_chapters.iter().map(|c| detect_beats(c)).collect();
    let recent_phrases: Vec<BTreeSet<String>> =
        ctx.recent_chapters.iter().map(|c| significant_phrases(c)).collect();

    for beat in detect_beats(content) {
        let seen = recent_beats.iter().filter(|set| set.contains(beat)).count();
        if seen >= th.repetition_threshold {
            result.score += th.beat_repeat_penalty;
            result.issues.push(warning(
                QualityDimension::Repetition,
                format!("桥段「{}」在最近 {} 章中已出现 {} 次", beat, recent_beats.len(), seen),
                format!("替换「{}」桥段, 改用本卷尚未使用过的冲突形式", beat),
            ));
        }
    }

    let recurring: Vec<String> = significant_phrases(content)
        .into_iter()
        .filter(|phrase| {
            recent_phrases.iter().filter(|set| set.contains(phrase)).count() >= th.repetition_threshold
        })
        .collect();
    if !recurring.is_empty() {
        let phrase_penalty =
            (recurring.len() as f64 * th.phrase_repeat_penalty).min(th.phrase_penalty_cap);
        result.score += phrase_penalty;
        let sample: Vec<&str> = recurring.iter().take(5).map(|s| s.as_str()).collect();
        result.issues.push(warning(
            QualityDimension::Repetition,
            format!("{} 个短语与最近章节重复, 例如: {}", recurring.len(), sample.join(" / ")),
            "改写重复的描写与套句, 换用新的意象和措辞".to_string(),
        ));
    }

    result.score = result.score.min(100.0);
    result
}
