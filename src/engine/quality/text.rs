// ==========================================
// 质检 - 文本切分工具
// ==========================================

use crate::domain::chapter::count_words;

/// 小写化后的正文 (规则匹配统一用小写)
pub fn lowercase(content: &str) -> String {
    content.to_lowercase()
}

/// 任一标记出现即为 true (markers 需为小写)
pub fn contains_any(lower: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| lower.contains(m))
}

/// 出现的标记数量 (按出现次数累计)
pub fn count_occurrences(lower: &str, markers: &[&str]) -> usize {
    markers.iter().map(|m| lower.matches(m).count()).sum()
}

/// 段落: 非空行
pub fn paragraphs(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect()
}

/// 引号内的对白片段
///
/// 支持 "..."、“...”、「...」
pub fn dialogue_segments(content: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;

    for c in content.chars() {
        match closing {
            None => {
                closing = match c {
                    '"' => Some('"'),
                    '“' => Some('”'),
                    '「' => Some('」'),
                    _ => None,
                };
            }
            Some(close) if c == close => {
                if !current.trim().is_empty() {
                    segments.push(current.trim().to_string());
                }
                current.clear();
                closing = None;
            }
            Some(_) => current.push(c),
        }
    }
    segments
}

/// 对白词数 / 总词数
pub fn dialogue_ratio(content: &str, word_count: i32) -> f64 {
    if word_count <= 0 {
        return 0.0;
    }
    let dialogue_words: i32 = dialogue_segments(content)
        .iter()
        .map(|s| count_words(s))
        .sum();
    dialogue_words as f64 / word_count as f64
}

/// 按句末标点切句
pub fn sentences(content: &str) -> Vec<&str> {
    content
        .split(|c| matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '\n'))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}
