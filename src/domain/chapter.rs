// ==========================================
// 连载生产流水线 - 章节成品
// ==========================================
// 任务完成后落库, 发布前 is_visible = false
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_id: String,
    pub production_id: String,
    pub chapter_number: i32,
    pub content: String,
    pub word_count: i32,
    pub quality_score: f64,
    pub summary: String,
    pub is_visible: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 统计词数: 空白分词 + CJK 字符逐字计数
pub fn count_words(content: &str) -> i32 {
    let mut count = 0i32;
    for token in content.split_whitespace() {
        let cjk = token.chars().filter(|c| is_cjk(*c)).count() as i32;
        let has_latin = token.chars().any(|c| c.is_alphanumeric() && !is_cjk(c));
        count += cjk + if has_latin { 1 } else { 0 };
    }
    count
}

pub(crate) fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

/// 抽取式摘要: 首句 + 末句, 截断到 max_chars
pub fn extractive_summary(content: &str, max_chars: usize) -> String {
    let sentences: Vec<&str> = content
        .split(|c| matches!(c, '.' | '!' | '?' | '。' | '！' | '？'))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    let summary = match sentences.as_slice() {
        [] => String::new(),
        [only] => only.to_string(),
        [first, .., last] => format!("{} … {}", first, last),
    };

    summary.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_words_mixed_scripts() {
        assert_eq!(count_words("The hero walked home."), 4);
        assert_eq!(count_words("林动 走了"), 4);
        assert_eq!(count_words(""), 0);
    }

    #[test]
    fn test_extractive_summary() {
        let s = extractive_summary("He woke. He trained. He won the duel.", 100);
        assert_eq!(s, "He woke … He won the duel");
        assert_eq!(extractive_summary("", 10), "");
    }
}
