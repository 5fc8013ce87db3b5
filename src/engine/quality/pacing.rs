// ==========================================
// 质检 - 节奏
// ==========================================
// 100 起扣: 字数越界 / 对白比例越界 / 平均段落长度越界
// ==========================================

use super::text::{dialogue_ratio, paragraphs};
use super::{warning, DimensionScore};
use crate::domain::chapter::count_words;
use crate::domain::quality::{QualityDimension, QualityThresholds};

pub fn score(content: &str, word_count: i32, th: &QualityThresholds) -> DimensionScore {
    let mut result = DimensionScore::perfect();

    if word_count < th.min_words || word_count > th.max_words {
        result.score -= th.word_count_penalty;
        result.issues.push(warning(
            QualityDimension::Pacing,
            format!("字数 {} 不在 {}-{} 范围内", word_count, th.min_words, th.max_words),
            if word_count < th.min_words {
                "扩写关键场景, 把概述改成完整的场面".to_string()
            } else {
                "删减支线与重复描写, 把多余内容挪到下一章".to_string()
            },
        ));
    }

    let ratio = dialogue_ratio(content, word_count);
    if ratio < th.min_dialogue_ratio || ratio > th.max_dialogue_ratio {
        result.score -= th.dialogue_ratio_penalty;
        result.issues.push(warning(
            QualityDimension::Pacing,
            format!(
                "对白占比 {:.0}% 不在 {:.0}%-{:.0}% 范围内",
                ratio * 100.0,
                th.min_dialogue_ratio * 100.0,
                th.max_dialogue_ratio * 100.0
            ),
            if ratio < th.min_dialogue_ratio {
                "把部分叙述改写成人物对话".to_string()
            } else {
                "在对话之间补充动作与环境描写".to_string()
            },
        ));
    }

    let paras = paragraphs(content);
    let avg = if paras.is_empty() {
        0.0
    } else {
        paras.iter().map(|p| count_words(p) as f64).sum::<f64>() / paras.len() as f64
    };
    if avg < th.min_avg_paragraph_words || avg > th.max_avg_paragraph_words {
        result.score -= th.paragraph_penalty;
        result.issues.push(warning(
            QualityDimension::Pacing,
            format!("平均段落长度 {:.0} 词, 超出 {:.0}-{:.0}", avg, th.min_avg_paragraph_words, th.max_avg_paragraph_words),
            if avg < th.min_avg_paragraph_words {
                "合并零碎短段, 让场景连贯展开".to_string()
            } else {
                "拆分过长的段落".to_string()
            },
        ));
    }

    result.clamped()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_monologue_hits_every_band() {
        let th = QualityThresholds::default();
        let text = "Rain.";
        let result = score(text, count_words(text), &th);
        assert_eq!(result.score, 55.0);
        assert_eq!(result.issues.len(), 3);
    }

    #[test]
    fn test_balanced_chapter_is_clean() {
        let th = QualityThresholds::default();
        let paragraph = format!(
            "{} \"{}\"",
            "word ".repeat(40).trim_end(),
            "talk ".repeat(20).trim_end()
        );
        let text = vec![paragraph; 40].join("\n\n");
        let wc = count_words(&text);
        assert_eq!(wc, 2400);
        let result = score(&text, wc, &th);
        assert_eq!(result.score, 100.0);
    }
}
