// ==========================================
// 连载生产流水线 - 质检报告
// ==========================================
// 值对象, 不作为可变状态持久化
// 每一项超阈值都必须带 issue + suggestion
// ==========================================

use crate::domain::types::QualityAction;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 质检维度
// ==========================================
// 声明顺序即修复指令的严重度顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    Continuity,
    Repetition,
    PowerSanity,
    NewInformation,
    Pacing,
    DialogueQuality,
    Cliche,
    Exposition,
}

impl QualityDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityDimension::Continuity => "continuity",
            QualityDimension::Repetition => "repetition",
            QualityDimension::PowerSanity => "power_sanity",
            QualityDimension::NewInformation => "new_information",
            QualityDimension::Pacing => "pacing",
            QualityDimension::DialogueQuality => "dialogue_quality",
            QualityDimension::Cliche => "cliche",
            QualityDimension::Exposition => "exposition",
        }
    }
}

impl fmt::Display for QualityDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// 单条质检问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub dimension: QualityDimension,
    pub severity: IssueSeverity,
    pub message: String,
    pub suggestion: String,
}

// ==========================================
// 扩展子分 (对白 / 套话 / 说明性段落)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedScores {
    pub dialogue_quality: f64,
    /// 越高越差
    pub cliche: f64,
    pub exposition: f64,
}

// ==========================================
// QualityReport
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub continuity: f64,
    /// 越高越差
    pub repetition: f64,
    pub power_sanity: f64,
    pub new_information: f64,
    pub pacing: f64,
    pub extended: Option<ExtendedScores>,

    pub overall: f64,
    pub action: QualityAction,
    pub hard_failures: Vec<QualityDimension>,
    pub issues: Vec<QualityIssue>,
    pub word_count: i32,
    /// 本章检测到的战力等级 (未检测到为 None)
    #[serde(default)]
    pub detected_power_level: Option<i32>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.action == QualityAction::Pass
    }
}

// ==========================================
// QualityThresholds - 质检阈值
// ==========================================
// 存储: config_kv.quality_thresholds (JSON), 缺省字段取默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    // ===== 结论阈值 =====
    pub auto_rewrite_below: f64,
    pub pass_at: f64,

    // ===== 单项硬失败线 =====
    pub min_continuity: f64,
    pub max_repetition: f64,
    pub min_power_sanity: f64,
    pub min_pacing: f64,
    pub min_dialogue_quality: f64,
    pub max_cliche: f64,
    pub min_exposition: f64,

    // ===== 连贯性 =====
    pub dead_character_penalty: f64,
    pub missing_transition_penalty: f64,

    // ===== 重复度 =====
    /// 在最近窗口中出现次数 >= 此值才视为重复
    pub repetition_threshold: usize,
    pub beat_repeat_penalty: f64,
    pub phrase_repeat_penalty: f64,
    pub phrase_penalty_cap: f64,

    // ===== 战力 =====
    pub default_max_power_delta: i32,
    pub power_jump_penalty: f64,
    pub missing_buildup_penalty: f64,
    pub effortless_gain_penalty: f64,

    // ===== 新信息 =====
    pub min_new_info_categories: usize,
    pub new_info_points_per_category: f64,

    // ===== 节奏 =====
    pub min_words: i32,
    pub max_words: i32,
    pub min_dialogue_ratio: f64,
    pub max_dialogue_ratio: f64,
    pub min_avg_paragraph_words: f64,
    pub max_avg_paragraph_words: f64,
    pub word_count_penalty: f64,
    pub dialogue_ratio_penalty: f64,
    pub paragraph_penalty: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            auto_rewrite_below: 50.0,
            pass_at: 70.0,
            min_continuity: 60.0,
            max_repetition: 50.0,
            min_power_sanity: 60.0,
            min_pacing: 50.0,
            min_dialogue_quality: 40.0,
            max_cliche: 60.0,
            min_exposition: 40.0,
            dead_character_penalty: 25.0,
            missing_transition_penalty: 10.0,
            repetition_threshold: 2,
            beat_repeat_penalty: 15.0,
            phrase_repeat_penalty: 5.0,
            phrase_penalty_cap: 40.0,
            default_max_power_delta: 1,
            power_jump_penalty: 40.0,
            missing_buildup_penalty: 20.0,
            effortless_gain_penalty: 20.0,
            min_new_info_categories: 2,
            new_info_points_per_category: 25.0,
            min_words: 2_000,
            max_words: 5_000,
            min_dialogue_ratio: 0.15,
            max_dialogue_ratio: 0.60,
            min_avg_paragraph_words: 20.0,
            max_avg_paragraph_words: 200.0,
            word_count_penalty: 20.0,
            dialogue_ratio_penalty: 15.0,
            paragraph_penalty: 10.0,
        }
    }
}

impl QualityThresholds {
    /// 阈值自洽性检查
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.auto_rewrite_below) || !(0.0..=100.0).contains(&self.pass_at) {
            return Err("auto_rewrite_below / pass_at 必须在 0-100 之间".to_string());
        }
        if self.auto_rewrite_below > self.pass_at {
            return Err(format!(
                "auto_rewrite_below ({}) 不能高于 pass_at ({})",
                self.auto_rewrite_below, self.pass_at
            ));
        }
        if self.min_words > self.max_words {
            return Err("min_words 不能大于 max_words".to_string());
        }
        if self.min_dialogue_ratio > self.max_dialogue_ratio {
            return Err("min_dialogue_ratio 不能大于 max_dialogue_ratio".to_string());
        }
        if self.min_avg_paragraph_words > self.max_avg_paragraph_words {
            return Err("min_avg_paragraph_words 不能大于 max_avg_paragraph_words".to_string());
        }
        if self.repetition_threshold == 0 {
            return Err("repetition_threshold 必须 >= 1".to_string());
        }
        Ok(())
    }
}
