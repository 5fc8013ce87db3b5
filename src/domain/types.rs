// ==========================================
// 连载生产流水线 - 领域类型定义
// ==========================================
// 状态集合一律为封闭枚举 + 显式转换表
// 存储格式: 小写 snake_case (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 状态字符串解析失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "未知{}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownStatus {}

// ==========================================
// 作品生产状态 (Production Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionStatus {
    Queued,   // 排队待激活
    Active,   // 生产中
    Writing,  // 正在写章节
    Paused,   // 暂停(连续失败或人工)
    Finished, // 完结
    Error,    // 异常
}

impl ProductionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionStatus::Queued => "queued",
            ProductionStatus::Active => "active",
            ProductionStatus::Writing => "writing",
            ProductionStatus::Paused => "paused",
            ProductionStatus::Finished => "finished",
            ProductionStatus::Error => "error",
        }
    }

    /// 转换表
    pub fn can_transition_to(&self, to: ProductionStatus) -> bool {
        use ProductionStatus::*;
        matches!(
            (self, to),
            (Queued, Active)
                | (Active, Writing)
                | (Active, Paused)
                | (Active, Finished)
                | (Active, Error)
                | (Writing, Active)
                | (Writing, Paused)
                | (Writing, Finished)
                | (Writing, Error)
                | (Paused, Active)
                | (Error, Active)
                | (Error, Paused)
        )
    }

    /// 是否占用激活名额
    pub fn occupies_capacity(&self) -> bool {
        matches!(self, ProductionStatus::Active | ProductionStatus::Writing)
    }
}

impl fmt::Display for ProductionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(ProductionStatus::Queued),
            "active" => Ok(ProductionStatus::Active),
            "writing" => Ok(ProductionStatus::Writing),
            "paused" => Ok(ProductionStatus::Paused),
            "finished" => Ok(ProductionStatus::Finished),
            "error" => Ok(ProductionStatus::Error),
            other => Err(UnknownStatus {
                kind: "作品状态",
                value: other.to_string(),
            }),
        }
    }
}

// ==========================================
// 章节写作任务状态 (Chapter Job Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterJobStatus {
    Pending,      // 待执行
    Writing,      // 生成中
    QualityCheck, // 质检中
    Rewriting,    // 自动修复中
    Completed,    // 已完成
    Failed,       // 失败
}

impl ChapterJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterJobStatus::Pending => "pending",
            ChapterJobStatus::Writing => "writing",
            ChapterJobStatus::QualityCheck => "quality_check",
            ChapterJobStatus::Rewriting => "rewriting",
            ChapterJobStatus::Completed => "completed",
            ChapterJobStatus::Failed => "failed",
        }
    }

    /// 转换表
    ///
    /// `-> Pending` 只用于滞留任务回收
    /// `Pending -> Failed` 只用于作品进度已越过该章节号
    pub fn can_transition_to(&self, to: ChapterJobStatus) -> bool {
        use ChapterJobStatus::*;
        matches!(
            (self, to),
            (Pending, Writing)
                | (Pending, Failed)
                | (Writing, QualityCheck)
                | (Writing, Failed)
                | (Writing, Pending)
                | (QualityCheck, Completed)
                | (QualityCheck, Rewriting)
                | (QualityCheck, Failed)
                | (QualityCheck, Pending)
                | (Rewriting, Completed)
                | (Rewriting, Failed)
                | (Rewriting, Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChapterJobStatus::Completed | ChapterJobStatus::Failed)
    }

    /// 执行中(占用单作品单写者名额)
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ChapterJobStatus::Writing | ChapterJobStatus::QualityCheck | ChapterJobStatus::Rewriting
        )
    }

    pub fn in_flight_states() -> [ChapterJobStatus; 3] {
        [
            ChapterJobStatus::Writing,
            ChapterJobStatus::QualityCheck,
            ChapterJobStatus::Rewriting,
        ]
    }
}

impl fmt::Display for ChapterJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChapterJobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ChapterJobStatus::Pending),
            "writing" => Ok(ChapterJobStatus::Writing),
            "quality_check" => Ok(ChapterJobStatus::QualityCheck),
            "rewriting" => Ok(ChapterJobStatus::Rewriting),
            "completed" => Ok(ChapterJobStatus::Completed),
            "failed" => Ok(ChapterJobStatus::Failed),
            other => Err(UnknownStatus {
                kind: "章节任务状态",
                value: other.to_string(),
            }),
        }
    }
}

// ==========================================
// 发布任务状态 (Publish Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Scheduled,  // 已排期
    Publishing, // 发布中
    Published,  // 已发布
    Failed,     // 发布失败(可重试)
    Cancelled,  // 已取消
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Scheduled => "scheduled",
            PublishStatus::Publishing => "publishing",
            PublishStatus::Published => "published",
            PublishStatus::Failed => "failed",
            PublishStatus::Cancelled => "cancelled",
        }
    }

    /// 转换表
    pub fn can_transition_to(&self, to: PublishStatus) -> bool {
        use PublishStatus::*;
        matches!(
            (self, to),
            (Scheduled, Publishing)
                | (Scheduled, Cancelled)
                | (Publishing, Published)
                | (Publishing, Failed)
                | (Failed, Publishing)
        )
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" => Ok(PublishStatus::Scheduled),
            "publishing" => Ok(PublishStatus::Publishing),
            "published" => Ok(PublishStatus::Published),
            "failed" => Ok(PublishStatus::Failed),
            "cancelled" => Ok(PublishStatus::Cancelled),
            other => Err(UnknownStatus {
                kind: "发布状态",
                value: other.to_string(),
            }),
        }
    }
}

// ==========================================
// 发布时段 (Publish Slot)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishSlot {
    Morning,   // 早间
    Afternoon, // 午间
    Evening,   // 晚间
}

impl PublishSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishSlot::Morning => "morning",
            PublishSlot::Afternoon => "afternoon",
            PublishSlot::Evening => "evening",
        }
    }
}

impl fmt::Display for PublishSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishSlot {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "morning" => Ok(PublishSlot::Morning),
            "afternoon" => Ok(PublishSlot::Afternoon),
            "evening" => Ok(PublishSlot::Evening),
            other => Err(UnknownStatus {
                kind: "发布时段",
                value: other.to_string(),
            }),
        }
    }
}

// ==========================================
// 质检结论 (Quality Action)
// ==========================================
// 顺序: Pass < HumanReview < AutoRewrite < Fail (越大越严重)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAction {
    Pass,
    HumanReview,
    AutoRewrite,
    Fail,
}

impl QualityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityAction::Pass => "pass",
            QualityAction::HumanReview => "human_review",
            QualityAction::AutoRewrite => "auto_rewrite",
            QualityAction::Fail => "fail",
        }
    }
}

impl fmt::Display for QualityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityAction {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pass" => Ok(QualityAction::Pass),
            "human_review" => Ok(QualityAction::HumanReview),
            "auto_rewrite" => Ok(QualityAction::AutoRewrite),
            "fail" => Ok(QualityAction::Fail),
            other => Err(UnknownStatus {
                kind: "质检结论",
                value: other.to_string(),
            }),
        }
    }
}
