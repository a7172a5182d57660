use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Axis, PostureAngles};
use crate::tracker::StabilizerLabel;

/// フレームごとの姿勢判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostureLabel {
    Aligned,
    NeckMisalignment,
    BackMisalignment,
    LegsMisalignment,
    NeckBackMisalignment,
    NeckLegsMisalignment,
    BackLegsMisalignment,
    FullBodyMisalignment,
    NoPerson,
    LowConfidence,
    Incomplete,
}

impl PostureLabel {
    /// 各軸の GOOD/BAD の組み合わせからラベルを決める
    pub fn from_axes(neck_good: bool, back_good: bool, legs_good: bool) -> Self {
        use PostureLabel::*;
        match (neck_good, back_good, legs_good) {
            (true, true, true) => Aligned,
            (true, true, false) => LegsMisalignment,
            (true, false, true) => BackMisalignment,
            (true, false, false) => BackLegsMisalignment,
            (false, true, true) => NeckMisalignment,
            (false, true, false) => NeckLegsMisalignment,
            (false, false, true) => NeckBackMisalignment,
            (false, false, false) => FullBodyMisalignment,
        }
    }

    /// 姿勢ラベルなら (neck, back, legs) の GOOD フラグ
    pub fn axes(self) -> Option<(bool, bool, bool)> {
        use PostureLabel::*;
        Some(match self {
            Aligned => (true, true, true),
            LegsMisalignment => (true, true, false),
            BackMisalignment => (true, false, true),
            BackLegsMisalignment => (true, false, false),
            NeckMisalignment => (false, true, true),
            NeckLegsMisalignment => (false, true, false),
            NeckBackMisalignment => (false, false, true),
            FullBodyMisalignment => (false, false, false),
            NoPerson | LowConfidence | Incomplete => return None,
        })
    }

    pub fn is_posture(self) -> bool {
        self.axes().is_some()
    }

    pub fn as_str(self) -> &'static str {
        use PostureLabel::*;
        match self {
            Aligned => "ALIGNED",
            NeckMisalignment => "NECK_MISALIGNMENT",
            BackMisalignment => "BACK_MISALIGNMENT",
            LegsMisalignment => "LEGS_MISALIGNMENT",
            NeckBackMisalignment => "NECK_BACK_MISALIGNMENT",
            NeckLegsMisalignment => "NECK_LEGS_MISALIGNMENT",
            BackLegsMisalignment => "BACK_LEGS_MISALIGNMENT",
            FullBodyMisalignment => "FULL_BODY_MISALIGNMENT",
            NoPerson => "NO_PERSON",
            LowConfidence => "LOW_CONFIDENCE",
            Incomplete => "INCOMPLETE",
        }
    }

    /// 表示用メッセージ
    pub fn message(self) -> &'static str {
        use PostureLabel::*;
        match self {
            Aligned => "Aligned Posture",
            NeckMisalignment => "Neck Misalignment",
            BackMisalignment => "Back Misalignment",
            LegsMisalignment => "Legs Misalignment",
            NeckBackMisalignment => "Neck & Back Misalignment",
            NeckLegsMisalignment => "Neck & Legs Misalignment",
            BackLegsMisalignment => "Back & Legs Misalignment",
            FullBodyMisalignment => "Full Body Misalignment",
            NoPerson => "No person detected. Step into the camera view.",
            LowConfidence => "Pose unclear. Turn sideways so your ear, shoulder, hip, knee and ankle are visible.",
            Incomplete => "Some body points are missing. Move back so your whole body is in frame.",
        }
    }
}

impl fmt::Display for PostureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostureLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PostureLabel::*;
        let all = [
            Aligned,
            NeckMisalignment,
            BackMisalignment,
            LegsMisalignment,
            NeckBackMisalignment,
            NeckLegsMisalignment,
            BackLegsMisalignment,
            FullBodyMisalignment,
            NoPerson,
            LowConfidence,
            Incomplete,
        ];
        all.into_iter()
            .find(|l| l.as_str() == s || l.message() == s)
            .ok_or_else(|| format!("unknown posture label: {s}"))
    }
}

impl StabilizerLabel for PostureLabel {
    fn is_known(&self) -> bool {
        self.is_posture()
    }

    /// GOOD/BAD パターンが1軸だけ違うラベル同士
    fn is_similar(&self, other: &Self) -> bool {
        match (self.axes(), other.axes()) {
            (Some(a), Some(b)) => {
                let diff = (a.0 != b.0) as u8 + (a.1 != b.1) as u8 + (a.2 != b.2) as u8;
                diff == 1
            }
            _ => false,
        }
    }
}

/// 個人化モデルが返すラベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLabel {
    Straight,
    Recline,
    Hunchback,
    NeckBent,
    NeckDown,
    Unknown,
}

impl ModelLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelLabel::Straight => "straight",
            ModelLabel::Recline => "recline",
            ModelLabel::Hunchback => "hunchback",
            ModelLabel::NeckBent => "neck_bent",
            ModelLabel::NeckDown => "neck_down",
            ModelLabel::Unknown => "unknown",
        }
    }

    /// 類似チェーン上の位置
    fn chain_position(self) -> Option<u8> {
        match self {
            ModelLabel::Straight => Some(0),
            ModelLabel::Recline => Some(1),
            ModelLabel::Hunchback => Some(2),
            ModelLabel::NeckBent => Some(3),
            ModelLabel::NeckDown => Some(4),
            ModelLabel::Unknown => None,
        }
    }
}

impl FromStr for ModelLabel {
    type Err = std::convert::Infallible;

    /// 未知の文字列は `Unknown`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Ok(match normalized.as_str() {
            "straight" => ModelLabel::Straight,
            "recline" => ModelLabel::Recline,
            "hunchback" => ModelLabel::Hunchback,
            "neck_bent" => ModelLabel::NeckBent,
            "neck_down" => ModelLabel::NeckDown,
            _ => ModelLabel::Unknown,
        })
    }
}

impl fmt::Display for ModelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StabilizerLabel for ModelLabel {
    fn is_known(&self) -> bool {
        *self != ModelLabel::Unknown
    }

    /// straight↔recline↔hunchback↔neck_bent↔neck_down の隣接
    fn is_similar(&self, other: &Self) -> bool {
        match (self.chain_position(), other.chain_position()) {
            (Some(a), Some(b)) => a.abs_diff(b) == 1,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisStatus {
    Good,
    /// 許容範囲より小さい角度（曲がりすぎ・前傾）
    TooLow,
    /// 許容範囲より大きい角度（反りすぎ・伸ばしすぎ）
    TooHigh,
}

impl AxisStatus {
    pub fn describe(self) -> &'static str {
        match self {
            AxisStatus::Good => "GOOD",
            AxisStatus::TooLow => "INCORRECT (Too Bent/Forward)",
            AxisStatus::TooHigh => "INCORRECT (Too Reclined/Extended)",
        }
    }

    pub fn is_good(self) -> bool {
        self == AxisStatus::Good
    }
}

/// 1軸分の判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisAssessment {
    pub axis: Axis,
    pub angle: f64,
    pub status: AxisStatus,
    /// "GOOD" / "INCORRECT (Too Bent/Forward)" など表示用の状態
    pub status_text: String,
    pub suggestion: String,
}

/// フレームごとの判定結果。生成後は変更しない
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostureResult {
    pub label: PostureLabel,
    pub confidence: f32,
    pub score: u8,
    pub angles: Option<PostureAngles>,
    pub message: String,
    pub suggestions: Vec<String>,
    pub details: Vec<AxisAssessment>,
    /// 個人化モデルの（安定化済み）ラベル
    pub ml_label: Option<ModelLabel>,
}

impl PostureResult {
    fn unavailable(label: PostureLabel, confidence: f32) -> Self {
        Self {
            label,
            confidence,
            score: 0,
            angles: None,
            message: label.message().to_string(),
            suggestions: Vec::new(),
            details: Vec::new(),
            ml_label: None,
        }
    }

    pub fn no_person() -> Self {
        Self::unavailable(PostureLabel::NoPerson, 0.0)
    }

    pub fn low_confidence(min_confidence: f32) -> Self {
        Self::unavailable(PostureLabel::LowConfidence, min_confidence)
    }

    pub fn incomplete(confidence: f32) -> Self {
        Self::unavailable(PostureLabel::Incomplete, confidence)
    }

    /// 安定化後のラベルに差し替えた結果を作る
    ///
    /// 提案は、差し替え後のラベルで BAD の軸のものだけを残す。
    pub fn relabeled(&self, label: PostureLabel) -> Self {
        let mut result = self.clone();
        if label == result.label {
            return result;
        }
        result.label = label;
        result.message = label.message().to_string();
        if let Some((neck, back, legs)) = label.axes() {
            let bad = |axis: Axis| match axis {
                Axis::Neck => !neck,
                Axis::Back => !back,
                Axis::Legs => !legs,
            };
            result.suggestions = result
                .details
                .iter()
                .filter(|d| !d.status.is_good() && bad(d.axis))
                .map(|d| d.suggestion.clone())
                .collect();
        }
        result
    }

    pub fn has_posture(&self) -> bool {
        self.label.is_posture()
    }
}
