use super::calibration::CalibrationProfile;
use super::label::{AxisAssessment, AxisStatus, PostureLabel, PostureResult};
use super::{Axis, PostureAngles};
use crate::config::ScoringConfig;

/// 重み付き偏差がこれ以下なら理想と一致とみなす
const EXACT_MATCH_EPSILON: f64 = 1e-6;

fn suggestion(axis: Axis, status: AxisStatus) -> &'static str {
    match (axis, status) {
        (_, AxisStatus::Good) => "No correction needed.",
        (Axis::Neck, AxisStatus::TooLow) => "FIX: Your neck is bent too far forward. Tuck your chin in.",
        (Axis::Neck, AxisStatus::TooHigh) => "FIX: Avoid tilting your head too far back.",
        (Axis::Back, AxisStatus::TooLow) => "FIX: You are slouching. Sit up straight and engage your core.",
        (Axis::Back, AxisStatus::TooHigh) => "FIX: You are leaning back too far. Bring your torso upright.",
        (Axis::Legs, AxisStatus::TooLow) => "FIX: Your knees are too bent. Adjust your seating or footrest.",
        (Axis::Legs, AxisStatus::TooHigh) => "FIX: Your legs are too extended. Place your feet flat on the floor.",
    }
}

/// 角度とキャリブレーションからスコアとラベルを出す
pub struct PostureScorer {
    config: ScoringConfig,
}

impl PostureScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Σ weight · (observed - ideal)²
    pub fn weighted_deviation(&self, angles: &PostureAngles, profile: &CalibrationProfile) -> f64 {
        let ideal = profile.ideal();
        Axis::ALL
            .iter()
            .map(|&axis| {
                let diff = angles.get(axis) - ideal.get(axis);
                self.config.weights.get(axis) * diff * diff
            })
            .sum()
    }

    /// 0..=100 のスコア（小数点以下切り捨て）
    pub fn score(&self, angles: &PostureAngles, profile: &CalibrationProfile) -> u8 {
        let deviation = self.weighted_deviation(angles, profile);
        if deviation <= EXACT_MATCH_EPSILON {
            return 100;
        }
        let threshold = profile.max_deviation_threshold();
        if !(threshold > 0.0) {
            return 0;
        }
        let score = (100.0 * (1.0 - deviation / threshold)).clamp(0.0, 100.0);
        if score.is_finite() {
            score as u8
        } else {
            0
        }
    }

    pub fn axis_status(&self, axis: Axis, angle: f64, profile: &CalibrationProfile) -> AxisStatus {
        let ideal = profile.ideal().get(axis);
        let tolerance = self.config.tolerance.get(axis);
        // NaN は範囲外
        if !(angle >= ideal - tolerance) {
            AxisStatus::TooLow
        } else if angle > ideal + tolerance {
            AxisStatus::TooHigh
        } else {
            AxisStatus::Good
        }
    }

    pub fn assess(&self, angles: &PostureAngles, profile: &CalibrationProfile) -> Vec<AxisAssessment> {
        Axis::ALL
            .iter()
            .map(|&axis| {
                let angle = angles.get(axis);
                let status = self.axis_status(axis, angle, profile);
                AxisAssessment {
                    axis,
                    angle,
                    status,
                    status_text: status.describe().to_string(),
                    suggestion: suggestion(axis, status).to_string(),
                }
            })
            .collect()
    }

    pub fn classify(&self, angles: &PostureAngles, profile: &CalibrationProfile) -> PostureLabel {
        let good = |axis| self.axis_status(axis, angles.get(axis), profile).is_good();
        PostureLabel::from_axes(good(Axis::Neck), good(Axis::Back), good(Axis::Legs))
    }

    /// ルールベースの判定結果を組み立てる
    pub fn evaluate(
        &self,
        angles: PostureAngles,
        confidence: f32,
        profile: &CalibrationProfile,
    ) -> PostureResult {
        let details = self.assess(&angles, profile);
        let label = PostureLabel::from_axes(
            details[0].status.is_good(),
            details[1].status.is_good(),
            details[2].status.is_good(),
        );
        let suggestions = details
            .iter()
            .filter(|d| !d.status.is_good())
            .map(|d| d.suggestion.clone())
            .collect();

        PostureResult {
            label,
            confidence,
            score: self.score(&angles, profile),
            angles: Some(angles),
            message: label.message().to_string(),
            suggestions,
            details,
            ml_label: None,
        }
    }
}
