pub mod angles;
pub mod calibration;
pub mod classifier;
pub mod label;
pub mod scorer;

use serde::{Deserialize, Serialize};

pub use angles::{joint_angle, AngleAnalysis, AngleAnalyzer, Side};
pub use calibration::{CalibrationProfile, CalibrationStore};
pub use classifier::PostureClassifier;
pub use label::{AxisAssessment, AxisStatus, ModelLabel, PostureLabel, PostureResult};
pub use scorer::PostureScorer;

/// 姿勢評価の3軸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Neck,
    Back,
    Legs,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Neck, Axis::Back, Axis::Legs];

    pub fn name(self) -> &'static str {
        match self {
            Axis::Neck => "neck",
            Axis::Back => "back",
            Axis::Legs => "legs",
        }
    }
}

/// 首・背中・脚の関節角（度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureAngles {
    pub neck: f64,
    pub back: f64,
    pub legs: f64,
}

impl PostureAngles {
    pub const fn new(neck: f64, back: f64, legs: f64) -> Self {
        Self { neck, back, legs }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Neck => self.neck,
            Axis::Back => self.back,
            Axis::Legs => self.legs,
        }
    }

    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::Neck => self.neck = value,
            Axis::Back => self.back = value,
            Axis::Legs => self.legs = value,
        }
        self
    }
}
