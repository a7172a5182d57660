use std::sync::{Arc, RwLock};

use tracing::info;

use super::{Axis, PostureAngles};
use crate::config::ScoringConfig;

/// ユーザーの理想角度と、スコア正規化用の最大偏差
///
/// `max_deviation_threshold` は理想角度と同時にしか作られないため、
/// 常に現在の理想角度に対応している。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    ideal: PostureAngles,
    max_deviation_threshold: f64,
}

impl CalibrationProfile {
    pub fn new(ideal: PostureAngles, scoring: &ScoringConfig) -> Self {
        Self {
            ideal,
            max_deviation_threshold: max_deviation(&ideal, scoring),
        }
    }

    pub fn ideal(&self) -> PostureAngles {
        self.ideal
    }

    pub fn max_deviation_threshold(&self) -> f64 {
        self.max_deviation_threshold
    }

    /// 基準プロファイルからの軸ごとの差（個人 - 基準）
    pub fn offsets_from(&self, base: &CalibrationProfile) -> PostureAngles {
        PostureAngles::new(
            self.ideal.neck - base.ideal.neck,
            self.ideal.back - base.ideal.back,
            self.ideal.legs - base.ideal.legs,
        )
    }
}

/// Σ weight · (理想から遠い方の限界までの距離)²
pub fn max_deviation(ideal: &PostureAngles, scoring: &ScoringConfig) -> f64 {
    Axis::ALL
        .iter()
        .map(|&axis| {
            let target = ideal.get(axis);
            let (min, max) = scoring.limits.get(axis);
            let worst = (min - target).abs().max((max - target).abs());
            scoring.weights.get(axis) * worst * worst
        })
        .sum()
}

/// キャリブレーションの共有ストア
///
/// 更新はプロファイルを丸ごと差し替える。読み手は `snapshot` で
/// 受け取った `Arc` を使い続けるので、更新途中の状態は見えない。
pub struct CalibrationStore {
    scoring: ScoringConfig,
    current: RwLock<Arc<CalibrationProfile>>,
}

impl CalibrationStore {
    pub fn new(scoring: ScoringConfig) -> Self {
        let profile = CalibrationProfile::new(scoring.default_ideal_angles(), &scoring);
        Self {
            scoring,
            current: RwLock::new(Arc::new(profile)),
        }
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    pub fn snapshot(&self) -> Arc<CalibrationProfile> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// 差し替えた `Arc` をそのまま返す
    fn swap(&self, profile: CalibrationProfile) -> Arc<CalibrationProfile> {
        let profile = Arc::new(profile);
        let installed = Arc::clone(&profile);
        match self.current.write() {
            Ok(mut guard) => *guard = profile,
            Err(poisoned) => *poisoned.into_inner() = profile,
        }
        installed
    }

    /// 指定角度を理想として登録
    pub fn calibrate(&self, neck: f64, back: f64, legs: f64) -> Arc<CalibrationProfile> {
        let ideal = PostureAngles::new(neck, back, legs);
        let profile = CalibrationProfile::new(ideal, &self.scoring);
        info!(
            neck,
            back,
            legs,
            max_deviation = profile.max_deviation_threshold(),
            "calibrated ideal posture"
        );
        self.swap(profile)
    }

    pub fn calibrate_angles(&self, angles: &PostureAngles) -> Arc<CalibrationProfile> {
        self.calibrate(angles.neck, angles.back, angles.legs)
    }

    pub fn reset_to_defaults(&self) -> Arc<CalibrationProfile> {
        let profile = CalibrationProfile::new(self.scoring.default_ideal_angles(), &self.scoring);
        info!("calibration reset to defaults");
        self.swap(profile)
    }

    /// (neck, back, legs)
    pub fn get_calibration(&self) -> (f64, f64, f64) {
        let ideal = self.snapshot().ideal();
        (ideal.neck, ideal.back, ideal.legs)
    }
}
