use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::PostureAngles;
use crate::config::AnalysisConfig;
use crate::pose::{Detection, Keypoint, KeypointIndex};

/// ゼロ長ベクトル対策
const ANGLE_EPSILON: f64 = 1e-6;

/// 点 b における角 abc（度）
///
/// `acos(clamp(ba·bc / (|ba||bc| + ε), -1, 1))`
pub fn joint_angle(a: Vector2<f64>, b: Vector2<f64>, c: Vector2<f64>) -> f64 {
    let ba = a - b;
    let bc = c - b;
    let cosine = ba.dot(&bc) / (ba.norm() * bc.norm() + ANGLE_EPSILON);
    cosine.clamp(-1.0, 1.0).acos().to_degrees()
}

fn point(kp: &Keypoint) -> Vector2<f64> {
    Vector2::new(kp.x as f64, kp.y as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// 片側の必須5点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideJoints {
    pub ear: KeypointIndex,
    pub shoulder: KeypointIndex,
    pub hip: KeypointIndex,
    pub knee: KeypointIndex,
    pub ankle: KeypointIndex,
}

impl SideJoints {
    pub fn all(&self) -> [KeypointIndex; 5] {
        [self.ear, self.shoulder, self.hip, self.knee, self.ankle]
    }
}

impl Side {
    pub fn joints(self) -> SideJoints {
        use KeypointIndex::*;
        match self {
            Side::Left => SideJoints {
                ear: LeftEar,
                shoulder: LeftShoulder,
                hip: LeftHip,
                knee: LeftKnee,
                ankle: LeftAnkle,
            },
            Side::Right => SideJoints {
                ear: RightEar,
                shoulder: RightShoulder,
                hip: RightHip,
                knee: RightKnee,
                ankle: RightAnkle,
            },
        }
    }

    /// 耳の信頼度が高い側。同値なら左
    pub fn select(detection: &Detection) -> Side {
        let left = detection.get(KeypointIndex::LeftEar).confidence;
        let right = detection.get(KeypointIndex::RightEar).confidence;
        if left >= right {
            Side::Left
        } else {
            Side::Right
        }
    }
}

/// 5点から3つの関節角を計算
pub fn posture_angles(
    ear: Vector2<f64>,
    shoulder: Vector2<f64>,
    hip: Vector2<f64>,
    knee: Vector2<f64>,
    ankle: Vector2<f64>,
) -> PostureAngles {
    PostureAngles {
        neck: joint_angle(hip, shoulder, ear),
        back: joint_angle(knee, hip, shoulder),
        legs: joint_angle(ankle, knee, hip),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AngleAnalysis {
    Measured {
        side: Side,
        angles: PostureAngles,
        /// 必須5点の最低信頼度
        min_confidence: f32,
    },
    LowConfidence {
        side: Side,
        min_confidence: f32,
    },
    /// 必須点が (0,0)
    Incomplete {
        side: Side,
        missing: KeypointIndex,
    },
}

pub struct AngleAnalyzer {
    confidence_threshold: f32,
}

impl AngleAnalyzer {
    pub fn new(confidence_threshold: f32) -> Self {
        Self { confidence_threshold }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.confidence_threshold)
    }

    pub fn analyze(&self, detection: &Detection) -> AngleAnalysis {
        let side = Side::select(detection);
        let joints = side.joints();

        let min_confidence = joints
            .all()
            .iter()
            .map(|&j| detection.get(j).confidence)
            // NaN は信頼度 0 とみなす
            .map(|c| if c.is_nan() { 0.0 } else { c })
            .fold(f32::INFINITY, f32::min);
        if !(min_confidence >= self.confidence_threshold) {
            return AngleAnalysis::LowConfidence { side, min_confidence };
        }

        if let Some(missing) = joints.all().into_iter().find(|&j| {
            let kp = detection.get(j);
            kp.is_origin() || !kp.is_finite()
        }) {
            return AngleAnalysis::Incomplete { side, missing };
        }

        let angles = posture_angles(
            point(detection.get(joints.ear)),
            point(detection.get(joints.shoulder)),
            point(detection.get(joints.hip)),
            point(detection.get(joints.knee)),
            point(detection.get(joints.ankle)),
        );
        AngleAnalysis::Measured {
            side,
            angles,
            min_confidence,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pose::BBox;

    fn v(x: f64, y: f64) -> Vector2<f64> {
        Vector2::new(x, y)
    }

    /// 指定した3角度になるよう、腰を原点に5点を配置する
    pub(crate) fn side_points(angles: PostureAngles) -> [(f64, f64); 5] {
        // 腰 → 膝 は右向き
        let hip = v(300.0, 300.0);
        let knee = hip + v(100.0, 0.0);
        // 腰の角: 膝方向から反時計回り（画面上）に back 度
        let rot = |dir: Vector2<f64>, deg: f64| {
            let r = deg.to_radians();
            v(dir.x * r.cos() + dir.y * r.sin(), -dir.x * r.sin() + dir.y * r.cos())
        };
        let hip_to_knee = (knee - hip).normalize();
        let hip_to_shoulder = rot(hip_to_knee, angles.back);
        let shoulder = hip + hip_to_shoulder * 150.0;
        // 肩の角: 肩→腰方向から neck 度
        let shoulder_to_hip = (hip - shoulder).normalize();
        let ear = shoulder + rot(shoulder_to_hip, -angles.neck) * 60.0;
        // 膝の角: 膝→腰方向から legs 度
        let knee_to_hip = (hip - knee).normalize();
        let ankle = knee + rot(knee_to_hip, -angles.legs) * 100.0;
        [
            (ear.x, ear.y),
            (shoulder.x, shoulder.y),
            (hip.x, hip.y),
            (knee.x, knee.y),
            (ankle.x, ankle.y),
        ]
    }

    /// 片側5点を指定信頼度で埋めた検出
    pub(crate) fn side_detection(side: Side, angles: PostureAngles, confidences: [f32; 5]) -> Detection {
        let mut det = Detection::empty(BBox::new(100.0, 100.0, 600.0, 700.0), 0.9, 640, 720);
        let points = side_points(angles);
        for ((joint, (x, y)), conf) in side.joints().all().into_iter().zip(points).zip(confidences) {
            det.set(Keypoint::new(joint, x as f32, y as f32, conf));
        }
        det
    }

    #[test]
    fn test_right_angle() {
        let a = joint_angle(v(1.0, 0.0), v(0.0, 0.0), v(0.0, 1.0));
        assert!((a - 90.0).abs() < 0.5);
    }

    #[test]
    fn test_collinear_is_straight() {
        let a = joint_angle(v(-5.0, 0.0), v(0.0, 0.0), v(7.0, 0.0));
        assert!((a - 180.0).abs() < 0.5);
        let b = joint_angle(v(0.0, 0.0), v(1.0, 1.0), v(2.0, 2.0));
        assert!((b - 180.0).abs() < 0.5);
    }

    #[test]
    fn test_symmetry_and_range() {
        let pts = [
            (v(3.0, 1.0), v(0.0, 0.0), v(-2.0, 5.0)),
            (v(10.0, 10.0), v(4.0, -3.0), v(4.0, 8.0)),
            (v(-1.0, -1.0), v(2.5, 0.5), v(6.0, -7.0)),
        ];
        for (a, b, c) in pts {
            let abc = joint_angle(a, b, c);
            let cba = joint_angle(c, b, a);
            assert!((0.0..=180.0).contains(&abc));
            assert!((abc - cba).abs() < 1e-9);
        }
    }

    #[test]
    fn test_degenerate_vector_is_finite() {
        let a = joint_angle(v(1.0, 1.0), v(1.0, 1.0), v(5.0, 2.0));
        assert!(a.is_finite());
        assert!((a - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_side_points_reproduce_angles() {
        let target = PostureAngles::new(166.0, 150.0, 100.0);
        let p = side_points(target);
        let angles = posture_angles(
            v(p[0].0, p[0].1),
            v(p[1].0, p[1].1),
            v(p[2].0, p[2].1),
            v(p[3].0, p[3].1),
            v(p[4].0, p[4].1),
        );
        assert!((angles.neck - 166.0).abs() < 1e-6);
        assert!((angles.back - 150.0).abs() < 1e-6);
        assert!((angles.legs - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_side_selection_prefers_higher_ear() {
        let mut det = Detection::empty(BBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 640, 480);
        det.set(Keypoint::new(KeypointIndex::LeftEar, 1.0, 1.0, 0.4));
        det.set(Keypoint::new(KeypointIndex::RightEar, 1.0, 1.0, 0.6));
        assert_eq!(Side::select(&det), Side::Right);

        det.set(Keypoint::new(KeypointIndex::RightEar, 1.0, 1.0, 0.4));
        assert_eq!(Side::select(&det), Side::Left);
    }

    #[test]
    fn test_analyze_measures_right_side() {
        let target = PostureAngles::new(166.0, 174.0, 169.0);
        let det = side_detection(Side::Right, target, [0.9; 5]);
        match AngleAnalyzer::new(0.75).analyze(&det) {
            AngleAnalysis::Measured { side, angles, min_confidence } => {
                assert_eq!(side, Side::Right);
                assert!((angles.neck - 166.0).abs() < 0.01);
                assert!((angles.back - 174.0).abs() < 0.01);
                assert!((angles.legs - 169.0).abs() < 0.01);
                assert!((min_confidence - 0.9).abs() < 1e-6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_analyze_low_confidence() {
        let target = PostureAngles::new(166.0, 174.0, 169.0);
        let det = side_detection(Side::Right, target, [0.9, 0.9, 0.4, 0.9, 0.9]);
        assert_eq!(
            AngleAnalyzer::new(0.75).analyze(&det),
            AngleAnalysis::LowConfidence {
                side: Side::Right,
                min_confidence: 0.4
            }
        );
    }

    #[test]
    fn test_analyze_incomplete_on_origin() {
        let target = PostureAngles::new(166.0, 174.0, 169.0);
        let mut det = side_detection(Side::Left, target, [0.9; 5]);
        det.set(Keypoint::new(KeypointIndex::LeftKnee, 0.0, 0.0, 0.9));
        assert_eq!(
            AngleAnalyzer::new(0.75).analyze(&det),
            AngleAnalysis::Incomplete {
                side: Side::Left,
                missing: KeypointIndex::LeftKnee
            }
        );
    }

    #[test]
    fn test_analyze_nan_confidence_is_low() {
        let target = PostureAngles::new(166.0, 174.0, 169.0);
        let det = side_detection(Side::Right, target, [0.9, f32::NAN, 0.9, 0.9, 0.9]);
        assert!(matches!(
            AngleAnalyzer::new(0.75).analyze(&det),
            AngleAnalysis::LowConfidence { side: Side::Right, .. }
        ));
    }

    #[test]
    fn test_analyze_non_finite_point_is_incomplete() {
        let target = PostureAngles::new(166.0, 174.0, 169.0);
        let mut det = side_detection(Side::Right, target, [0.9; 5]);
        det.set(Keypoint::new(KeypointIndex::RightHip, f32::INFINITY, 300.0, 0.9));
        assert_eq!(
            AngleAnalyzer::new(0.75).analyze(&det),
            AngleAnalysis::Incomplete {
                side: Side::Right,
                missing: KeypointIndex::RightHip
            }
        );
    }
}
