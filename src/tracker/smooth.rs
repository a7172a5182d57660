use tracing::debug;

use crate::config::SmoothingConfig;
use crate::pose::{BBox, Detection, Keypoint, KeypointIndex};

#[derive(Debug, Clone, Copy, PartialEq)]
struct JointState {
    x: f32,
    y: f32,
    confidence: f32,
}

impl JointState {
    fn from_keypoint(kp: &Keypoint) -> Self {
        Self {
            x: kp.x,
            y: kp.y,
            confidence: kp.confidence,
        }
    }
}

/// 直前フレームの情報（リセット判定用）
#[derive(Debug, Clone, Copy)]
struct FrameRef {
    width: u32,
    height: u32,
    bbox: BBox,
}

/// キーポイント座標のEMA平滑化フィルタ
///
/// 状態は関節ごとの固定長配列。`None` はその関節を追跡していないことを表す。
/// フレームサイズの変化、またはBBox中心の移動量（直前BBoxの対角線で正規化）が
/// `jump_threshold` を超えたら全状態を破棄する。
pub struct LandmarkSmoother {
    alpha: f32,
    min_confidence: f32,
    jump_threshold: f32,
    states: [Option<JointState>; KeypointIndex::COUNT],
    last: Option<FrameRef>,
}

impl LandmarkSmoother {
    pub fn new(alpha: f32, min_confidence: f32, jump_threshold: f32) -> Self {
        Self {
            alpha,
            min_confidence,
            jump_threshold,
            states: [None; KeypointIndex::COUNT],
            last: None,
        }
    }

    pub fn from_config(config: &SmoothingConfig) -> Self {
        Self::new(config.alpha, config.min_confidence, config.jump_threshold)
    }

    pub fn is_tracking(&self, joint: KeypointIndex) -> bool {
        self.states[joint as usize].is_some()
    }

    fn should_reset(&self, detection: &Detection) -> bool {
        let Some(last) = self.last else {
            return false;
        };
        if last.width != detection.frame_width || last.height != detection.frame_height {
            debug!("frame size changed, resetting smoother");
            return true;
        }
        let (px, py) = last.bbox.center();
        let (cx, cy) = detection.bbox.center();
        let diagonal = last.bbox.diagonal().max(1.0);
        let jump = ((cx - px).powi(2) + (cy - py).powi(2)).sqrt() / diagonal;
        if jump > self.jump_threshold {
            debug!(jump, "bbox jump, resetting smoother");
            return true;
        }
        false
    }

    pub fn smooth(&mut self, detection: &Detection) -> Detection {
        if self.should_reset(detection) {
            self.reset();
        }
        self.last = Some(FrameRef {
            width: detection.frame_width,
            height: detection.frame_height,
            bbox: detection.bbox,
        });

        let a = self.alpha;
        let mut out = detection.clone();
        for (slot, kp) in self.states.iter_mut().zip(out.keypoints.iter_mut()) {
            if !kp.is_finite() {
                // 状態に混ぜず、未検出として出す
                *slot = None;
                *kp = Keypoint::missing(kp.joint);
                continue;
            }
            let absent = kp.is_origin() && kp.confidence == 0.0;
            if absent || !kp.is_valid(self.min_confidence) {
                // 生の値をそのまま通す
                *slot = None;
                continue;
            }
            let next = match *slot {
                None => JointState::from_keypoint(kp),
                Some(prev) => JointState {
                    x: a * kp.x + (1.0 - a) * prev.x,
                    y: a * kp.y + (1.0 - a) * prev.y,
                    confidence: a * kp.confidence + (1.0 - a) * prev.confidence,
                },
            };
            *slot = Some(next);
            kp.x = next.x;
            kp.y = next.y;
            kp.confidence = next.confidence;
        }
        out
    }

    pub fn reset(&mut self) {
        self.states = [None; KeypointIndex::COUNT];
        self.last = None;
    }
}

/// 人物ごとに独立した平滑化（検出順で対応付け）
pub struct SmootherBank {
    config: SmoothingConfig,
    smoothers: Vec<LandmarkSmoother>,
}

impl SmootherBank {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            smoothers: Vec::new(),
        }
    }

    pub fn smooth_all(&mut self, detections: &[Detection]) -> Vec<Detection> {
        self.smoothers.truncate(detections.len());
        while self.smoothers.len() < detections.len() {
            self.smoothers.push(LandmarkSmoother::from_config(&self.config));
        }
        self.smoothers
            .iter_mut()
            .zip(detections)
            .map(|(s, d)| s.smooth(d))
            .collect()
    }

    pub fn reset(&mut self) {
        self.smoothers.clear();
    }
}
