use serde::{Deserialize, Serialize};

/// COCO 17 キーポイントインデックス（YOLOv8-pose の出力順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointIndex; Self::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// snake_case 名 ("left_ear" など)
    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

/// 単一キーポイント（フレームのピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
    pub joint: KeypointIndex,
}

impl Keypoint {
    pub fn new(joint: KeypointIndex, x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence, joint }
    }

    /// 未検出を表す (0,0) 信頼度0のキーポイント
    pub fn missing(joint: KeypointIndex) -> Self {
        Self::new(joint, 0.0, 0.0, 0.0)
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// 座標がちょうど (0,0) なら未検出
    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// 座標と信頼度がすべて有限値か
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.confidence.is_finite()
    }
}

/// BBox（ピクセル座標、左上・右下）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// 中心・幅・高さから生成
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    pub fn diagonal(&self) -> f32 {
        self.width().hypot(self.height())
    }

    /// IoU。重ならなければ0
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let iy = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        let inter = ix * iy;
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// 1フレーム内の1人分の検出結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    /// `KeypointIndex` 順の17点
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Detection {
    pub fn new(
        bbox: BBox,
        confidence: f32,
        keypoints: [Keypoint; KeypointIndex::COUNT],
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        Self {
            bbox,
            confidence,
            keypoints,
            frame_width,
            frame_height,
        }
    }

    /// 全キーポイントを未検出で埋めた検出
    pub fn empty(bbox: BBox, confidence: f32, frame_width: u32, frame_height: u32) -> Self {
        let keypoints = std::array::from_fn(|i| Keypoint::missing(KeypointIndex::ALL[i]));
        Self::new(bbox, confidence, keypoints, frame_width, frame_height)
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    pub fn set(&mut self, keypoint: Keypoint) {
        self.keypoints[keypoint.joint as usize] = keypoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_index_count() {
        assert_eq!(KeypointIndex::COUNT, 17);
        for (i, k) in KeypointIndex::ALL.iter().enumerate() {
            assert_eq!(*k as usize, i);
        }
    }

    #[test]
    fn test_keypoint_index_from_index() {
        assert_eq!(KeypointIndex::from_index(0), Some(KeypointIndex::Nose));
        assert_eq!(KeypointIndex::from_index(16), Some(KeypointIndex::RightAnkle));
        assert_eq!(KeypointIndex::from_index(17), None);
    }

    #[test]
    fn test_keypoint_index_names() {
        assert_eq!(KeypointIndex::LeftEar.name(), "left_ear");
        assert_eq!(KeypointIndex::from_name("right_knee"), Some(KeypointIndex::RightKnee));
        assert_eq!(KeypointIndex::from_name("tail"), None);
    }

    #[test]
    fn test_keypoint_is_valid() {
        let kp = Keypoint::new(KeypointIndex::Nose, 0.5, 0.5, 0.7);
        assert!(kp.is_valid(0.5));
        assert!(!kp.is_valid(0.8));
        assert!(!kp.is_origin());
        assert!(Keypoint::missing(KeypointIndex::Nose).is_origin());
    }

    #[test]
    fn test_bbox_from_center() {
        let b = BBox::from_center(100.0, 50.0, 40.0, 20.0);
        assert_eq!(b, BBox::new(80.0, 40.0, 120.0, 60.0));
        assert_eq!(b.center(), (100.0, 50.0));
        assert_eq!(b.area(), 800.0);
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
        // 辺で接するだけなら0
        let c = BBox::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        // inter = 50, union = 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
        assert!((a.iou(&b) - b.iou(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_detection_get_and_set() {
        let mut det = Detection::empty(BBox::new(0.0, 0.0, 1.0, 1.0), 0.9, 640, 480);
        det.set(Keypoint::new(KeypointIndex::Nose, 0.5, 0.3, 0.9));
        let nose = det.get(KeypointIndex::Nose);
        assert_eq!(nose.x, 0.5);
        assert_eq!(nose.confidence, 0.9);
        assert!(det.get(KeypointIndex::LeftEye).is_origin());
    }

    #[test]
    fn test_keypoint_is_finite() {
        assert!(Keypoint::new(KeypointIndex::Nose, 1.0, 2.0, 0.5).is_finite());
        assert!(!Keypoint::new(KeypointIndex::Nose, f32::NAN, 2.0, 0.5).is_finite());
        assert!(!Keypoint::new(KeypointIndex::Nose, 1.0, 2.0, f32::INFINITY).is_finite());
    }
}
