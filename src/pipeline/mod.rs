//! フレームごとの処理: デコード → NMS → 平滑化 → 角度 → 判定 → 安定化

pub mod gate;
pub mod mailbox;
pub mod worker;

use std::sync::Arc;

use ndarray::ArrayViewD;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::error::DecodeError;
use crate::pose::{non_max_suppression, Detection, PoseDecoder};
use crate::posture::{
    AngleAnalysis, AngleAnalyzer, CalibrationProfile, CalibrationStore, ModelLabel, PostureAngles,
    PostureClassifier, PostureLabel, PostureResult, PostureScorer,
};
use crate::tracker::{LabelStabilizer, SmootherBank};

pub use gate::{FrameGate, FrameTicket, Rejected};
pub use mailbox::FrameSlot;
pub use worker::{PipelineWorker, RawFrame};

/// 描画側に渡す1フレーム分のスナップショット
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameOutput {
    /// 平滑化済み。信頼度の降順
    pub detections: Vec<Detection>,
    pub result: PostureResult,
}

pub struct PosturePipeline {
    decoder: PoseDecoder,
    iou_threshold: f32,
    smoother: SmootherBank,
    analyzer: AngleAnalyzer,
    scorer: PostureScorer,
    classifier: PostureClassifier,
    calibration: Arc<CalibrationStore>,
    labels: LabelStabilizer<PostureLabel>,
    model_labels: LabelStabilizer<ModelLabel>,
    last_angles: Option<PostureAngles>,
}

impl PosturePipeline {
    pub fn new(config: &Config, classifier: PostureClassifier, calibration: Arc<CalibrationStore>) -> Self {
        Self {
            decoder: PoseDecoder::from_config(&config.detection),
            iou_threshold: config.detection.iou_threshold,
            smoother: SmootherBank::new(config.smoothing.clone()),
            analyzer: AngleAnalyzer::from_config(&config.analysis),
            scorer: PostureScorer::new(config.scoring.clone()),
            classifier,
            calibration,
            labels: LabelStabilizer::from_config(&config.stabilizer),
            model_labels: LabelStabilizer::from_config(&config.stabilizer),
            last_angles: None,
        }
    }

    /// 設定の分類モードで分類器を作る
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let classifier = PostureClassifier::from_config(config)?;
        let calibration = Arc::new(CalibrationStore::new(config.scoring.clone()));
        Ok(Self::new(config, classifier, calibration))
    }

    pub fn calibration(&self) -> Arc<CalibrationStore> {
        Arc::clone(&self.calibration)
    }

    pub fn classifier(&self) -> &PostureClassifier {
        &self.classifier
    }

    /// 推論出力テンソル1フレーム分を処理
    pub fn process(
        &mut self,
        output: ArrayViewD<'_, f32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<FrameOutput, DecodeError> {
        let detections = self.decoder.decode(output, frame_width, frame_height)?;
        Ok(self.process_detections(detections))
    }

    /// デコード済みの検出から処理
    pub fn process_detections(&mut self, detections: Vec<Detection>) -> FrameOutput {
        let detections = non_max_suppression(detections, self.iou_threshold);
        if detections.is_empty() {
            self.reset();
            return FrameOutput {
                detections,
                result: PostureResult::no_person(),
            };
        }

        let detections = self.smoother.smooth_all(&detections);
        let result = match self.analyzer.analyze(&detections[0]) {
            AngleAnalysis::LowConfidence { min_confidence, .. } => {
                self.reset();
                PostureResult::low_confidence(min_confidence)
            }
            AngleAnalysis::Incomplete { missing, .. } => {
                debug!(missing = missing.name(), "required keypoint missing");
                let confidence = detections[0].confidence;
                self.reset();
                PostureResult::incomplete(confidence)
            }
            AngleAnalysis::Measured {
                side,
                angles,
                min_confidence,
            } => {
                debug!(?side, neck = angles.neck, back = angles.back, legs = angles.legs, "measured angles");
                self.last_angles = Some(angles);
                self.classify(angles, min_confidence)
            }
        };

        FrameOutput { detections, result }
    }

    fn classify(&mut self, angles: PostureAngles, confidence: f32) -> PostureResult {
        let profile = self.calibration.snapshot();
        let raw = self.classifier.classify(&self.scorer, angles, confidence, &profile);

        let stable = self.labels.update(raw.label, raw.confidence).unwrap_or(raw.label);
        let mut result = raw.relabeled(stable);
        if let Some(ml) = raw.ml_label {
            result.ml_label = self.model_labels.update(ml, raw.confidence);
        }
        result
    }

    /// 直近に測った角度を理想として登録。人物がいなければ何もしない
    pub fn calibrate_from_current(&self) -> Option<Arc<CalibrationProfile>> {
        let angles = self.last_angles?;
        Some(self.calibration.calibrate_angles(&angles))
    }

    /// 平滑化と安定化の状態を捨てる
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.labels.reset();
        self.model_labels.reset();
        self.last_angles = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmoothingConfig;
    use crate::pose::{KeypointIndex, POSE_CHANNELS};
    use crate::posture::angles::tests::side_points;
    use crate::posture::{AxisStatus, Side};
    use crate::predictor::{PersonalizedPredictor, Prediction};
    use crate::error::PredictorError;
    use ndarray::Array2;

    /// 片側5点を持つ1人分の生出力 `[56, 2]`（2列目は空）
    fn frame(side: Side, angles: PostureAngles, confidences: [f32; 5]) -> Array2<f32> {
        let mut t = Array2::<f32>::zeros((POSE_CHANNELS, 2));
        t[[0, 0]] = 320.0;
        t[[1, 0]] = 320.0;
        t[[2, 0]] = 500.0;
        t[[3, 0]] = 500.0;
        t[[4, 0]] = 0.9;
        for ((joint, (x, y)), conf) in side.joints().all().into_iter().zip(side_points(angles)).zip(confidences) {
            let base = 5 + joint as usize * 3;
            t[[base, 0]] = x as f32;
            t[[base + 1, 0]] = y as f32;
            t[[base + 2, 0]] = conf;
        }
        t
    }

    fn pipeline(config: &Config) -> PosturePipeline {
        let calibration = Arc::new(CalibrationStore::new(config.scoring.clone()));
        PosturePipeline::new(config, PostureClassifier::RuleBased, calibration)
    }

    fn run(p: &mut PosturePipeline, t: &Array2<f32>) -> FrameOutput {
        p.process(t.view().into_dyn(), 640, 640).unwrap()
    }

    const ALIGNED: PostureAngles = PostureAngles::new(166.0, 174.0, 169.0);
    const SLOUCHED: PostureAngles = PostureAngles::new(166.0, 150.0, 169.0);

    #[test]
    fn test_aligned_scenario() {
        let mut p = pipeline(&Config::default());
        let out = run(&mut p, &frame(Side::Right, ALIGNED, [0.9; 5]));
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.result.label, PostureLabel::Aligned);
        assert!(out.result.score >= 95);
        assert!(out.result.suggestions.is_empty());
        let angles = out.result.angles.unwrap();
        assert!((angles.back - 174.0).abs() < 0.01);
    }

    #[test]
    fn test_back_misalignment_scenario() {
        let mut p = pipeline(&Config::default());
        let out = run(&mut p, &frame(Side::Right, SLOUCHED, [0.9; 5]));
        assert_eq!(out.result.label, PostureLabel::BackMisalignment);
        assert!(out.result.suggestions.iter().any(|s| s.contains("slouching")));
    }

    #[test]
    fn test_low_confidence_scenario() {
        let mut p = pipeline(&Config::default());
        let out = run(&mut p, &frame(Side::Right, ALIGNED, [0.9, 0.9, 0.4, 0.9, 0.9]));
        assert_eq!(out.result.label, PostureLabel::LowConfidence);
        assert_eq!(out.result.score, 0);
        assert!(out.result.angles.is_none());
        assert!((out.result.confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_incomplete_scenario() {
        let mut p = pipeline(&Config::default());
        let mut t = frame(Side::Left, ALIGNED, [0.9; 5]);
        let base = 5 + KeypointIndex::LeftAnkle as usize * 3;
        t[[base, 0]] = 0.0;
        t[[base + 1, 0]] = 0.0;
        let out = run(&mut p, &t);
        assert_eq!(out.result.label, PostureLabel::Incomplete);
        assert_eq!(out.result.score, 0);
    }

    #[test]
    fn test_no_person() {
        let mut p = pipeline(&Config::default());
        let empty = Array2::<f32>::zeros((POSE_CHANNELS, 8));
        let out = run(&mut p, &empty);
        assert!(out.detections.is_empty());
        assert_eq!(out.result.label, PostureLabel::NoPerson);
        assert!(p.calibrate_from_current().is_none());
    }

    #[test]
    fn test_nan_keypoint_frame_recovers() {
        let mut p = pipeline(&Config::default());
        let mut bad = frame(Side::Right, ALIGNED, [0.9; 5]);
        bad[[5 + KeypointIndex::RightEar as usize * 3, 0]] = f32::NAN;
        let out = run(&mut p, &bad);
        assert!(!out.result.has_posture());
        assert!(out.result.angles.is_none());

        let clean = frame(Side::Right, ALIGNED, [0.9; 5]);
        for _ in 0..3 {
            let out = run(&mut p, &clean);
            assert_eq!(out.result.label, PostureLabel::Aligned);
            assert!(out.result.score >= 95);
            let angles = out.result.angles.unwrap();
            assert!(angles.neck.is_finite() && (angles.neck - 166.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_malformed_tensor_is_error() {
        let mut p = pipeline(&Config::default());
        let bad = Array2::<f32>::zeros((17, 8));
        assert!(p.process(bad.view().into_dyn(), 640, 640).is_err());
    }

    #[test]
    fn test_stabilizer_holds_then_resets_on_lost_person() {
        let aligned = frame(Side::Right, ALIGNED, [0.9; 5]);
        // 平滑化なしで、類似ラベルへの単発の揺れが抑えられることを見る
        let mut config = Config::default();
        config.smoothing = SmoothingConfig { alpha: 1.0, ..SmoothingConfig::default() };
        let mut raw = pipeline(&config);
        for _ in 0..7 {
            run(&mut raw, &aligned);
        }
        let out = run(&mut raw, &frame(Side::Right, SLOUCHED, [0.9; 5]));
        assert_eq!(out.result.label, PostureLabel::Aligned);
        // 確定ラベルと食い違う提案は出さない
        assert!(out.result.suggestions.is_empty());
        assert_eq!(out.result.details[1].status, AxisStatus::TooLow);

        // 人物を見失うと状態が消え、次の判定がそのまま出る
        let empty = Array2::<f32>::zeros((POSE_CHANNELS, 1));
        assert_eq!(run(&mut raw, &empty).result.label, PostureLabel::NoPerson);
        let out = run(&mut raw, &frame(Side::Right, SLOUCHED, [0.9; 5]));
        assert_eq!(out.result.label, PostureLabel::BackMisalignment);
    }

    #[test]
    fn test_calibrate_from_current() {
        let mut p = pipeline(&Config::default());
        let odd = PostureAngles::new(150.0, 130.0, 120.0);
        let t = frame(Side::Right, odd, [0.9; 5]);
        let before = run(&mut p, &t);
        assert!(before.result.score < 100);

        let profile = p.calibrate_from_current().unwrap();
        assert!((profile.ideal().back - 130.0).abs() < 0.01);
        let after = run(&mut p, &t);
        assert_eq!(after.result.score, 100);
        assert_eq!(after.result.label, PostureLabel::Aligned);
        assert_eq!(p.calibration().get_calibration().0, profile.ideal().neck);
    }

    struct Remote;

    impl PersonalizedPredictor for Remote {
        fn predict(&mut self, _angles: &PostureAngles) -> Result<Prediction, PredictorError> {
            Ok(Prediction {
                ml_label: "hunchback".to_string(),
                manual_label: "Back Misalignment".to_string(),
                score: 70,
                suggestions: vec!["FIX: You are slouching. Sit up straight and engage your core.".to_string()],
            })
        }
    }

    #[test]
    fn test_personalized_labels_are_stabilized() {
        let config = Config::default();
        let calibration = Arc::new(CalibrationStore::new(config.scoring.clone()));
        let mut p = PosturePipeline::new(&config, PostureClassifier::personalized(Remote), calibration);
        let out = run(&mut p, &frame(Side::Right, SLOUCHED, [0.9; 5]));
        assert_eq!(out.result.label, PostureLabel::BackMisalignment);
        assert_eq!(out.result.ml_label, Some(ModelLabel::Hunchback));
        assert_eq!(out.result.score, 70);
    }
}
