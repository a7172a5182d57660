//! YOLOv8-pose 形式の生出力 `[56, N]` を `Detection` 列に変換する。
//!
//! チャンネル配置: `cx, cy, w, h, score, (kx, ky, kconf) × 17`
//! 座標はモデル入力空間（正方形）からフレームのピクセル空間に戻す。

use ndarray::{ArrayView2, ArrayViewD, Axis as NdAxis, Ix2};
use tracing::{debug, warn};

use super::keypoint::{BBox, Detection, Keypoint, KeypointIndex};
use crate::config::DetectionConfig;
use crate::error::DecodeError;

/// box 4 + score 1 + 17 × 3
pub const POSE_CHANNELS: usize = 4 + 1 + KeypointIndex::COUNT * 3;

const SCORE_CHANNEL: usize = 4;
const KEYPOINT_OFFSET: usize = 5;

pub struct PoseDecoder {
    confidence_threshold: f32,
    model_input_size: u32,
}

impl PoseDecoder {
    pub fn new(confidence_threshold: f32, model_input_size: u32) -> Self {
        Self {
            confidence_threshold,
            model_input_size,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.confidence_threshold, config.model_input_size)
    }

    /// `[56, N]` または `[1, 56, N]` のテンソルをデコード
    pub fn decode(
        &self,
        output: ArrayViewD<'_, f32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<Detection>, DecodeError> {
        let shape = output.shape().to_vec();
        let view = match shape.len() {
            2 => output.into_dimensionality::<Ix2>(),
            3 if shape[0] == 1 => output.index_axis_move(NdAxis(0), 0).into_dimensionality::<Ix2>(),
            rank => return Err(DecodeError::Rank { rank, shape }),
        }
        .map_err(|_| DecodeError::Rank {
            rank: shape.len(),
            shape: shape.clone(),
        })?;
        self.decode_view(view, frame_width, frame_height)
    }

    /// チャンネル優先で並んだフラット配列 (`data[c * N + i]`) をデコード
    pub fn decode_flat(
        &self,
        data: &[f32],
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<Detection>, DecodeError> {
        if data.len() % POSE_CHANNELS != 0 {
            return Err(DecodeError::FlatLength {
                len: data.len(),
                channels: POSE_CHANNELS,
            });
        }
        let n = data.len() / POSE_CHANNELS;
        let view = ArrayView2::from_shape((POSE_CHANNELS, n), data).map_err(|_| {
            DecodeError::FlatLength {
                len: data.len(),
                channels: POSE_CHANNELS,
            }
        })?;
        self.decode_view(view, frame_width, frame_height)
    }

    /// 契約違反はログに残して空の結果を返す
    pub fn decode_or_empty(
        &self,
        output: ArrayViewD<'_, f32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<Detection> {
        match self.decode(output, frame_width, frame_height) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("dropping malformed pose output: {e}");
                Vec::new()
            }
        }
    }

    fn decode_view(
        &self,
        view: ArrayView2<'_, f32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<Detection>, DecodeError> {
        if view.nrows() != POSE_CHANNELS {
            return Err(DecodeError::Channels {
                expected: POSE_CHANNELS,
                actual: view.nrows(),
            });
        }
        if frame_width == 0 || frame_height == 0 {
            return Err(DecodeError::FrameSize {
                width: frame_width,
                height: frame_height,
            });
        }
        if self.model_input_size == 0 {
            return Err(DecodeError::ModelSize(self.model_input_size));
        }

        let scale_x = frame_width as f32 / self.model_input_size as f32;
        let scale_y = frame_height as f32 / self.model_input_size as f32;

        let mut detections = Vec::new();
        for slot in view.columns() {
            let score = slot[SCORE_CHANNEL];
            // NaN もここで落ちる
            if !(score >= self.confidence_threshold) {
                continue;
            }
            let (cx, cy, w, h) = (slot[0], slot[1], slot[2], slot[3]);
            if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
                continue;
            }

            let bbox = BBox::from_center(cx * scale_x, cy * scale_y, w * scale_x, h * scale_y);
            let keypoints = std::array::from_fn(|k| {
                let base = KEYPOINT_OFFSET + k * 3;
                let joint = KeypointIndex::ALL[k];
                let (x, y, conf) = (slot[base], slot[base + 1], slot[base + 2]);
                // 非有限値の点は未検出扱い
                if !(x.is_finite() && y.is_finite() && conf.is_finite()) {
                    return Keypoint::missing(joint);
                }
                Keypoint::new(joint, x * scale_x, y * scale_y, conf)
            });

            detections.push(Detection::new(bbox, score, keypoints, frame_width, frame_height));
        }

        debug!(
            candidates = view.ncols(),
            kept = detections.len(),
            "decoded pose output"
        );
        Ok(detections)
    }
}
