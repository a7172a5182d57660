pub mod decode;
#[cfg(feature = "onnx")]
pub mod detector;
pub mod engine;
pub mod keypoint;
pub mod nms;
pub mod payload;

pub use decode::{PoseDecoder, POSE_CHANNELS};
#[cfg(feature = "onnx")]
pub use detector::{OnnxEngineFactory, OnnxPoseEngine};
pub use engine::{EngineFactory, EngineSlot, ExecutionProvider, InferenceEngine};
pub use keypoint::{BBox, Detection, Keypoint, KeypointIndex};
pub use nms::non_max_suppression;
pub use payload::{angles_from_payload, detection_from_payload};
