use thiserror::Error;

/// 推論出力テンソルがレイアウト契約に合わない
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("unexpected tensor rank {rank} (shape {shape:?}), expected [56, N] or [1, 56, N]")]
    Rank { rank: usize, shape: Vec<usize> },

    #[error("tensor has {actual} channels, expected {expected}")]
    Channels { expected: usize, actual: usize },

    #[error("flat tensor length {len} is not a multiple of {channels}")]
    FlatLength { len: usize, channels: usize },

    #[error("invalid frame size {width}x{height}")]
    FrameSize { width: u32, height: u32 },

    #[error("invalid model input size {0}")]
    ModelSize(u32),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no inference session is loaded")]
    Unavailable,

    #[error("failed to open {provider} session: {reason}")]
    Open { provider: String, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("predictor request timed out after {0} ms")]
    Timeout(u64),

    #[error("predictor reported no result: {0}")]
    NoResult(String),

    #[error("predictor transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("blocking predictor call from inside an async runtime")]
    NestedRuntime,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: f32,
        max: f32,
        value: f32,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("stabilizer min_margin ({min}) must not exceed similar_margin ({similar})")]
    MarginOrder { min: f32, similar: f32 },
}
