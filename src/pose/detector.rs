use anyhow::{Context, Result};
use ndarray::{Array4, ArrayD};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};

use super::engine::{EngineFactory, ExecutionProvider, InferenceEngine};
use crate::error::EngineError;

/// YOLOv8-pose の入出力名
const INPUT_NAME: &str = "images";
const OUTPUT_NAME: &str = "output0";

fn with_provider(builder: SessionBuilder, provider: ExecutionProvider) -> Result<SessionBuilder> {
    match provider {
        ExecutionProvider::Cpu => Ok(builder),
        #[cfg(feature = "cuda")]
        ExecutionProvider::Gpu => Ok(builder.with_execution_providers([
            ort::execution_providers::CUDAExecutionProvider::default()
                .build()
                .error_on_failure(),
        ])?),
        #[cfg(feature = "npu")]
        ExecutionProvider::Npu => Ok(builder.with_execution_providers([
            ort::execution_providers::QNNExecutionProvider::default()
                .build()
                .error_on_failure(),
        ])?),
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("{other} execution provider is not enabled in this build"),
    }
}

fn build_session(model_path: &Path, provider: ExecutionProvider) -> Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let builder = with_provider(builder, provider)?;
    builder
        .commit_from_file(model_path)
        .context("Failed to load ONNX model")
}

/// ONNX Runtime 上の姿勢推定セッション
pub struct OnnxPoseEngine {
    session: Session,
    provider: ExecutionProvider,
}

impl OnnxPoseEngine {
    pub fn new<P: AsRef<Path>>(model_path: P, provider: ExecutionProvider) -> Result<Self> {
        let session = build_session(model_path.as_ref(), provider)?;
        Ok(Self { session, provider })
    }

    /// 入力: [1, 3, S, S] の f32 テンソル / 出力: [1, 56, N]
    fn run(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![INPUT_NAME => input_tensor])
            .context("Inference failed")?;

        let output: ndarray::ArrayViewD<f32> = outputs[OUTPUT_NAME]
            .try_extract_array()
            .context("Failed to extract output tensor")?;
        Ok(output.to_owned())
    }
}

impl InferenceEngine for OnnxPoseEngine {
    fn provider(&self) -> ExecutionProvider {
        self.provider
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>, EngineError> {
        self.run(input).map_err(|e| EngineError::Inference(format!("{e:#}")))
    }
}

/// モデルファイルからセッションを開くファクトリ
pub struct OnnxEngineFactory {
    model_path: PathBuf,
}

impl OnnxEngineFactory {
    pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
        Self {
            model_path: model_path.into(),
        }
    }
}

impl EngineFactory for OnnxEngineFactory {
    fn open(&self, provider: ExecutionProvider) -> Result<Box<dyn InferenceEngine>, EngineError> {
        OnnxPoseEngine::new(&self.model_path, provider)
            .map(|engine| Box::new(engine) as Box<dyn InferenceEngine>)
            .map_err(|e| EngineError::Open {
                provider: provider.to_string(),
                reason: format!("{e:#}"),
            })
    }
}
