use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::posture::{Axis, PostureAngles};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub stabilizer: StabilizerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// 候補スロットを採用する最低信頼度
    #[serde(default = "default_detection_threshold")]
    pub confidence_threshold: f32,
    /// NMSのIoU閾値
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    /// モデル入力の一辺（正方形）
    #[serde(default = "default_model_input_size")]
    pub model_input_size: u32,
}

fn default_detection_threshold() -> f32 { 0.3 }
fn default_iou_threshold() -> f32 { 0.5 }
fn default_model_input_size() -> u32 { 640 }

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_detection_threshold(),
            iou_threshold: default_iou_threshold(),
            model_input_size: default_model_input_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmoothingConfig {
    /// EMA係数 (1.0 = 平滑化なし)
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    /// これ未満の関節は欠損扱い
    #[serde(default = "default_smoothing_min_confidence")]
    pub min_confidence: f32,
    /// BBox対角線で正規化した中心移動量がこれを超えたら全リセット
    #[serde(default = "default_jump_threshold")]
    pub jump_threshold: f32,
}

fn default_alpha() -> f32 { 0.4 }
fn default_smoothing_min_confidence() -> f32 { 0.2 }
fn default_jump_threshold() -> f32 { 1.25 }

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            min_confidence: default_smoothing_min_confidence(),
            jump_threshold: default_jump_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// 必須5点（耳・肩・腰・膝・足首）の最低信頼度
    #[serde(default = "default_analysis_threshold")]
    pub confidence_threshold: f32,
}

fn default_analysis_threshold() -> f32 { 0.75 }

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_analysis_threshold(),
        }
    }
}

/// 軸ごとの値 (neck / back / legs)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisValues {
    pub neck: f64,
    pub back: f64,
    pub legs: f64,
}

impl AxisValues {
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
}

/// データセット由来の角度の下限・上限
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AngleLimits {
    pub neck: [f64; 2],
    pub back: [f64; 2],
    pub legs: [f64; 2],
}

impl AngleLimits {
    pub fn get(&self, axis: Axis) -> (f64, f64) {
        let [min, max] = match axis {
            Axis::Neck => self.neck,
            Axis::Back => self.back,
            Axis::Legs => self.legs,
        };
        (min, max)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// キャリブレーション前の理想角度
    #[serde(default = "default_ideal")]
    pub ideal: AxisValues,
    #[serde(default = "default_tolerance")]
    pub tolerance: AxisValues,
    #[serde(default = "default_weights")]
    pub weights: AxisValues,
    #[serde(default = "default_limits")]
    pub limits: AngleLimits,
}

fn default_ideal() -> AxisValues { AxisValues::new(165.0, 175.0, 170.0) }
fn default_tolerance() -> AxisValues { AxisValues::new(8.0, 8.0, 8.0) }
fn default_weights() -> AxisValues { AxisValues::new(1.0, 1.5, 0.5) }
fn default_limits() -> AngleLimits {
    AngleLimits {
        neck: [125.19, 178.45],
        back: [59.70, 145.25],
        legs: [86.13, 164.73],
    }
}

impl ScoringConfig {
    pub fn default_ideal_angles(&self) -> PostureAngles {
        PostureAngles::new(self.ideal.neck, self.ideal.back, self.ideal.legs)
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ideal: default_ideal(),
            tolerance: default_tolerance(),
            weights: default_weights(),
            limits: default_limits(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StabilizerConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// 類似ラベルへの切り替え候補に掛ける割引率
    #[serde(default = "default_similar_discount")]
    pub similar_discount: f32,
    /// 切り替えに必要な、総重みに対する1位と2位の差
    #[serde(default = "default_min_margin")]
    pub min_margin: f32,
    /// 類似ラベル間の切り替えに必要な差
    #[serde(default = "default_similar_margin")]
    pub similar_margin: f32,
}

fn default_window_size() -> usize { 7 }
fn default_similar_discount() -> f32 { 0.75 }
fn default_min_margin() -> f32 { 0.2 }
fn default_similar_margin() -> f32 { 0.35 }

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            similar_discount: default_similar_discount(),
            min_margin: default_min_margin(),
            similar_margin: default_similar_margin(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierMode {
    #[default]
    RuleBased,
    Personalized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// フレーム間の最小間隔（ミリ秒）
    #[serde(default = "default_min_frame_interval_ms")]
    pub min_frame_interval_ms: u64,
    #[serde(default)]
    pub classifier: ClassifierMode,
}

fn default_min_frame_interval_ms() -> u64 { 25 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_frame_interval_ms: default_min_frame_interval_ms(),
            classifier: ClassifierMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictorConfig {
    #[serde(default = "default_predictor_addr")]
    pub addr: String,
    #[serde(default = "default_predictor_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_predictor_addr() -> String { "127.0.0.1:9100".to_string() }
fn default_predictor_timeout_ms() -> u64 { 250 }

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            addr: default_predictor_addr(),
            timeout_ms: default_predictor_timeout_ms(),
        }
    }
}

fn check_unit(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange { field, min: 0.0, max: 1.0, value });
    }
    Ok(())
}

fn check_non_negative(field: &'static str, values: &AxisValues) -> Result<(), ConfigError> {
    for axis in Axis::ALL {
        let value = values.get(axis);
        if !(value >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field,
                min: 0.0,
                max: f32::MAX,
                value: value as f32,
            });
        }
    }
    Ok(())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// 読み込みに失敗したらデフォルト設定で続行する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.as_ref().display(), "using default config: {e:#}");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("detection.confidence_threshold", self.detection.confidence_threshold)?;
        check_unit("detection.iou_threshold", self.detection.iou_threshold)?;
        if self.detection.model_input_size == 0 {
            return Err(ConfigError::Zero("detection.model_input_size"));
        }

        let alpha = self.smoothing.alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "smoothing.alpha",
                min: 0.0,
                max: 1.0,
                value: alpha,
            });
        }
        check_unit("smoothing.min_confidence", self.smoothing.min_confidence)?;
        if !(self.smoothing.jump_threshold > 0.0) {
            return Err(ConfigError::Zero("smoothing.jump_threshold"));
        }

        check_unit("analysis.confidence_threshold", self.analysis.confidence_threshold)?;

        check_non_negative("scoring.tolerance", &self.scoring.tolerance)?;
        check_non_negative("scoring.weights", &self.scoring.weights)?;

        let stabilizer = &self.stabilizer;
        if stabilizer.window_size == 0 {
            return Err(ConfigError::Zero("stabilizer.window_size"));
        }
        check_unit("stabilizer.similar_discount", stabilizer.similar_discount)?;
        check_unit("stabilizer.min_margin", stabilizer.min_margin)?;
        check_unit("stabilizer.similar_margin", stabilizer.similar_margin)?;
        if stabilizer.min_margin > stabilizer.similar_margin {
            return Err(ConfigError::MarginOrder {
                min: stabilizer.min_margin,
                similar: stabilizer.similar_margin,
            });
        }
        Ok(())
    }
}
