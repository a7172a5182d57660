use std::fmt;
use std::sync::{Mutex, MutexGuard};

use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    Cpu,
    Gpu,
    Npu,
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionProvider::Cpu => "cpu",
            ExecutionProvider::Gpu => "gpu",
            ExecutionProvider::Npu => "npu",
        })
    }
}

/// 前処理済み画像テンソルから生の `[1, 56, N]` 出力を得る推論器
pub trait InferenceEngine: Send {
    fn provider(&self) -> ExecutionProvider;
    fn infer(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>, EngineError>;
}

/// 指定プロバイダでセッションを開く
pub trait EngineFactory: Send + Sync {
    fn open(&self, provider: ExecutionProvider) -> Result<Box<dyn InferenceEngine>, EngineError>;
}

/// 推論とプロバイダ切り替えを同じロックで直列化するスロット
///
/// 切り替えに失敗したときは CPU で開き直す。CPU も開けなければ空になり、
/// 以降の `infer` は `EngineError::Unavailable` を返す。
pub struct EngineSlot {
    factory: Box<dyn EngineFactory>,
    engine: Mutex<Option<Box<dyn InferenceEngine>>>,
}

impl EngineSlot {
    pub fn open<F: EngineFactory + 'static>(factory: F, provider: ExecutionProvider) -> Self {
        let slot = Self {
            factory: Box::new(factory),
            engine: Mutex::new(None),
        };
        let engine = slot.open_with_fallback(provider);
        *slot.lock() = engine;
        slot
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn InferenceEngine>>> {
        match self.engine.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn open_with_fallback(&self, provider: ExecutionProvider) -> Option<Box<dyn InferenceEngine>> {
        match self.factory.open(provider) {
            Ok(engine) => {
                info!(%provider, "inference session opened");
                Some(engine)
            }
            Err(e) if provider != ExecutionProvider::Cpu => {
                warn!(%provider, "failed to open session, falling back to cpu: {e}");
                match self.factory.open(ExecutionProvider::Cpu) {
                    Ok(engine) => Some(engine),
                    Err(e) => {
                        warn!("cpu fallback failed: {e}");
                        None
                    }
                }
            }
            Err(e) => {
                warn!("failed to open cpu session: {e}");
                None
            }
        }
    }

    /// 現在のプロバイダ（セッションがなければ None）
    pub fn provider(&self) -> Option<ExecutionProvider> {
        self.lock().as_ref().map(|e| e.provider())
    }

    pub fn infer(&self, input: Array4<f32>) -> Result<ArrayD<f32>, EngineError> {
        let mut guard = self.lock();
        let engine = guard.as_mut().ok_or(EngineError::Unavailable)?;
        engine.infer(input)
    }

    /// 古いセッションを閉じて新しいプロバイダで開き直す
    ///
    /// 実際に有効になったプロバイダを返す。
    pub fn switch_provider(&self, provider: ExecutionProvider) -> Result<ExecutionProvider, EngineError> {
        let mut guard = self.lock();
        *guard = None;
        *guard = self.open_with_fallback(provider);
        match guard.as_ref() {
            Some(engine) => Ok(engine.provider()),
            None => Err(EngineError::Unavailable),
        }
    }
}
