//! Personalized predictor boundary.
//!
//! The pipeline sends the three joint angles and receives a model label, a
//! rule label, a score and suggestions. The remote side speaks the
//! `protocol` framing; `serve` is the matching server that answers with the
//! rule-based scorer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::PredictorConfig;
use crate::error::PredictorError;
use crate::posture::{Axis, AxisStatus, CalibrationStore, ModelLabel, PostureAngles, PostureScorer};
use crate::protocol::{self, MessageStream, PredictorRequest, PredictorResponse};

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub ml_label: String,
    pub manual_label: String,
    pub score: i32,
    pub suggestions: Vec<String>,
}

/// Synchronous request/response keyed by neck/back/legs angles
pub trait PersonalizedPredictor: Send {
    fn predict(&mut self, angles: &PostureAngles) -> Result<Prediction, PredictorError>;
}

/// TCP client for a predictor process
///
/// 呼び出しは内部の runtime で `block_on` するため、tokio の
/// runtime 上からは使えない（`PredictorError::NestedRuntime` を返す）。
/// 非同期側からは `spawn_blocking` か専用スレッドで呼ぶこと。
pub struct RemotePredictor {
    addr: String,
    timeout: Duration,
    runtime: tokio::runtime::Runtime,
    stream: Option<MessageStream>,
}

impl RemotePredictor {
    pub fn new(config: &PredictorConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build predictor runtime")?;
        Ok(Self {
            addr: config.addr.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            runtime,
            stream: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn round_trip(
        addr: &str,
        slot: &mut Option<MessageStream>,
        request: &PredictorRequest,
    ) -> anyhow::Result<PredictorResponse> {
        if slot.is_none() {
            let socket = TcpStream::connect(addr)
                .await
                .with_context(|| format!("failed to connect to predictor at {addr}"))?;
            socket.set_nodelay(true)?;
            info!(addr, "connected to predictor");
            *slot = Some(protocol::message_stream(socket));
        }
        let stream = slot.as_mut().ok_or_else(|| anyhow::anyhow!("predictor stream missing"))?;
        protocol::send_message(stream, request).await?;
        protocol::recv_message(stream).await
    }

    fn request(&mut self, request: PredictorRequest) -> Result<PredictorResponse, PredictorError> {
        // runtime 内での block_on は panic する
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(PredictorError::NestedRuntime);
        }
        let Self { addr, timeout, runtime, stream } = self;
        let result = runtime.block_on(async {
            tokio::time::timeout(*timeout, Self::round_trip(addr.as_str(), stream, &request)).await
        });
        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                // 次回は再接続
                *stream = None;
                Err(PredictorError::Transport(e))
            }
            Err(_) => {
                *stream = None;
                Err(PredictorError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    pub fn ping(&mut self) -> Result<(), PredictorError> {
        match self.request(PredictorRequest::Ping)? {
            PredictorResponse::Pong => Ok(()),
            other => Err(PredictorError::NoResult(format!("unexpected reply to ping: {other:?}"))),
        }
    }
}

impl PersonalizedPredictor for RemotePredictor {
    fn predict(&mut self, angles: &PostureAngles) -> Result<Prediction, PredictorError> {
        let request = PredictorRequest::Predict {
            neck: angles.neck,
            back: angles.back,
            legs: angles.legs,
        };
        match self.request(request)? {
            PredictorResponse::Prediction {
                ml_label,
                manual_label,
                score,
                suggestions,
            } => Ok(Prediction {
                ml_label,
                manual_label,
                score,
                suggestions,
            }),
            PredictorResponse::NoResult { reason } => Err(PredictorError::NoResult(reason)),
            PredictorResponse::Pong => Err(PredictorError::NoResult("unexpected pong".to_string())),
        }
    }
}

/// ルール判定からモデル空間のラベルを近似する
pub fn model_label_for(scorer: &PostureScorer, angles: &PostureAngles, store: &CalibrationStore) -> ModelLabel {
    let profile = store.snapshot();
    let status = |axis| scorer.axis_status(axis, angles.get(axis), &profile);
    match (status(Axis::Back), status(Axis::Neck)) {
        (AxisStatus::TooLow, _) => ModelLabel::Hunchback,
        (AxisStatus::TooHigh, _) | (_, AxisStatus::TooHigh) => ModelLabel::Recline,
        (_, AxisStatus::TooLow) => {
            let floor = profile.ideal().neck - 2.0 * scorer.config().tolerance.neck;
            if angles.neck < floor {
                ModelLabel::NeckDown
            } else {
                ModelLabel::NeckBent
            }
        }
        _ => ModelLabel::Straight,
    }
}

/// 学習済みモデルを持たない環境向けの予測器
pub struct RuleBasedPredictor {
    scorer: PostureScorer,
    store: Arc<CalibrationStore>,
}

impl RuleBasedPredictor {
    pub fn new(scorer: PostureScorer, store: Arc<CalibrationStore>) -> Self {
        Self { scorer, store }
    }

    pub fn evaluate(&self, angles: &PostureAngles) -> Result<Prediction, PredictorError> {
        if Axis::ALL.iter().any(|&axis| !angles.get(axis).is_finite()) {
            return Err(PredictorError::NoResult("non-finite angle".to_string()));
        }
        let result = self.scorer.evaluate(*angles, 1.0, &self.store.snapshot());
        Ok(Prediction {
            ml_label: model_label_for(&self.scorer, angles, &self.store).to_string(),
            manual_label: result.message,
            score: result.score as i32,
            suggestions: result.suggestions,
        })
    }

    fn respond(&self, request: PredictorRequest) -> PredictorResponse {
        match request {
            PredictorRequest::Ping => PredictorResponse::Pong,
            PredictorRequest::Predict { neck, back, legs } => {
                match self.evaluate(&PostureAngles::new(neck, back, legs)) {
                    Ok(p) => PredictorResponse::Prediction {
                        ml_label: p.ml_label,
                        manual_label: p.manual_label,
                        score: p.score,
                        suggestions: p.suggestions,
                    },
                    Err(e) => PredictorResponse::NoResult { reason: e.to_string() },
                }
            }
        }
    }
}

impl PersonalizedPredictor for RuleBasedPredictor {
    fn predict(&mut self, angles: &PostureAngles) -> Result<Prediction, PredictorError> {
        self.evaluate(angles)
    }
}

async fn handle_connection(socket: TcpStream, predictor: Arc<RuleBasedPredictor>) -> anyhow::Result<()> {
    let mut stream = protocol::message_stream(socket);
    loop {
        let request: PredictorRequest = match protocol::recv_message(&mut stream).await {
            Ok(req) => req,
            // 切断
            Err(_) => return Ok(()),
        };
        debug!(?request, "predictor request");
        let response = predictor.respond(request);
        protocol::send_message(&mut stream, &response).await?;
    }
}

/// 接続ごとにタスクを立てて予測要求に応答し続ける
pub async fn serve(listener: TcpListener, predictor: Arc<RuleBasedPredictor>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "predictor listening");
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        info!(%peer, "predictor client connected");
        let predictor = Arc::clone(&predictor);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, predictor).await {
                warn!(%peer, "predictor connection error: {e:#}");
            }
        });
    }
}
