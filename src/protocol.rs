//! Predictor link: length-delimited bincode frames over TCP.
//!
//! Self-contained: no imports from other posture_tracker modules.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

// --- Message types ---

/// Pipeline → predictor
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum PredictorRequest {
    /// Joint angles in degrees
    Predict { neck: f64, back: f64, legs: f64 },
    Ping,
}

/// Predictor → pipeline
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum PredictorResponse {
    Prediction {
        ml_label: String,
        manual_label: String,
        score: i32,
        suggestions: Vec<String>,
    },
    /// The predictor could not produce a result (no model loaded, bad input)
    NoResult { reason: String },
    Pong,
}

// --- TCP codec helpers ---

pub type MessageStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Create a framed message stream with length-delimited framing.
pub fn message_stream(stream: TcpStream) -> MessageStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(64 * 1024) // 64KB
        .new_codec();
    Framed::new(stream, codec)
}

/// Send a serializable message (bincode + length prefix).
pub async fn send_message<T: Serialize>(
    stream: &mut MessageStream,
    msg: &T,
) -> anyhow::Result<()> {
    let data = bincode::serialize(msg)?;
    stream.send(Bytes::from(data)).await?;
    Ok(())
}

/// Receive and deserialize a message.
pub async fn recv_message<T: DeserializeOwned>(
    stream: &mut MessageStream,
) -> anyhow::Result<T> {
    match stream.next().await {
        Some(Ok(bytes)) => Ok(bincode::deserialize(&bytes)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(anyhow::anyhow!("connection closed")),
    }
}
