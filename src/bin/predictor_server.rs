//! Predictor server: answers personalized-predictor requests with the
//! rule-based scorer over the length-delimited bincode protocol.
//!
//! Usage: predictor_server [--config posture.toml] [--listen ADDR] [--calibrate NECK BACK LEGS]

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use posture_tracker::config::Config;
use posture_tracker::posture::{CalibrationStore, PostureScorer};
use posture_tracker::predictor::{self, RuleBasedPredictor};

const DEFAULT_CONFIG_PATH: &str = "posture.toml";

fn parse_angle(value: Option<String>) -> Result<f64> {
    value
        .context("--calibrate needs NECK BACK LEGS")?
        .parse()
        .context("invalid angle")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut listen = None;
    let mut ideal = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next().context("--config needs a path")?,
            "--listen" => listen = Some(args.next().context("--listen needs an address")?),
            "--calibrate" => {
                let neck = parse_angle(args.next())?;
                let back = parse_angle(args.next())?;
                let legs = parse_angle(args.next())?;
                ideal = Some((neck, back, legs));
            }
            other => bail!("unknown argument {other}"),
        }
    }

    let config = Config::load_or_default(&config_path);
    info!("predictor_server ({})", env!("GIT_VERSION"));

    let store = Arc::new(CalibrationStore::new(config.scoring.clone()));
    if let Some((neck, back, legs)) = ideal {
        store.calibrate(neck, back, legs);
    }
    let predictor = Arc::new(RuleBasedPredictor::new(
        PostureScorer::new(config.scoring.clone()),
        store,
    ));

    let addr = listen.unwrap_or(config.predictor.addr);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    predictor::serve(listener, predictor).await
}
