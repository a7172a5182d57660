//! Replays JSON keypoint dumps (one payload per line) through the posture
//! pipeline and prints one JSON result per frame on stdout.
//!
//! Usage: posture_replay <dump.jsonl> [--config posture.toml] [--width W] [--height H] [--calibrate]

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use posture_tracker::config::Config;
use posture_tracker::pipeline::PosturePipeline;
use posture_tracker::pose::detection_from_payload;

const DEFAULT_CONFIG_PATH: &str = "posture.toml";

struct Args {
    input: String,
    config: String,
    width: u32,
    height: u32,
    /// 最初に測れたフレームを理想姿勢にする
    calibrate: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut input = None;
    let mut config = DEFAULT_CONFIG_PATH.to_string();
    let mut width = 640;
    let mut height = 480;
    let mut calibrate = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = args.next().context("--config needs a path")?,
            "--width" => width = args.next().context("--width needs a value")?.parse()?,
            "--height" => height = args.next().context("--height needs a value")?.parse()?,
            "--calibrate" => calibrate = true,
            other if other.starts_with("--") => bail!("unknown option {other}"),
            other => input = Some(other.to_string()),
        }
    }

    Ok(Args {
        input: input.context("usage: posture_replay <dump.jsonl> [--config path] [--width W] [--height H] [--calibrate]")?,
        config,
        width,
        height,
        calibrate,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = parse_args()?;
    let config = Config::load_or_default(&args.config);
    info!("posture_replay ({})", env!("GIT_VERSION"));
    info!(classifier = ?config.pipeline.classifier, "config loaded from {}", args.config);

    let mut pipeline = PosturePipeline::from_config(&config)?;
    let reader = BufReader::new(
        File::open(&args.input).with_context(|| format!("failed to open {}", args.input))?,
    );
    let mut out = BufWriter::new(io::stdout().lock());

    let mut calibrated = !args.calibrate;
    let mut frames = 0u64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let payload: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = line_no + 1, "skipping invalid JSON: {e}");
                continue;
            }
        };

        let detections: Vec<_> = detection_from_payload(&payload, args.width, args.height)
            .into_iter()
            .collect();
        let frame = pipeline.process_detections(detections);

        if !calibrated {
            if let Some(profile) = pipeline.calibrate_from_current() {
                let ideal = profile.ideal();
                info!(neck = ideal.neck, back = ideal.back, legs = ideal.legs, "calibrated from frame {}", line_no + 1);
                calibrated = true;
            }
        }

        serde_json::to_writer(&mut out, &frame.result)?;
        out.write_all(b"\n")?;
        frames += 1;
    }
    out.flush()?;

    let (neck, back, legs) = pipeline.calibration().get_calibration();
    info!(frames, neck, back, legs, "replay finished");
    Ok(())
}
