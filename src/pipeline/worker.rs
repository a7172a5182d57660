use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ndarray::ArrayD;
use tracing::{debug, warn};

use super::gate::{FrameGate, FrameTicket, Rejected};
use super::mailbox::FrameSlot;
use super::{FrameOutput, PosturePipeline};

/// 推論エンジンの生出力と元フレームのサイズ
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub output: ArrayD<f32>,
    pub width: u32,
    pub height: u32,
}

/// 別スレッドでパイプラインを回し、最新の結果を提供する
///
/// 処理中に届いたフレームは `submit` の時点で捨てる。
pub struct PipelineWorker {
    gate: Arc<FrameGate>,
    slot: Arc<FrameSlot<(RawFrame, FrameTicket)>>,
    latest: Arc<Mutex<Option<FrameOutput>>>,
    handle: Option<thread::JoinHandle<PosturePipeline>>,
}

impl PipelineWorker {
    pub fn spawn(mut pipeline: PosturePipeline, min_interval: Duration) -> Self {
        let gate = Arc::new(FrameGate::new(min_interval));
        let slot = Arc::new(FrameSlot::<(RawFrame, FrameTicket)>::new());
        let latest = Arc::new(Mutex::new(None::<FrameOutput>));

        let slot_ref = Arc::clone(&slot);
        let latest_ref = Arc::clone(&latest);
        let handle = thread::spawn(move || {
            while let Some((frame, ticket)) = slot_ref.recv() {
                match pipeline.process(frame.output.view(), frame.width, frame.height) {
                    Ok(output) => {
                        let mut guard = match latest_ref.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        *guard = Some(output);
                    }
                    Err(e) => warn!("frame rejected: {e}"),
                }
                drop(ticket);
            }
            pipeline
        });

        Self {
            gate,
            slot,
            latest,
            handle: Some(handle),
        }
    }

    /// フレームを渡す。処理中または間隔不足なら捨てる
    pub fn submit(&self, frame: RawFrame) -> Result<(), Rejected> {
        let ticket = self.gate.try_enter()?;
        if self.slot.put((frame, ticket)).is_some() {
            debug!("pending frame replaced");
        }
        Ok(())
    }

    /// 最新の処理結果（まだなければ None）
    pub fn latest(&self) -> Option<FrameOutput> {
        let guard = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.gate.dropped()
    }

    /// 処理スレッドを止めてパイプラインを返す
    pub fn shutdown(mut self) -> Option<PosturePipeline> {
        self.slot.close();
        self.handle.take().and_then(|h| h.join().ok())
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.slot.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pose::POSE_CHANNELS;
    use crate::posture::{CalibrationStore, PostureClassifier, PostureLabel};
    use std::time::Instant;

    fn worker(min_interval: Duration) -> PipelineWorker {
        let config = Config::default();
        let calibration = Arc::new(CalibrationStore::new(config.scoring.clone()));
        let pipeline = PosturePipeline::new(&config, PostureClassifier::RuleBased, calibration);
        PipelineWorker::spawn(pipeline, min_interval)
    }

    fn empty_frame() -> RawFrame {
        RawFrame {
            output: ArrayD::zeros(vec![POSE_CHANNELS, 4]),
            width: 640,
            height: 480,
        }
    }

    fn wait_for_output(w: &PipelineWorker) -> FrameOutput {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(out) = w.latest() {
                return out;
            }
            assert!(Instant::now() < deadline, "no output");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_processes_submitted_frame() {
        let w = worker(Duration::ZERO);
        w.submit(empty_frame()).unwrap();
        let out = wait_for_output(&w);
        assert_eq!(out.result.label, PostureLabel::NoPerson);
        assert!(w.shutdown().is_some());
    }

    #[test]
    fn test_min_interval_drops_frames() {
        let w = worker(Duration::from_secs(60));
        w.submit(empty_frame()).unwrap();
        wait_for_output(&w);
        assert!(w.submit(empty_frame()).is_err());
        assert_eq!(w.dropped_frames(), 1);
    }
}
