use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// フレームを受け付けなかった理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// 前のフレームの処理中
    Busy,
    /// 最小間隔に達していない
    TooSoon,
}

/// 同時に1フレームだけを処理させる受付制御
///
/// 処理中フラグと最小フレーム間隔の2段で判定する。待ち行列は持たず、
/// 受け付けられなかったフレームはその場で捨てる。
pub struct FrameGate {
    busy: AtomicBool,
    min_interval: Duration,
    last_admitted: Mutex<Option<Instant>>,
    dropped: AtomicU64,
}

impl FrameGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            busy: AtomicBool::new(false),
            min_interval,
            last_admitted: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn try_enter(self: &Arc<Self>) -> Result<FrameTicket, Rejected> {
        self.try_enter_at(Instant::now())
    }

    pub fn try_enter_at(self: &Arc<Self>, now: Instant) -> Result<FrameTicket, Rejected> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Rejected::Busy);
        }

        let mut last = match self.last_admitted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < self.min_interval {
                drop(last);
                self.busy.store(false, Ordering::Release);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(Rejected::TooSoon);
            }
        }
        *last = Some(now);

        Ok(FrameTicket {
            gate: Arc::clone(self),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// 捨てたフレーム数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// 受け付けたフレームの処理権。drop で処理中フラグを下ろす
#[must_use]
pub struct FrameTicket {
    gate: Arc<FrameGate>,
}

impl Drop for FrameTicket {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
