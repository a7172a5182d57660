use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Inner<T> {
    pending: Option<T>,
    closed: bool,
}

/// 1要素だけ保持するメールボックス
///
/// 送り手は未処理の要素を上書きし、受け手は自分のペースで最新の1件だけを
/// 取り出す。
pub struct FrameSlot<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 要素を置く。上書きで捨てた要素があれば返す
    pub fn put(&self, item: T) -> Option<T> {
        let mut inner = self.lock();
        if inner.closed {
            return Some(item);
        }
        let replaced = inner.pending.replace(item);
        drop(inner);
        self.ready.notify_one();
        replaced
    }

    pub fn try_take(&self) -> Option<T> {
        self.lock().pending.take()
    }

    /// 要素が来るまで待つ。閉じられたら None
    pub fn recv(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.pending.take() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = match self.ready.wait(inner) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.pending.take() {
                return Some(item);
            }
            let now = Instant::now();
            if inner.closed || now >= deadline {
                return None;
            }
            inner = match self.ready.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// 以降の `put` を拒否し、待っている受け手を起こす
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}
