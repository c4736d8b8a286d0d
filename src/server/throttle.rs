use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 固定冷却窗口：窗口内的重复调用直接拒绝（不排队）
pub struct Cooldown {
    window: Duration,
    last: Mutex<Option<Instant>>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// 检查与占用在同一把锁内完成，并发探测只有一个能通过
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last
            && now.saturating_duration_since(prev) < self.window
        {
            return false;
        }
        *last = Some(now);
        true
    }
}
