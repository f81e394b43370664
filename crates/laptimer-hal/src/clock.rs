//! 毫秒时钟

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// 单调毫秒计数器
///
/// 32 位计数约 49.7 天回绕一次，差值计算使用 `wrapping_sub`。
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u32;
}

/// 基于 `Instant` 的主机时钟，从创建时刻开始计数
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        // 截断即回绕
        self.start.elapsed().as_millis() as u32
    }
}

/// 手动推进的时钟（测试与仿真用），克隆共享同一计数
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Arc<AtomicU32>,
}

impl MockClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: u32) {
        self.now.store(now_ms, Ordering::Relaxed);
    }

    /// 推进 `delta_ms`，返回推进后的时间
    pub fn advance(&self, delta_ms: u32) -> u32 {
        self.now
            .fetch_add(delta_ms, Ordering::Relaxed)
            .wrapping_add(delta_ms)
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_shared_between_clones() {
        let clock = MockClock::new(100);
        let other = clock.clone();
        assert_eq!(clock.advance(50), 150);
        assert_eq!(other.now_ms(), 150);
        other.set(7);
        assert_eq!(clock.now_ms(), 7);
    }

    #[test]
    fn test_mock_clock_wraps() {
        let clock = MockClock::new(u32::MAX);
        assert_eq!(clock.advance(2), 1);
    }

    #[test]
    fn test_monotonic_clock_starts_near_zero() {
        let clock = MonotonicClock::new();
        let first = clock.now_ms();
        let second = clock.now_ms();
        assert!(second >= first);
        assert!(first < 1000);
    }
}
