//! 过线检测
//!
//! 对信号强度采样做 5 阶中值滤波，再用“检查点/赛道”两个去抖计数器做迟滞：
//!
//! - 不在检查点区域、中值高于阈值的采样累计超过 `checkpoint_count` 次时，
//!   进入检查点区域并投递 `NewLap(now_ms)`
//! - 在检查点区域内、中值低于阈值的采样累计超过 `track_count` 次时，
//!   回到赛道
//!
//! 每次状态切换都会清零两个计数器。

use crate::bus::EventSender;
use crate::event::Event;
use laptimer_hal::Clock;
use std::sync::Arc;
use tracing::{info, warn};

/// 中值滤波阶数
pub const MEDIAN_FILTER_ORDER: usize = 5;

/// 过线检测参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DetectorConfig {
    /// 信号强度阈值（原始采样值）
    pub rssi_threshold: u16,
    /// 进入检查点所需的高于阈值的采样数
    pub checkpoint_count: u32,
    /// 回到赛道所需的低于阈值的采样数
    pub track_count: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            rssi_threshold: 36100,
            checkpoint_count: 200,
            track_count: 20000,
        }
    }
}

pub struct LapDetector {
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    sender: EventSender,
    window: [u16; MEDIAN_FILTER_ORDER],
    index: usize,
    in_checkpoint: bool,
    checkpoint_counter: u32,
    track_counter: u32,
}

impl LapDetector {
    pub fn new(config: DetectorConfig, clock: Arc<dyn Clock>, sender: EventSender) -> Self {
        Self {
            config,
            clock,
            sender,
            window: [0; MEDIAN_FILTER_ORDER],
            index: 0,
            in_checkpoint: false,
            checkpoint_counter: 0,
            track_counter: 0,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn in_checkpoint(&self) -> bool {
        self.in_checkpoint
    }

    /// 处理一个采样，过线时返回投递的时间戳
    pub fn on_sample(&mut self, sample: u16) -> Option<u32> {
        self.window[self.index] = sample;
        self.index = (self.index + 1) % MEDIAN_FILTER_ORDER;
        let filtered = self.median();

        if !self.in_checkpoint && filtered > self.config.rssi_threshold {
            self.checkpoint_counter = self.checkpoint_counter.saturating_add(1);
            if self.checkpoint_counter > self.config.checkpoint_count {
                self.in_checkpoint = true;
                self.reset_counters();
                let timestamp_ms = self.clock.now_ms();
                info!(timestamp_ms, "New lap detected");
                if let Err(e) = self.sender.emit(Event::NewLap { timestamp_ms }) {
                    warn!(timestamp_ms, "Lap crossing dropped: {}", e);
                }
                return Some(timestamp_ms);
            }
        } else if self.in_checkpoint && filtered < self.config.rssi_threshold {
            self.track_counter = self.track_counter.saturating_add(1);
            if self.track_counter > self.config.track_count {
                self.in_checkpoint = false;
                self.reset_counters();
            }
        }
        None
    }

    fn median(&self) -> u16 {
        let mut sorted = self.window;
        sorted.sort_unstable();
        sorted[MEDIAN_FILTER_ORDER / 2]
    }

    fn reset_counters(&mut self) {
        self.checkpoint_counter = 0;
        self.track_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use laptimer_hal::MockClock;

    const HIGH: u16 = 40000;
    const LOW: u16 = 20000;

    fn detector(config: DetectorConfig) -> (LapDetector, EventBus, MockClock) {
        let bus = EventBus::default();
        let clock = MockClock::new(0);
        let detector = LapDetector::new(config, Arc::new(clock.clone()), bus.sender());
        (detector, bus, clock)
    }

    fn feed(detector: &mut LapDetector, sample: u16, count: usize) -> Vec<u32> {
        (0..count).filter_map(|_| detector.on_sample(sample)).collect()
    }

    #[test]
    fn test_single_crossing_emits_one_lap() {
        let (mut detector, mut bus, clock) = detector(DetectorConfig::default());
        clock.set(1234);

        assert_eq!(feed(&mut detector, HIGH, 1000), vec![1234]);
        assert!(detector.in_checkpoint());
        assert_eq!(
            bus.process_next_event(),
            Some(Event::NewLap { timestamp_ms: 1234 })
        );
        assert_eq!(bus.process_next_event(), None);
    }

    #[test]
    fn test_median_needs_majority_of_window() {
        let config = DetectorConfig {
            checkpoint_count: 0,
            ..DetectorConfig::default()
        };
        let (mut detector, _bus, _clock) = detector(config);

        // 窗口初始为 0，前两个高采样不足以抬高中值
        assert_eq!(detector.on_sample(HIGH), None);
        assert_eq!(detector.on_sample(HIGH), None);
        assert_eq!(detector.on_sample(HIGH), Some(0));
    }

    #[test]
    fn test_checkpoint_count_is_exceeded_not_reached() {
        let config = DetectorConfig {
            checkpoint_count: 10,
            ..DetectorConfig::default()
        };
        let (mut detector, _bus, _clock) = detector(config);
        // 第 3 个采样起中值越过阈值，计数到 11 时触发
        assert!(feed(&mut detector, HIGH, 12).is_empty());
        assert_eq!(detector.on_sample(HIGH), Some(0));
    }

    #[test]
    fn test_no_second_lap_without_returning_to_track() {
        let config = DetectorConfig {
            checkpoint_count: 5,
            track_count: 50,
            ..DetectorConfig::default()
        };
        let (mut detector, _bus, clock) = detector(config);

        assert_eq!(feed(&mut detector, HIGH, 20).len(), 1);
        // 短暂掉落后再次高于阈值：仍在检查点区域
        feed(&mut detector, LOW, 20);
        assert!(detector.in_checkpoint());
        assert!(feed(&mut detector, HIGH, 100).is_empty());

        // 低于阈值足够久才回到赛道
        feed(&mut detector, LOW, 40);
        assert!(!detector.in_checkpoint());

        clock.set(90_000);
        assert_eq!(feed(&mut detector, HIGH, 20), vec![90_000]);
    }

    #[test]
    fn test_single_spikes_are_filtered() {
        let config = DetectorConfig {
            checkpoint_count: 0,
            ..DetectorConfig::default()
        };
        let (mut detector, _bus, _clock) = detector(config);
        for _ in 0..100 {
            assert_eq!(detector.on_sample(HIGH), None);
            assert_eq!(detector.on_sample(LOW), None);
            assert_eq!(detector.on_sample(LOW), None);
        }
    }
}
