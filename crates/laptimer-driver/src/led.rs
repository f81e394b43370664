//! 状态 LED 观察者
//!
//! `FlashLed { led_id, delay_ms }` 点亮 LED，并通过延迟事件在 `delay_ms`
//! 后投递 `FlashLed { led_id, 0 }` 熄灭它。过线与会话开始/结束各自闪一下。

use crate::bus::{EventObserver, EventSender};
use crate::event::Event;
use laptimer_hal::Led;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LedConfig {
    /// 过线时闪烁的 LED
    pub lap_led: u8,
    /// 会话开始/结束时闪烁的 LED
    pub session_led: u8,
    /// 点亮时长（毫秒）
    pub flash_ms: u8,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            lap_led: 0,
            session_led: 1,
            flash_ms: 200,
        }
    }
}

pub struct StatusLed<L: Led> {
    led: L,
    config: LedConfig,
    sender: EventSender,
}

impl<L: Led> StatusLed<L> {
    pub fn new(led: L, config: LedConfig, sender: EventSender) -> Self {
        Self {
            led,
            config,
            sender,
        }
    }

    fn flash(&self, led_id: u8) {
        let event = Event::FlashLed {
            led_id,
            delay_ms: self.config.flash_ms,
        };
        if let Err(e) = self.sender.emit(event) {
            warn!(led_id, "LED flash dropped: {}", e);
        }
    }
}

impl<L: Led> EventObserver for StatusLed<L> {
    fn on_event(&mut self, event: &Event) {
        match *event {
            Event::FlashLed {
                led_id,
                delay_ms: 0,
            } => self.led.set(led_id, false),
            Event::FlashLed { led_id, delay_ms } => {
                self.led.set(led_id, true);
                let off = Event::FlashLed {
                    led_id,
                    delay_ms: 0,
                };
                if self.sender.emit_delayed(off, u32::from(delay_ms)).is_err() {
                    // 定时器耗尽时不留常亮
                    self.led.set(led_id, false);
                }
            },
            Event::NewLap { .. } => self.flash(self.config.lap_led),
            Event::SessionStarted { .. } | Event::SessionStopped { .. } => {
                self.flash(self.config.session_led)
            },
            Event::StartSession { .. }
            | Event::StopSession { .. }
            | Event::AddLapTime { .. }
            | Event::Initialized
            | Event::ResetStorage
            | Event::ResetStorageResult(_)
            | Event::LoadSessionIds { .. }
            | Event::SessionIdsLoaded(_)
            | Event::LoadSessionRecord { .. }
            | Event::SessionRecordLoaded(_)
            | Event::LapRecorded(_)
            | Event::StorageRetry => {},
        }
    }
}
