//! 状态 LED

use tracing::debug;

/// LED 驱动
pub trait Led: Send {
    fn set(&mut self, led_id: u8, on: bool);
}

/// 主机 LED：只记录日志并保存状态
#[derive(Debug, Default)]
pub struct LogLed {
    states: u32,
}

impl LogLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self, led_id: u8) -> bool {
        led_id < 32 && self.states & (1 << led_id) != 0
    }
}

impl Led for LogLed {
    fn set(&mut self, led_id: u8, on: bool) {
        if led_id >= 32 {
            return;
        }
        if on {
            self.states |= 1 << led_id;
        } else {
            self.states &= !(1 << led_id);
        }
        debug!(led_id, on, "LED");
    }
}
