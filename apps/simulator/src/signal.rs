//! 合成信号强度
//!
//! 每圈先在检查点区域内停留 `checkpoint_ms`（高信号），其余时间在赛道上（低信号），
//! 两段都夹杂随机尖峰。

use crate::config::SignalConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SignalGenerator {
    config: SignalConfig,
    rng: StdRng,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 在 `[base - jitter, base + jitter]` 内取一圈时长
    pub fn lap_duration(&mut self, base_ms: u32, jitter_ms: u32) -> u32 {
        if jitter_ms == 0 {
            return base_ms;
        }
        let low = base_ms.saturating_sub(jitter_ms);
        let high = base_ms.saturating_add(jitter_ms);
        self.rng.gen_range(low..=high)
    }

    /// 生成持续 `duration_ms` 的一圈采样
    pub fn lap(&mut self, duration_ms: u32) -> Vec<u16> {
        let period = self.config.sample_period_ms.max(1);
        let total = (duration_ms / period) as usize;
        let zone = ((self.config.checkpoint_ms / period) as usize).min(total);

        let (checkpoint, track) = (self.config.checkpoint_rssi, self.config.track_rssi);
        let mut samples = Vec::with_capacity(total);
        for i in 0..total {
            let (range, other) = if i < zone {
                (checkpoint, track)
            } else {
                (track, checkpoint)
            };
            let range = if self.rng.gen_bool(self.config.spike_probability.clamp(0.0, 1.0)) {
                other
            } else {
                range
            };
            samples.push(self.rng.gen_range(range.0..=range.1.max(range.0)));
        }
        samples
    }
}
