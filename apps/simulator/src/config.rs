//! 仿真器配置（TOML）
//!
//! ```toml
//! [store]
//! path = "laptimer-flash.json"
//! record_capacity = 4096
//!
//! [signal]
//! sample_period_ms = 1
//!
//! [device.detector]
//! rssi_threshold = 36100
//! ```
//!
//! 所有段落与字段都可以省略，缺省值与设备默认值一致。

use anyhow::{Context, Result};
use laptimer_client::DeviceConfig;
use laptimer_hal::DEFAULT_MTU;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub device: DeviceConfig,
    pub store: StoreConfig,
    pub signal: SignalConfig,
    pub phone: PhoneConfig,
}

/// 文件 Flash 存储
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// 新建存储文件时的记录容量
    pub record_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("laptimer-flash.json"),
            record_capacity: 4096,
        }
    }
}

/// 合成信号强度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// 采样周期
    pub sample_period_ms: u32,
    /// 每圈在检查点区域内停留的时长
    pub checkpoint_ms: u32,
    /// 检查点区域内的信号范围
    pub checkpoint_rssi: (u16, u16),
    /// 赛道上的信号范围
    pub track_rssi: (u16, u16),
    /// 单个采样出现尖峰（取另一区域的值）的概率
    pub spike_probability: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 1,
            checkpoint_ms: 800,
            checkpoint_rssi: (38_000, 45_000),
            track_rssi: (10_000, 30_000),
            spike_probability: 0.05,
        }
    }
}

/// 模拟手机
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneConfig {
    pub mtu: u16,
    /// 链路发送缓冲（帧数）
    pub link_frames: usize,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            link_frames: 4096,
        }
    }
}

impl SimulatorConfig {
    /// 读取配置文件；未指定路径时使用默认配置
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
