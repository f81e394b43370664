//! # Lap Timer Client
//!
//! 面向对端的协议处理与设备装配。
//!
//! ## 模块
//!
//! - `handler`: 单连接协议处理器 [`ProtocolHandler`]（请求分派、分帧、Busy 重发）
//! - `connections`: 连接表 [`ConnectionManager`]，路由 [`RadioEvent`](laptimer_hal::RadioEvent)
//! - `device`: [`Device`] 装配事件总线、存储、连接表、过线检测与 LED，并驱动主循环
//! - `loopback`: 进程内对端 [`LoopbackPeer`]
//!
//! ## 示例
//!
//! ```rust
//! use laptimer_client::{Device, DeviceConfig, LoopbackPeer};
//! use laptimer_hal::{MockClock, MockFlashStore, MockLed};
//! use laptimer_protocol::{DeviceMessage, Request, StartResponse};
//! use std::sync::Arc;
//!
//! let mut device = Device::new(
//!     MockFlashStore::new(256),
//!     MockLed::new(),
//!     Arc::new(MockClock::new(0)),
//!     DeviceConfig::default(),
//! )
//! .unwrap();
//! device.start().unwrap();
//!
//! let phone = LoopbackPeer::connect(&device.radio_sender(), 1, 23).unwrap();
//! phone.send(&Request::Start).unwrap();
//! device.run_until_idle();
//! assert_eq!(
//!     phone.receive(),
//!     vec![DeviceMessage::StartResponse(StartResponse::new(1))]
//! );
//! ```

mod connections;
mod device;
mod error;
mod handler;
mod loopback;

pub use connections::{ClientConfig, ConnectionManager};
pub use device::{Device, DeviceConfig, RADIO_QUEUE_LEN};
pub use error::ClientError;
pub use handler::{FrameBuf, OUTBOUND_FRAMES, ProtocolHandler};
pub use loopback::{LOOPBACK_QUEUE_LEN, LoopbackPeer};
