//! 事件管线
//!
//! 本 crate 提供计时器的事件驱动核心：
//! - [`EventBus`]: 即时/延迟事件投递，观察者表，定时器池
//! - [`Event`]: 封闭的事件和类型
//! - [`LapDetector`]: 信号强度中值滤波 + 迟滞，产生 `NewLap`
//! - [`StatusLed`]: LED 闪烁观察者
//! - [`Queue`]: 定容环形队列
//!
//! # 并发模型
//!
//! 生产者只通过 [`EventSender`] 投递事件；业务逻辑只在主循环处理事件时执行，
//! 任意两段业务逻辑不会并发运行。

pub mod bus;
mod error;
pub mod event;
pub mod detector;
pub mod led;
pub mod queue;

pub use bus::{
    BusConfig, EventBus, EventObserver, EventSender, MAX_EVENTS, MAX_OBSERVERS, MAX_TIMERS,
    ObserverHandle, SharedObserver,
};
pub use detector::{DetectorConfig, LapDetector};
pub use error::DriverError;
pub use event::{
    Event, LAP_PAGE_LEN, LapRecord, Origin, ResetStorage, SESSION_ID_PAGE_LEN, SessionIdPage,
    SessionRecordPage, StorageResponse,
};
pub use led::{LedConfig, StatusLed};
pub use queue::Queue;
