//! # Lap Timer HAL
//!
//! 外部协作者抽象层：Flash 存储、无线链路、毫秒时钟与 LED。
//!
//! 每个协作者都是一个 trait，配有主机实现与内存测试替身（`mock` feature）：
//!
//! | 协作者 | trait | 主机实现 | 测试替身 |
//! |---|---|---|---|
//! | Flash 存储 | [`FlashStore`] | [`FileFlashStore`] | `MockFlashStore` |
//! | 无线链路 | [`RadioLink`] | [`ChannelLink`] | `MockRadioLink` |
//! | 时钟 | [`Clock`] | [`MonotonicClock`] | [`MockClock`] |
//! | LED | [`Led`] | [`LogLed`] | `MockLed` |
//!
//! 协作者的异步完成通知与上行数据一律以消息（[`FlashEvent`] / [`RadioEvent`]）
//! 投递到主循环，业务逻辑不会在协作者的上下文中执行。

use thiserror::Error;

pub mod clock;
pub mod flash;
pub mod led;
pub mod radio;
pub mod table;

#[cfg(feature = "file-store")]
pub mod file_store;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use clock::{Clock, MockClock, MonotonicClock};
pub use flash::{FileId, FlashEvent, FlashStore, FlashStoreDelegate, RecordId};
pub use led::{Led, LogLed};
pub use radio::{
    ATT_HEADER_LEN, ChannelLink, ConnectionId, DEFAULT_MTU, PeerAddress, RadioEvent, RadioLink,
    SharedMtu,
};
pub use table::RecordTable;

#[cfg(feature = "file-store")]
pub use file_store::FileFlashStore;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockFlashStore, MockLed, MockLinkHandle, MockRadioLink};

/// 协作者层统一错误类型
#[derive(Error, Debug)]
pub enum HalError {
    /// 协作者忙（串行、单请求在途），稍后重试
    #[error("Collaborator busy, retry later")]
    Busy,

    #[error("Record not found: file 0x{file_id:04X}, record {record_id}")]
    NotFound { file_id: FileId, record_id: RecordId },

    #[error("Record capacity exhausted ({capacity} records)")]
    CapacityExceeded { capacity: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 链路已断开
    #[error("Link disconnected")]
    Disconnected,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl HalError {
    /// 是否为可重试的瞬时错误
    pub fn is_busy(&self) -> bool {
        matches!(self, HalError::Busy)
    }
}
