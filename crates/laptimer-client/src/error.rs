//! 客户端层错误类型定义

use laptimer_driver::DriverError;
use laptimer_hal::{ConnectionId, HalError};
use laptimer_protocol::ProtocolError;
use laptimer_storage::StorageError;
use thiserror::Error;

/// 客户端层错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// 帧编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 协作者错误
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    /// 事件总线错误
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// 未知连接
    #[error("No connection with id {connection}")]
    NoConnection { connection: ConnectionId },

    /// 连接表已满
    #[error("Connection limit reached (capacity: {capacity})")]
    ConnectionLimit { capacity: usize },
}
