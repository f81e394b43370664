//! 存储层错误类型定义

use laptimer_hal::HalError;
use laptimer_protocol::SessionId;
use thiserror::Error;

/// 存储层错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// 恢复出厂进行中，会话与圈事件一律拒绝
    #[error("Storage reset in progress")]
    ResetPending,

    /// Flash 尚未完成初始化，会话 ID 边界未知
    #[error("Session storage not initialized")]
    NotInitialized,

    #[error("Session id space exhausted (ceiling 0x{ceiling:04X})")]
    SessionIdExhausted { ceiling: SessionId },

    /// 没有进行中的会话
    #[error("No session in progress")]
    NoActiveSession,

    /// 待写队列已满
    #[error("Pending write queue full (capacity: {capacity})")]
    WriteQueueFull { capacity: usize },

    /// Flash 存储错误
    #[error("Flash error: {0}")]
    Hal(#[from] HalError),
}
