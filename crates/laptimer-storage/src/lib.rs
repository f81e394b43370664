//! # Lap Timer Storage
//!
//! 会话与圈时间的持久化。
//!
//! [`SessionStore`] 作为事件总线的观察者运行：消费会话/圈/重置/查询事件，
//! 通过异步 [`FlashStore`](laptimer_hal::FlashStore) 落盘，并把结果作为事件
//! 发回总线。最新状态以 [`SessionSnapshot`] 的形式经 [`SessionView`] 无锁发布。

mod error;
pub mod store;
pub mod view;

pub use error::StorageError;
pub use store::{
    HEADER_RECORD, MAX_LAPS, MAX_PENDING_WRITES, SESSION_ID_CEILING, SessionStore, StorageConfig,
};
pub use view::{Lap, SessionSnapshot, SessionView};
