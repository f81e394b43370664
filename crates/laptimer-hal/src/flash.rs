//! Flash 存储协作者
//!
//! 键值式 Flash 存储：以 `(file_id, record_id)` 寻址，记录内容为整数个 4 字节字。
//!
//! # 调用约定
//!
//! - 除 `read_record` / `iterate_records` 外的请求都是异步的：返回 `Ok(())` 仅表示
//!   **请求已被接受**，结果通过 [`FlashStoreDelegate`] 的回调送达。
//! - 返回 `Err(HalError::Busy)` 表示暂时无法执行，调用方稍后重试。
//! - 存储只支持一个使用者，且同一时刻只有一个请求在途，调用方负责串行化。

use crate::HalError;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::Arc;
use tracing::warn;

/// 文件 ID
pub type FileId = u16;
/// 记录 ID
pub type RecordId = u16;

/// Flash 存储接口
pub trait FlashStore {
    /// 设置完成回调接收者
    fn set_delegate(&mut self, delegate: Arc<dyn FlashStoreDelegate>);

    /// 初始化存储，完成后回调 `on_initialized`
    fn initialize(&mut self) -> Result<(), HalError>;

    /// 回收已删除记录占用的空间，完成后回调 `on_garbage_collected`
    fn collect_garbage(&mut self) -> Result<(), HalError>;

    /// 删除所有文件，完成后回调 `on_all_files_deleted`
    fn delete_all_files(&mut self) -> Result<(), HalError>;

    /// 删除一个文件及其全部记录，完成后回调 `on_file_deleted`
    fn delete_file(&mut self, file_id: FileId) -> Result<(), HalError>;

    /// 删除一条记录，完成后回调 `on_record_deleted`
    fn delete_record(&mut self, file_id: FileId, record_id: RecordId) -> Result<(), HalError>;

    /// 同步读取一条记录到 `data`
    ///
    /// 返回实际读取的字数：记录比 `data` 短时按记录长度截断。
    fn read_record(
        &self,
        file_id: FileId,
        record_id: RecordId,
        data: &mut [u32],
    ) -> Result<usize, HalError>;

    /// 写入一条记录，完成后回调 `on_record_written`
    fn write_record(
        &mut self,
        file_id: FileId,
        record_id: RecordId,
        data: &[u32],
    ) -> Result<(), HalError>;

    /// 同步遍历所有记录，顺序不确定
    fn iterate_records(
        &self,
        visitor: &mut dyn FnMut(FileId, RecordId, &[u32]),
    ) -> Result<(), HalError>;
}

/// Flash 完成回调
///
/// 回调可能在中断上下文中触发，实现必须非阻塞，推荐转发为 [`FlashEvent`] 消息。
pub trait FlashStoreDelegate: Send + Sync {
    fn on_initialized(&self, success: bool);
    fn on_garbage_collected(&self, success: bool);
    fn on_all_files_deleted(&self, success: bool);
    fn on_file_deleted(&self, success: bool, file_id: FileId);
    fn on_record_deleted(&self, success: bool, file_id: FileId, record_id: RecordId);
    fn on_record_written(&self, success: bool, file_id: FileId, record_id: RecordId);
}

/// Flash 完成通知消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlashEvent {
    Initialized {
        success: bool,
    },
    GarbageCollected {
        success: bool,
    },
    AllFilesDeleted {
        success: bool,
    },
    FileDeleted {
        success: bool,
        file_id: FileId,
    },
    RecordDeleted {
        success: bool,
        file_id: FileId,
        record_id: RecordId,
    },
    RecordWritten {
        success: bool,
        file_id: FileId,
        record_id: RecordId,
    },
}

impl FlashEvent {
    pub fn is_success(&self) -> bool {
        match *self {
            FlashEvent::Initialized { success }
            | FlashEvent::GarbageCollected { success }
            | FlashEvent::AllFilesDeleted { success }
            | FlashEvent::FileDeleted { success, .. }
            | FlashEvent::RecordDeleted { success, .. }
            | FlashEvent::RecordWritten { success, .. } => success,
        }
    }
}

/// 通过 channel 转发完成回调（非阻塞 `try_send`）
impl FlashStoreDelegate for Sender<FlashEvent> {
    fn on_initialized(&self, success: bool) {
        forward(self, FlashEvent::Initialized { success });
    }

    fn on_garbage_collected(&self, success: bool) {
        forward(self, FlashEvent::GarbageCollected { success });
    }

    fn on_all_files_deleted(&self, success: bool) {
        forward(self, FlashEvent::AllFilesDeleted { success });
    }

    fn on_file_deleted(&self, success: bool, file_id: FileId) {
        forward(self, FlashEvent::FileDeleted { success, file_id });
    }

    fn on_record_deleted(&self, success: bool, file_id: FileId, record_id: RecordId) {
        forward(
            self,
            FlashEvent::RecordDeleted {
                success,
                file_id,
                record_id,
            },
        );
    }

    fn on_record_written(&self, success: bool, file_id: FileId, record_id: RecordId) {
        forward(
            self,
            FlashEvent::RecordWritten {
                success,
                file_id,
                record_id,
            },
        );
    }
}

fn forward(sender: &Sender<FlashEvent>, event: FlashEvent) {
    match sender.try_send(event) {
        Ok(()) => {},
        Err(TrySendError::Full(event)) => {
            warn!(?event, "Flash event queue full, completion dropped");
        },
        Err(TrySendError::Disconnected(event)) => {
            warn!(?event, "Flash event queue closed, completion dropped");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_sender_forwards_all_callbacks() {
        let (tx, rx) = bounded(8);
        let delegate: Arc<dyn FlashStoreDelegate> = Arc::new(tx);

        delegate.on_initialized(true);
        delegate.on_garbage_collected(false);
        delegate.on_all_files_deleted(true);
        delegate.on_file_deleted(true, 3);
        delegate.on_record_deleted(false, 3, 4);
        delegate.on_record_written(true, 5, 6);

        let events: Vec<FlashEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                FlashEvent::Initialized { success: true },
                FlashEvent::GarbageCollected { success: false },
                FlashEvent::AllFilesDeleted { success: true },
                FlashEvent::FileDeleted {
                    success: true,
                    file_id: 3
                },
                FlashEvent::RecordDeleted {
                    success: false,
                    file_id: 3,
                    record_id: 4
                },
                FlashEvent::RecordWritten {
                    success: true,
                    file_id: 5,
                    record_id: 6
                },
            ]
        );
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (tx, rx) = bounded(1);
        tx.on_initialized(true);
        tx.on_initialized(false);
        assert_eq!(rx.len(), 1);
        assert!(rx.recv().unwrap().is_success());
    }
}
