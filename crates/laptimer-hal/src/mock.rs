//! 内存测试替身
//!
//! - [`MockFlashStore`]: 记录表 + 完成回调（同步，或挂起到手动放行），可注入 `Busy` 与失败完成
//! - [`MockRadioLink`]: 记录发出的帧，可注入 `Busy`
//! - [`MockLed`]: 记录 LED 开关历史

use crate::flash::{FileId, FlashEvent, FlashStore, FlashStoreDelegate, RecordId};
use crate::led::Led;
use crate::radio::{ConnectionId, PeerAddress, RadioLink, SharedMtu};
use crate::table::RecordTable;
use crate::HalError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

// ============================================================================
// MockFlashStore
// ============================================================================

/// 内存 Flash 存储
///
/// 默认所有请求在调用期间立即完成，并在返回前触发对应回调。
/// [`hold_completions`](Self::hold_completions) 打开后回调被挂起，由
/// [`complete_next`](Self::complete_next) 逐个放行；挂起期间 Flash 只接受一个
/// 在途请求，其余返回 `Busy`。
/// 删除不存在的文件/记录时请求仍被接受，回调报告 `success = false`。
pub struct MockFlashStore {
    table: RecordTable,
    delegate: Option<Arc<dyn FlashStoreDelegate>>,
    busy_requests: usize,
    failed_completions: usize,
    fail_initialization: bool,
    hold: bool,
    held: VecDeque<FlashEvent>,
}

impl MockFlashStore {
    pub fn new(record_capacity: usize) -> Self {
        Self {
            table: RecordTable::new(record_capacity),
            delegate: None,
            busy_requests: 0,
            failed_completions: 0,
            fail_initialization: false,
            hold: false,
            held: VecDeque::new(),
        }
    }

    pub fn total_records(&self) -> usize {
        self.table.total_records()
    }

    pub fn record_capacity(&self) -> usize {
        self.table.record_capacity()
    }

    pub fn table(&self) -> &RecordTable {
        &self.table
    }

    /// 接下来 `count` 个异步请求返回 `Busy`
    pub fn reject_next(&mut self, count: usize) {
        self.busy_requests = count;
    }

    /// 接下来 `count` 个被接受的请求以失败完成（不修改数据）
    pub fn fail_next(&mut self, count: usize) {
        self.failed_completions = count;
    }

    pub fn set_fail_initialization(&mut self, fail: bool) {
        self.fail_initialization = fail;
    }

    /// 挂起完成回调；关闭时已挂起的回调仍需 `complete_next` 放行
    pub fn hold_completions(&mut self, hold: bool) {
        self.hold = hold;
    }

    /// 已接受但尚未回调的请求数
    pub fn outstanding(&self) -> usize {
        self.held.len()
    }

    /// 放行最早挂起的回调；没有挂起的回调时返回 `false`
    pub fn complete_next(&mut self) -> bool {
        let Some(event) = self.held.pop_front() else {
            return false;
        };
        self.deliver(event);
        true
    }

    /// 直接写入记录，不触发回调（用于预置数据）
    pub fn preload(&mut self, file_id: FileId, record_id: RecordId, data: &[u32]) -> bool {
        self.table.write(file_id, record_id, data)
    }

    fn admit(&mut self) -> Result<(), HalError> {
        if !self.held.is_empty() {
            return Err(HalError::Busy);
        }
        if self.busy_requests > 0 {
            self.busy_requests -= 1;
            return Err(HalError::Busy);
        }
        Ok(())
    }

    fn forced_failure(&mut self) -> bool {
        if self.failed_completions > 0 {
            self.failed_completions -= 1;
            return true;
        }
        false
    }

    fn complete(&mut self, event: FlashEvent) {
        if self.hold {
            self.held.push_back(event);
        } else {
            self.deliver(event);
        }
    }

    fn deliver(&self, event: FlashEvent) {
        let Some(delegate) = &self.delegate else {
            return;
        };
        match event {
            FlashEvent::Initialized { success } => delegate.on_initialized(success),
            FlashEvent::GarbageCollected { success } => delegate.on_garbage_collected(success),
            FlashEvent::AllFilesDeleted { success } => delegate.on_all_files_deleted(success),
            FlashEvent::FileDeleted { success, file_id } => {
                delegate.on_file_deleted(success, file_id)
            },
            FlashEvent::RecordDeleted {
                success,
                file_id,
                record_id,
            } => delegate.on_record_deleted(success, file_id, record_id),
            FlashEvent::RecordWritten {
                success,
                file_id,
                record_id,
            } => delegate.on_record_written(success, file_id, record_id),
        }
    }
}

impl FlashStore for MockFlashStore {
    fn set_delegate(&mut self, delegate: Arc<dyn FlashStoreDelegate>) {
        self.delegate = Some(delegate);
    }

    fn initialize(&mut self) -> Result<(), HalError> {
        let success = !self.fail_initialization;
        self.complete(FlashEvent::Initialized { success });
        Ok(())
    }

    fn collect_garbage(&mut self) -> Result<(), HalError> {
        self.admit()?;
        let success = !self.forced_failure();
        self.complete(FlashEvent::GarbageCollected { success });
        Ok(())
    }

    fn delete_all_files(&mut self) -> Result<(), HalError> {
        self.admit()?;
        let success = !self.forced_failure();
        if success {
            self.table.clear();
        }
        self.complete(FlashEvent::AllFilesDeleted { success });
        Ok(())
    }

    fn delete_file(&mut self, file_id: FileId) -> Result<(), HalError> {
        self.admit()?;
        let success = !self.forced_failure() && self.table.delete_file(file_id);
        self.complete(FlashEvent::FileDeleted { success, file_id });
        Ok(())
    }

    fn delete_record(&mut self, file_id: FileId, record_id: RecordId) -> Result<(), HalError> {
        self.admit()?;
        let success = !self.forced_failure() && self.table.delete_record(file_id, record_id);
        self.complete(FlashEvent::RecordDeleted {
            success,
            file_id,
            record_id,
        });
        Ok(())
    }

    fn read_record(
        &self,
        file_id: FileId,
        record_id: RecordId,
        data: &mut [u32],
    ) -> Result<usize, HalError> {
        let record = self
            .table
            .read(file_id, record_id)
            .ok_or(HalError::NotFound { file_id, record_id })?;
        let words = data.len().min(record.len());
        data[..words].copy_from_slice(&record[..words]);
        Ok(words)
    }

    fn write_record(
        &mut self,
        file_id: FileId,
        record_id: RecordId,
        data: &[u32],
    ) -> Result<(), HalError> {
        self.admit()?;
        let success = !self.forced_failure() && self.table.write(file_id, record_id, data);
        self.complete(FlashEvent::RecordWritten {
            success,
            file_id,
            record_id,
        });
        Ok(())
    }

    fn iterate_records(
        &self,
        visitor: &mut dyn FnMut(FileId, RecordId, &[u32]),
    ) -> Result<(), HalError> {
        self.table.for_each(visitor);
        Ok(())
    }
}

// ============================================================================
// MockRadioLink
// ============================================================================

#[derive(Debug, Default)]
struct LinkState {
    sent: Vec<Vec<u8>>,
    busy_sends: usize,
}

/// 记录发送内容的链路替身
pub struct MockRadioLink {
    connection: ConnectionId,
    peer: PeerAddress,
    mtu: SharedMtu,
    state: Arc<Mutex<LinkState>>,
}

/// [`MockRadioLink`] 的观察/注入句柄
#[derive(Clone)]
pub struct MockLinkHandle {
    mtu: SharedMtu,
    state: Arc<Mutex<LinkState>>,
}

impl MockRadioLink {
    pub fn new(connection: ConnectionId, mtu: u16) -> (Self, MockLinkHandle) {
        let mtu = SharedMtu::new(mtu);
        let state = Arc::new(Mutex::new(LinkState::default()));
        let peer = PeerAddress([0x02, 0x00, 0x00, 0x00, (connection >> 8) as u8, connection as u8]);
        let handle = MockLinkHandle {
            mtu: mtu.clone(),
            state: state.clone(),
        };
        (
            Self {
                connection,
                peer,
                mtu,
                state,
            },
            handle,
        )
    }
}

impl RadioLink for MockRadioLink {
    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn peer_address(&self) -> PeerAddress {
        self.peer
    }

    fn mtu(&self) -> u16 {
        self.mtu.get()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), HalError> {
        if data.len() > self.max_frame_len() {
            return Err(HalError::InvalidArgument(format!(
                "frame of {} bytes exceeds MTU {}",
                data.len(),
                self.mtu()
            )));
        }
        let mut state = self.state.lock();
        if state.busy_sends > 0 {
            state.busy_sends -= 1;
            return Err(HalError::Busy);
        }
        state.sent.push(data.to_vec());
        Ok(())
    }
}

impl MockLinkHandle {
    /// 已发送的帧（按发送顺序）
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// 取出并清空已发送的帧
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.lock().sent)
    }

    /// 接下来 `count` 次发送返回 `Busy`
    pub fn reject_next(&self, count: usize) {
        self.state.lock().busy_sends = count;
    }

    pub fn set_mtu(&self, mtu: u16) {
        self.mtu.set(mtu);
    }
}

// ============================================================================
// MockLed
// ============================================================================

/// 记录开关历史的 LED 替身，克隆共享同一份历史
#[derive(Debug, Clone, Default)]
pub struct MockLed {
    history: Arc<Mutex<Vec<(u8, bool)>>>,
}

impl MockLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<(u8, bool)> {
        self.history.lock().clone()
    }
}

impl Led for MockLed {
    fn set(&mut self, led_id: u8, on: bool) {
        self.history.lock().push((led_id, on));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::FlashEvent;
    use crossbeam_channel::{Receiver, unbounded};

    fn store_with_events(capacity: usize) -> (MockFlashStore, Receiver<FlashEvent>) {
        let (tx, rx) = unbounded();
        let mut store = MockFlashStore::new(capacity);
        store.set_delegate(Arc::new(tx));
        (store, rx)
    }

    fn next(rx: &Receiver<FlashEvent>) -> FlashEvent {
        rx.try_recv().expect("completion expected")
    }

    #[test]
    fn test_mock_flash_store_behaviour() {
        let (mut store, rx) = store_with_events(3);

        store.initialize().unwrap();
        assert_eq!(next(&rx), FlashEvent::Initialized { success: true });

        store.collect_garbage().unwrap();
        assert_eq!(next(&rx), FlashEvent::GarbageCollected { success: true });
        assert_eq!(store.total_records(), 0);

        store.write_record(1, 1, &[0xFFAABB01]).unwrap();
        assert!(next(&rx).is_success());
        assert_eq!(store.total_records(), 1);

        store.write_record(1, 2, &[0xFFAABB02]).unwrap();
        assert!(next(&rx).is_success());
        assert_eq!(store.total_records(), 2);

        store.write_record(2, 1, &[0xFFAABBFF]).unwrap();
        assert!(next(&rx).is_success());
        assert_eq!(store.total_records(), 3);

        // 覆盖已有记录不占用容量
        store.write_record(2, 1, &[0xFFAABB03]).unwrap();
        assert!(next(&rx).is_success());
        assert_eq!(store.total_records(), 3);

        // 容量已满：请求被接受，但完成报告失败
        store.write_record(2, 2, &[0xFFAABB04]).unwrap();
        assert_eq!(
            next(&rx),
            FlashEvent::RecordWritten {
                success: false,
                file_id: 2,
                record_id: 2
            }
        );
        assert_eq!(store.total_records(), 3);

        let mut data = [0u32; 1];
        assert!(matches!(
            store.read_record(2, 10, &mut data),
            Err(HalError::NotFound { .. })
        ));
        assert_eq!(store.read_record(2, 1, &mut data).unwrap(), 1);
        assert_eq!(data[0], 0xFFAABB03);

        store.delete_record(2, 1).unwrap();
        assert!(next(&rx).is_success());
        assert_eq!(store.total_records(), 2);

        store.delete_record(2, 1).unwrap();
        assert!(!next(&rx).is_success());
        assert_eq!(store.total_records(), 2);

        let mut count = 0;
        store
            .iterate_records(&mut |file_id, record_id, data| {
                count += 1;
                assert_eq!(file_id, 1);
                assert_eq!(data[0], 0xFFAABB00 | u32::from(record_id));
                assert_eq!(data.len(), 1);
            })
            .unwrap();
        assert_eq!(count, 2);

        store.delete_file(1).unwrap();
        assert!(next(&rx).is_success());
        assert_eq!(store.total_records(), 0);

        store.delete_file(1).unwrap();
        assert!(!next(&rx).is_success());

        let mut count = 0;
        store.iterate_records(&mut |_, _, _| count += 1).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_read_record_truncates_to_stored_length() {
        let (mut store, _rx) = store_with_events(4);
        store.preload(1, 1, &[7, 8]);
        let mut data = [0u32; 5];
        assert_eq!(store.read_record(1, 1, &mut data).unwrap(), 2);
        assert_eq!(&data[..2], &[7, 8]);

        let mut small = [0u32; 1];
        assert_eq!(store.read_record(1, 1, &mut small).unwrap(), 1);
        assert_eq!(small[0], 7);
    }

    #[test]
    fn test_injected_busy_and_failure() {
        let (mut store, rx) = store_with_events(4);
        store.preload(1, 1, &[1]);

        store.reject_next(1);
        assert!(matches!(store.delete_all_files(), Err(HalError::Busy)));
        assert!(rx.try_recv().is_err());

        store.fail_next(1);
        store.delete_all_files().unwrap();
        assert_eq!(next(&rx), FlashEvent::AllFilesDeleted { success: false });
        assert_eq!(store.total_records(), 1);

        store.delete_all_files().unwrap();
        assert_eq!(next(&rx), FlashEvent::AllFilesDeleted { success: true });
        assert_eq!(store.total_records(), 0);
    }

    #[test]
    fn test_held_completions_serialize_requests() {
        let (mut store, rx) = store_with_events(4);
        store.hold_completions(true);

        store.write_record(1, 0, &[0]).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(store.outstanding(), 1);

        // 在途请求未完成前拒绝新请求
        assert!(matches!(store.delete_all_files(), Err(HalError::Busy)));
        assert_eq!(store.total_records(), 1);

        assert!(store.complete_next());
        assert_eq!(
            next(&rx),
            FlashEvent::RecordWritten {
                success: true,
                file_id: 1,
                record_id: 0
            }
        );
        assert!(!store.complete_next());

        store.delete_all_files().unwrap();
        assert!(store.complete_next());
        assert_eq!(next(&rx), FlashEvent::AllFilesDeleted { success: true });
        assert_eq!(store.total_records(), 0);
    }

    #[test]
    fn test_failed_initialization() {
        let (mut store, rx) = store_with_events(1);
        store.set_fail_initialization(true);
        store.initialize().unwrap();
        assert_eq!(next(&rx), FlashEvent::Initialized { success: false });
    }

    #[test]
    fn test_mock_radio_link() {
        let (mut link, handle) = MockRadioLink::new(7, 23);
        assert_eq!(link.connection_id(), 7);
        link.send(&[0x80, 0x01, 0x00]).unwrap();

        handle.reject_next(1);
        assert!(matches!(link.send(&[0x81]), Err(HalError::Busy)));
        link.send(&[0x81, 0x01, 0x00]).unwrap();

        assert!(link.send(&[0u8; 21]).is_err());
        handle.set_mtu(100);
        assert!(link.send(&[0u8; 21]).is_ok());

        let sent = handle.take_sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], vec![0x80, 0x01, 0x00]);
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn test_mock_led_history() {
        let led = MockLed::new();
        let mut driver = led.clone();
        driver.set(0, true);
        driver.set(0, false);
        assert_eq!(led.history(), vec![(0, true), (0, false)]);
    }
}
