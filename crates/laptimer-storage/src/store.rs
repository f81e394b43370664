//! 会话存储
//!
//! 以 Flash 的文件/记录寻址保存会话与圈时间：
//!
//! ```text
//! file_id   = session_id          (1 ..= SESSION_ID_CEILING - 1)
//! record 0  = 会话头 [state]
//! record n  = 第 n 圈 [lap_time_ms]  (n = 1 ..= 255)
//! ```
//!
//! # 请求串行化
//!
//! Flash 同一时刻只处理一个请求。写入先进入定容待写队列，上一笔写入完成后
//! 才发出下一笔；被拒绝（`Busy`）的写入留在队首，在下一次完成通知或
//! `retry_delay_ms` 后的 `StorageRetry` 事件时重试。
//!
//! # 恢复出厂
//!
//! 两阶段：删除全部文件 → 垃圾回收。有写入在途时，删除请求等该写入完成后
//! 再发出。任一请求被同步拒绝或完成失败，整个重置立即以失败结束，不做静默
//! 重试。重置进行中拒绝会话与圈事件；重置成功后存储恢复可用，即使启动时
//! 初始化失败。

use crate::view::{Lap, SessionSnapshot, SessionView};
use crate::StorageError;
use laptimer_driver::{
    Event, EventObserver, EventSender, LAP_PAGE_LEN, LapRecord, Origin, Queue, ResetStorage,
    SESSION_ID_PAGE_LEN, SessionIdPage, SessionRecordPage, StorageResponse,
};
use laptimer_hal::{ConnectionId, FileId, FlashEvent, FlashStore, HalError, RecordId};
use laptimer_protocol::{LapId, LapTime, SessionId, SessionIdRelation, SessionState};
use tracing::{debug, error, info, warn};

/// 会话 ID 上限（不含），更高的文件 ID 保留给其他用途
pub const SESSION_ID_CEILING: SessionId = 0xFFF0;

/// 单个会话的最大圈数，达到后会话自动结束
pub const MAX_LAPS: LapId = LapId::MAX;

/// 会话头记录
pub const HEADER_RECORD: RecordId = 0;

/// 待写队列容量
pub const MAX_PENDING_WRITES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StorageConfig {
    /// 待写队列长度（`2 ..= MAX_PENDING_WRITES`，切换会话需要两个槽位）
    pub max_pending_writes: usize,
    /// 被拒绝的写入多久后重试
    pub retry_delay_ms: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_pending_writes: MAX_PENDING_WRITES,
            retry_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingWrite {
    file_id: FileId,
    record_id: RecordId,
    word: u32,
}

pub struct SessionStore<F: FlashStore> {
    flash: F,
    sender: EventSender,
    config: StorageConfig,
    view: SessionView,

    initialized: bool,
    reset_pending: bool,
    first_session_id: SessionId,
    last_session_id: SessionId,
    last_lap_id: LapId,
    last_session_completed: bool,
    current_lap_started: Option<u32>,
    best_lap: Option<Lap>,
    last_lap: Option<Lap>,

    writes: Queue<PendingWrite, MAX_PENDING_WRITES>,
    write_in_flight: bool,
    retry_scheduled: bool,
    delete_all_deferred: bool,
}

impl<F: FlashStore> SessionStore<F> {
    /// 创建存储
    ///
    /// Flash 的完成回调须已通过 `set_delegate` 接到主循环，
    /// 完成通知由主循环交给 [`handle_flash_event`](Self::handle_flash_event)。
    pub fn new(flash: F, sender: EventSender, config: StorageConfig) -> Self {
        let store = Self {
            flash,
            sender,
            config: StorageConfig {
                max_pending_writes: config.max_pending_writes.clamp(2, MAX_PENDING_WRITES),
                ..config
            },
            view: SessionView::new(),
            initialized: false,
            reset_pending: false,
            first_session_id: 0,
            last_session_id: 0,
            last_lap_id: 0,
            last_session_completed: true,
            current_lap_started: None,
            best_lap: None,
            last_lap: None,
            writes: Queue::new(),
            write_in_flight: false,
            retry_scheduled: false,
            delete_all_deferred: false,
        };
        store.publish();
        store
    }

    pub fn view(&self) -> SessionView {
        self.view.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            initialized: self.initialized,
            reset_pending: self.reset_pending,
            first_session_id: self.first_session_id,
            last_session_id: self.last_session_id,
            last_session_state: self.last_session_state(),
            lap_count: self.last_lap_id,
            current_lap_started_ms: self.current_lap_started,
            best_lap: self.best_lap,
            last_lap: self.last_lap,
        }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// 取回 Flash 存储（未落盘的待写记录随之丢弃）
    pub fn into_flash(self) -> F {
        self.flash
    }

    /// 待写入 Flash 的记录数（含在途）
    pub fn pending_writes(&self) -> usize {
        self.writes.size()
    }

    /// 请求 Flash 初始化，完成后经 `FlashEvent::Initialized` 回到本存储
    pub fn initialize(&mut self) -> Result<(), StorageError> {
        self.flash.initialize()?;
        Ok(())
    }

    fn last_session_state(&self) -> SessionState {
        if self.last_session_id != 0 && !self.last_session_completed {
            SessionState::Pending
        } else {
            SessionState::Completed
        }
    }

    fn publish(&self) {
        self.view.publish(self.snapshot());
    }

    fn emit(&self, event: Event) {
        if let Err(e) = self.sender.emit(event) {
            warn!(?event, "Storage event dropped: {}", e);
        }
    }

    fn accept_session_events(&self) -> Result<(), StorageError> {
        if self.reset_pending {
            return Err(StorageError::ResetPending);
        }
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flash 完成通知
    // ------------------------------------------------------------------

    /// 处理 Flash 完成通知（主循环上下文）
    pub fn handle_flash_event(&mut self, event: FlashEvent) {
        match event {
            FlashEvent::Initialized { success } => self.on_initialized(success),
            FlashEvent::AllFilesDeleted { success } => self.on_all_files_deleted(success),
            FlashEvent::GarbageCollected { success } => self.on_garbage_collected(success),
            FlashEvent::RecordWritten {
                success,
                file_id,
                record_id,
            } => self.on_record_written(success, file_id, record_id),
            FlashEvent::FileDeleted { success, file_id } => {
                debug!(success, file_id, "File deleted");
            },
            FlashEvent::RecordDeleted {
                success,
                file_id,
                record_id,
            } => {
                debug!(success, file_id, record_id, "Record deleted");
            },
        }
    }

    fn on_initialized(&mut self, success: bool) {
        if !success {
            error!("Flash initialization failed, session history unavailable until reset");
            return;
        }

        let mut bounds: Option<(SessionId, SessionId)> = None;
        let visited = self.flash.iterate_records(&mut |file_id, _, _| {
            if (1..SESSION_ID_CEILING).contains(&file_id) {
                bounds = Some(match bounds {
                    Some((first, last)) => (first.min(file_id), last.max(file_id)),
                    None => (file_id, file_id),
                });
            }
        });
        if let Err(e) = visited {
            error!("Cannot iterate flash records: {}", e);
            return;
        }

        let (first, last) = bounds.unwrap_or((0, 0));
        self.first_session_id = first;
        self.last_session_id = last;
        self.restore_last_session();
        self.initialized = true;

        info!(
            first_session_id = first,
            last_session_id = last,
            laps = self.last_lap_id,
            "Session storage initialized"
        );
        self.publish();
        self.emit(Event::Initialized);
    }

    /// 从 Flash 恢复最后一个会话的圈统计；断电视为会话结束
    fn restore_last_session(&mut self) {
        self.last_lap_id = 0;
        self.best_lap = None;
        self.last_lap = None;
        self.current_lap_started = None;
        self.last_session_completed = true;
        if self.last_session_id == 0 {
            return;
        }

        let session_id = self.last_session_id;
        let mut header_state = None;
        let mut laps: Vec<Lap> = Vec::new();
        let visited = self.flash.iterate_records(&mut |file_id, record_id, data| {
            if file_id != session_id {
                return;
            }
            match (record_id, data.first()) {
                (HEADER_RECORD, Some(&word)) => header_state = Some(word),
                (1..=255, Some(&lap_time)) => laps.push(Lap {
                    lap_id: record_id as LapId,
                    lap_time,
                }),
                _ => {},
            }
        });
        if let Err(e) = visited {
            warn!(session_id, "Cannot restore last session: {}", e);
            return;
        }

        laps.sort_unstable_by_key(|lap| lap.lap_id);
        self.last_lap_id = laps.last().map_or(0, |lap| lap.lap_id);
        self.last_lap = laps.last().copied();
        self.best_lap = laps.iter().copied().min_by_key(|lap| lap.lap_time);

        if header_state == Some(u32::from(u8::from(SessionState::Pending))) {
            info!(session_id, "Closing session interrupted by power loss");
            self.enqueue_header(session_id, SessionState::Completed);
        }
    }

    fn on_all_files_deleted(&mut self, success: bool) {
        if !self.reset_pending {
            return;
        }
        if !success {
            self.finish_reset(false);
            return;
        }
        if let Err(e) = self.flash.collect_garbage() {
            warn!("Garbage collection rejected: {}", e);
            self.finish_reset(false);
        }
    }

    fn on_garbage_collected(&mut self, success: bool) {
        if self.reset_pending {
            self.finish_reset(success);
        }
    }

    fn on_record_written(&mut self, success: bool, file_id: FileId, record_id: RecordId) {
        if !self.write_in_flight {
            debug!(file_id, record_id, "Unexpected write completion");
            return;
        }
        if !success {
            warn!(file_id, record_id, "Flash write failed, record lost");
        }
        let expected = self
            .writes
            .first()
            .is_some_and(|w| w.file_id == file_id && w.record_id == record_id);
        if expected {
            self.writes.pop();
        } else {
            warn!(file_id, record_id, "Write completion does not match the queued record");
        }
        self.write_in_flight = false;

        if self.delete_all_deferred {
            self.delete_all_deferred = false;
            self.request_delete_all();
            return;
        }
        self.pump_writes();
    }

    // ------------------------------------------------------------------
    // 写入队列
    // ------------------------------------------------------------------

    /// 确认待写队列还能容纳 `count` 笔写入
    fn reserve_writes(&self, count: usize) -> Result<(), StorageError> {
        if self.writes.size() + count > self.config.max_pending_writes {
            return Err(StorageError::WriteQueueFull {
                capacity: self.config.max_pending_writes,
            });
        }
        Ok(())
    }

    fn enqueue(&mut self, write: PendingWrite) -> Result<(), StorageError> {
        if self.writes.size() >= self.config.max_pending_writes {
            return Err(StorageError::WriteQueueFull {
                capacity: self.config.max_pending_writes,
            });
        }
        if self.writes.push(write).is_err() {
            return Err(StorageError::WriteQueueFull {
                capacity: self.writes.capacity(),
            });
        }
        self.pump_writes();
        Ok(())
    }

    fn enqueue_header(&mut self, session_id: SessionId, state: SessionState) {
        let write = PendingWrite {
            file_id: session_id,
            record_id: HEADER_RECORD,
            word: u32::from(u8::from(state)),
        };
        if let Err(e) = self.enqueue(write) {
            warn!(session_id, ?state, "Session header not persisted: {}", e);
        }
    }

    /// 发出队首写入（若没有在途请求）
    fn pump_writes(&mut self) {
        while !self.write_in_flight && !self.reset_pending {
            let Some(write) = self.writes.first().copied() else {
                return;
            };
            match self
                .flash
                .write_record(write.file_id, write.record_id, &[write.word])
            {
                Ok(()) => self.write_in_flight = true,
                Err(HalError::Busy) => {
                    self.schedule_retry();
                    return;
                },
                Err(e) => {
                    error!(
                        file_id = write.file_id,
                        record_id = write.record_id,
                        "Flash write rejected, record lost: {}",
                        e
                    );
                    self.writes.pop();
                },
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.retry_scheduled {
            return;
        }
        debug!(delay_ms = self.config.retry_delay_ms, "Flash busy, write retry scheduled");
        if self
            .sender
            .emit_delayed(Event::StorageRetry, self.config.retry_delay_ms)
            .is_ok()
        {
            self.retry_scheduled = true;
        }
    }

    // ------------------------------------------------------------------
    // 恢复出厂
    // ------------------------------------------------------------------

    /// 开始两阶段重置；请求被同步拒绝时立即以失败结束
    pub fn reset(&mut self) -> Result<(), StorageError> {
        if self.reset_pending {
            return Err(StorageError::ResetPending);
        }
        info!("Deleting all sessions and laps");
        self.reset_pending = true;
        self.publish();

        if self.write_in_flight {
            debug!("Delete-all waits for the write in flight");
            self.delete_all_deferred = true;
            return Ok(());
        }
        self.request_delete_all().map_err(StorageError::from)
    }

    fn request_delete_all(&mut self) -> Result<(), HalError> {
        let requested = self.flash.delete_all_files();
        if let Err(e) = &requested {
            warn!("Delete-all rejected: {}", e);
            self.finish_reset(false);
        }
        requested
    }

    fn finish_reset(&mut self, success: bool) {
        self.reset_pending = false;
        self.delete_all_deferred = false;
        if success {
            info!("Session history cleared");
            self.initialized = true;
            self.first_session_id = 0;
            self.last_session_id = 0;
            self.last_lap_id = 0;
            self.last_session_completed = true;
            self.current_lap_started = None;
            self.best_lap = None;
            self.last_lap = None;
            self.writes.clear();
        } else {
            warn!("Failed to clear session history");
        }
        self.publish();
        self.emit(Event::ResetStorageResult(StorageResponse::new(
            ResetStorage,
            success,
        )));
        self.pump_writes();
    }

    // ------------------------------------------------------------------
    // 会话生命周期
    // ------------------------------------------------------------------

    /// 开始新会话；上一个会话未结束时先结束它
    pub fn start_session(&mut self, origin: Origin) -> Result<SessionId, StorageError> {
        self.accept_session_events()?;
        let next = self
            .last_session_id
            .checked_add(1)
            .filter(|&id| id < SESSION_ID_CEILING)
            .ok_or(StorageError::SessionIdExhausted {
                ceiling: SESSION_ID_CEILING,
            })?;
        // 新会话头，外加上一个会话的结束头
        let pending = self.last_session_state() == SessionState::Pending;
        self.reserve_writes(if pending { 2 } else { 1 })?;

        if pending {
            self.complete_session(origin);
        }

        if self.first_session_id == 0 {
            self.first_session_id = next;
        }
        self.last_session_id = next;
        self.last_lap_id = 0;
        self.last_session_completed = false;
        self.current_lap_started = None;
        self.best_lap = None;
        self.last_lap = None;
        info!(session_id = next, ?origin, "Session started");

        self.enqueue_header(next, SessionState::Pending);
        self.publish();
        self.emit(Event::SessionStarted {
            session_id: next,
            origin,
        });
        Ok(next)
    }

    /// 结束当前会话；没有进行中的会话时不改变状态，仍回报最后一个会话
    pub fn stop_session(&mut self, origin: Origin) -> Result<SessionId, StorageError> {
        self.accept_session_events()?;
        if self.last_session_state() == SessionState::Pending {
            self.reserve_writes(1)?;
            self.complete_session(origin);
            self.publish();
        } else {
            debug!(?origin, "Stop without a session in progress");
            self.emit(Event::SessionStopped {
                session_id: self.last_session_id,
                origin,
            });
        }
        Ok(self.last_session_id)
    }

    fn complete_session(&mut self, origin: Origin) {
        let session_id = self.last_session_id;
        self.last_session_completed = true;
        self.current_lap_started = None;
        info!(session_id, laps = self.last_lap_id, ?origin, "Session stopped");
        self.enqueue_header(session_id, SessionState::Completed);
        self.emit(Event::SessionStopped { session_id, origin });
    }

    /// 直接追加一圈
    pub fn add_lap_time(&mut self, lap_time: LapTime) -> Result<LapRecord, StorageError> {
        self.accept_session_events()?;
        if self.last_session_state() != SessionState::Pending {
            return Err(StorageError::NoActiveSession);
        }
        Ok(self.append_lap(lap_time))
    }

    /// 处理一次过线：第一次过线开启第 1 圈，之后每次过线结束当前圈
    pub fn record_crossing(&mut self, timestamp_ms: u32) -> Result<Option<LapRecord>, StorageError> {
        self.accept_session_events()?;
        if self.last_session_state() != SessionState::Pending {
            return Err(StorageError::NoActiveSession);
        }
        let Some(started) = self.current_lap_started.replace(timestamp_ms) else {
            debug!(session_id = self.last_session_id, timestamp_ms, "First lap opened");
            self.publish();
            return Ok(None);
        };
        Ok(Some(self.append_lap(timestamp_ms.wrapping_sub(started))))
    }

    fn append_lap(&mut self, lap_time: LapTime) -> LapRecord {
        let session_id = self.last_session_id;
        let lap_id = self.last_lap_id + 1;
        self.last_lap_id = lap_id;

        let lap = Lap { lap_id, lap_time };
        let best = self.best_lap.is_none_or(|b| lap_time < b.lap_time);
        if best {
            self.best_lap = Some(lap);
        }
        self.last_lap = Some(lap);
        info!(session_id, lap_id, lap_time, best, "Lap recorded");

        let write = PendingWrite {
            file_id: session_id,
            record_id: RecordId::from(lap_id),
            word: lap_time,
        };
        if let Err(e) = self.enqueue(write) {
            warn!(session_id, lap_id, "Lap not persisted: {}", e);
        }

        let record = LapRecord {
            session_id,
            lap_id,
            lap_time,
            best,
        };
        self.emit(Event::LapRecorded(record));

        if lap_id == MAX_LAPS {
            info!(session_id, "Lap limit reached");
            self.complete_session(Origin::Device);
        }
        self.publish();
        record
    }

    // ------------------------------------------------------------------
    // 历史查询
    // ------------------------------------------------------------------

    /// 从 `offset` 起的一页会话 ID（会话 ID 连续分配，`offset` 之前的跳过）
    pub fn load_session_ids(
        &self,
        requester: ConnectionId,
        offset: SessionId,
    ) -> StorageResponse<SessionIdPage> {
        let mut page = SessionIdPage::empty(requester);
        if !self.initialized || self.reset_pending {
            return StorageResponse::new(page, false);
        }
        if self.last_session_id == 0 {
            return StorageResponse::new(page, true);
        }

        let start = offset.max(self.first_session_id);
        if start <= self.last_session_id {
            let available = (self.last_session_id - start) as usize + 1;
            let count = available.min(SESSION_ID_PAGE_LEN);
            for (slot, id) in page.ids.iter_mut().zip(start..).take(count) {
                *slot = id;
            }
            page.count = count as u8;
            page.remaining = (available - count) as u16;
        }
        StorageResponse::new(page, true)
    }

    /// 一页会话记录；找不到会话时 `success = false`
    pub fn load_session_record(
        &self,
        requester: ConnectionId,
        session_id: SessionId,
        relation: SessionIdRelation,
        lap_offset: LapId,
    ) -> StorageResponse<SessionRecordPage> {
        let mut page = SessionRecordPage::empty(requester, session_id);
        if !self.initialized || self.reset_pending {
            return StorageResponse::new(page, false);
        }
        let Some(session_id) = self.resolve_session(session_id, relation) else {
            return StorageResponse::new(page, false);
        };

        page.session_id = session_id;
        page.lap_offset = lap_offset;
        if session_id == self.last_session_id {
            page.state = self.last_session_state();
            page.lap_count = self.last_lap_id;
        } else {
            page.state = SessionState::Completed;
            page.lap_count = self.count_laps(session_id);
        }

        let first_lap = lap_offset as usize + 1;
        let last_lap = (page.lap_count as usize).min(lap_offset as usize + LAP_PAGE_LEN);
        let mut count = 0;
        for lap_id in first_lap..=last_lap {
            page.laps[count] = self.read_lap(session_id, lap_id as RecordId).unwrap_or(0);
            count += 1;
        }
        page.count = count as u8;
        StorageResponse::new(page, true)
    }

    fn resolve_session(&self, session_id: SessionId, relation: SessionIdRelation) -> Option<SessionId> {
        if self.last_session_id == 0 {
            return None;
        }
        match relation {
            SessionIdRelation::EqualTo => {
                (session_id >= self.first_session_id
                    && session_id <= self.last_session_id
                    && self.session_exists(session_id))
                .then_some(session_id)
            },
            SessionIdRelation::GreaterOrEqualTo => (session_id.max(self.first_session_id)
                ..=self.last_session_id)
                .find(|&id| self.session_exists(id)),
        }
    }

    fn session_exists(&self, session_id: SessionId) -> bool {
        if session_id == 0 {
            return false;
        }
        self.read_word(session_id, HEADER_RECORD).is_some()
            || self.read_word(session_id, 1).is_some()
    }

    fn count_laps(&self, session_id: SessionId) -> LapId {
        let mut count: LapId = 0;
        while count < MAX_LAPS && self.read_lap(session_id, RecordId::from(count) + 1).is_some() {
            count += 1;
        }
        count
    }

    fn read_lap(&self, session_id: SessionId, lap_id: RecordId) -> Option<LapTime> {
        self.read_word(session_id, lap_id)
    }

    /// 读取一个字，尚未落盘的写入优先
    fn read_word(&self, file_id: FileId, record_id: RecordId) -> Option<u32> {
        let queued = self
            .writes
            .iter()
            .filter(|w| w.file_id == file_id && w.record_id == record_id)
            .last()
            .map(|w| w.word);
        if queued.is_some() {
            return queued;
        }
        let mut word = [0u32; 1];
        match self.flash.read_record(file_id, record_id, &mut word) {
            Ok(1) => Some(word[0]),
            Ok(_) => None,
            Err(HalError::NotFound { .. }) => None,
            Err(e) => {
                warn!(file_id, record_id, "Flash read failed: {}", e);
                None
            },
        }
    }
}

impl<F: FlashStore + Send> EventObserver for SessionStore<F> {
    fn on_event(&mut self, event: &Event) {
        match *event {
            Event::StartSession { origin } => {
                if let Err(e) = self.start_session(origin) {
                    warn!(?origin, "Start session rejected: {}", e);
                }
            },
            Event::StopSession { origin } => {
                if let Err(e) = self.stop_session(origin) {
                    warn!(?origin, "Stop session rejected: {}", e);
                }
            },
            Event::AddLapTime { lap_time_ms } => {
                if let Err(e) = self.add_lap_time(lap_time_ms) {
                    warn!(lap_time_ms, "Lap time rejected: {}", e);
                }
            },
            Event::NewLap { timestamp_ms } => {
                if let Err(e) = self.record_crossing(timestamp_ms) {
                    debug!(timestamp_ms, "Crossing ignored: {}", e);
                }
            },
            Event::ResetStorage => {
                if let Err(e) = self.reset() {
                    warn!("Reset rejected: {}", e);
                }
            },
            Event::LoadSessionIds { requester, offset } => {
                let page = self.load_session_ids(requester, offset);
                self.emit(Event::SessionIdsLoaded(page));
            },
            Event::LoadSessionRecord {
                requester,
                session_id,
                relation,
                lap_offset,
            } => {
                let page = self.load_session_record(requester, session_id, relation, lap_offset);
                self.emit(Event::SessionRecordLoaded(page));
            },
            Event::StorageRetry => {
                self.retry_scheduled = false;
                self.pump_writes();
            },
            Event::Initialized
            | Event::ResetStorageResult(_)
            | Event::SessionIdsLoaded(_)
            | Event::SessionRecordLoaded(_)
            | Event::SessionStarted { .. }
            | Event::SessionStopped { .. }
            | Event::LapRecorded(_)
            | Event::FlashLed { .. } => {},
        }
    }
}
