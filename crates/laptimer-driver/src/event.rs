//! 事件类型
//!
//! [`Event`] 是一个封闭的和类型，涵盖会话生命周期请求、存储生命周期与
//! 分页加载、以及设备本地事件（过线、LED）。所有变体都是 `Copy` 的定长值，
//! 可以直接放入定容队列与定时器槽位。
//!
//! 处理事件时应使用穷尽匹配，新增变体会在编译期暴露所有未处理的位置。

use laptimer_hal::ConnectionId;
use laptimer_protocol::{LapId, LapTime, SessionId, SessionIdRelation, SessionState};

/// 单页会话 ID 数量
pub const SESSION_ID_PAGE_LEN: usize = 16;

/// 单页圈时间数量
pub const LAP_PAGE_LEN: usize = 8;

/// 会话控制请求的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// 设备本地（按键、自动结束）
    Device,
    /// 某个对端连接
    Connection(ConnectionId),
}

/// 存储请求的完成结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageResponse<T> {
    pub value: T,
    pub success: bool,
}

impl<T> StorageResponse<T> {
    pub fn new(value: T, success: bool) -> Self {
        Self { value, success }
    }
}

/// 恢复出厂（删除全部会话）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetStorage;

/// 一页会话 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdPage {
    pub requester: ConnectionId,
    pub ids: [SessionId; SESSION_ID_PAGE_LEN],
    pub count: u8,
    /// 本页之后还剩的会话数
    pub remaining: u16,
}

impl SessionIdPage {
    pub fn empty(requester: ConnectionId) -> Self {
        Self {
            requester,
            ids: [0; SESSION_ID_PAGE_LEN],
            count: 0,
            remaining: 0,
        }
    }

    pub fn session_ids(&self) -> &[SessionId] {
        &self.ids[..self.count as usize]
    }
}

/// 一页会话记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRecordPage {
    pub requester: ConnectionId,
    pub session_id: SessionId,
    pub state: SessionState,
    pub lap_count: LapId,
    /// 本页第一圈的偏移（0 起）
    pub lap_offset: LapId,
    pub laps: [LapTime; LAP_PAGE_LEN],
    pub count: u8,
}

impl SessionRecordPage {
    pub fn empty(requester: ConnectionId, session_id: SessionId) -> Self {
        Self {
            requester,
            session_id,
            state: SessionState::Completed,
            lap_count: 0,
            lap_offset: 0,
            laps: [0; LAP_PAGE_LEN],
            count: 0,
        }
    }

    pub fn lap_times(&self) -> &[LapTime] {
        &self.laps[..self.count as usize]
    }

    /// 本页之后是否还有圈
    pub fn has_more(&self) -> bool {
        (self.lap_offset as usize + self.count as usize) < self.lap_count as usize
    }
}

/// 已写入的一圈
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapRecord {
    pub session_id: SessionId,
    pub lap_id: LapId,
    pub lap_time: LapTime,
    /// 是否刷新了本会话最佳圈
    pub best: bool,
}

/// 总线事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // 会话生命周期请求
    StartSession {
        origin: Origin,
    },
    StopSession {
        origin: Origin,
    },
    AddLapTime {
        lap_time_ms: LapTime,
    },

    // 存储生命周期
    Initialized,
    ResetStorage,
    ResetStorageResult(StorageResponse<ResetStorage>),
    LoadSessionIds {
        requester: ConnectionId,
        offset: SessionId,
    },
    SessionIdsLoaded(StorageResponse<SessionIdPage>),
    LoadSessionRecord {
        requester: ConnectionId,
        session_id: SessionId,
        relation: SessionIdRelation,
        lap_offset: LapId,
    },
    SessionRecordLoaded(StorageResponse<SessionRecordPage>),
    SessionStarted {
        session_id: SessionId,
        origin: Origin,
    },
    SessionStopped {
        session_id: SessionId,
        origin: Origin,
    },
    LapRecorded(LapRecord),
    /// 重试被拒绝的 Flash 写入
    StorageRetry,

    // 设备本地
    NewLap {
        timestamp_ms: u32,
    },
    FlashLed {
        led_id: u8,
        delay_ms: u8,
    },
}

const _: () = assert!(std::mem::size_of::<Event>() < 64);
