//! 会话状态快照
//!
//! [`SessionStore`](crate::SessionStore) 每次状态变化后发布一份新的
//! [`SessionSnapshot`]；协议层通过 [`SessionView`] 无锁读取，不需要持有存储。

use arc_swap::ArcSwap;
use laptimer_protocol::{LapId, LapTime, SessionId, SessionState};
use std::sync::Arc;

/// 一圈（圈号 + 圈时）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Lap {
    pub lap_id: LapId,
    pub lap_time: LapTime,
}

/// 存储状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionSnapshot {
    pub initialized: bool,
    pub reset_pending: bool,
    /// 0 表示没有任何会话
    pub first_session_id: SessionId,
    pub last_session_id: SessionId,
    pub last_session_state: SessionState,
    /// 最后一个会话已记录的圈数
    pub lap_count: LapId,
    /// 当前圈的起点（过线时间戳），只在会话进行中且已过线时存在
    pub current_lap_started_ms: Option<u32>,
    pub best_lap: Option<Lap>,
    pub last_lap: Option<Lap>,
}

impl SessionSnapshot {
    pub fn has_session(&self) -> bool {
        self.last_session_id != 0
    }

    /// 最后一个会话是否进行中
    pub fn is_pending(&self) -> bool {
        self.has_session() && self.last_session_state == SessionState::Pending
    }

    /// 已存储的会话数
    pub fn session_count(&self) -> usize {
        if self.has_session() {
            (self.last_session_id - self.first_session_id) as usize + 1
        } else {
            0
        }
    }
}

/// 快照读取端，可克隆
#[derive(Debug, Clone)]
pub struct SessionView(Arc<ArcSwap<SessionSnapshot>>);

impl SessionView {
    pub fn new() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(SessionSnapshot::default())))
    }

    /// 无锁读取最新快照
    pub fn load(&self) -> SessionSnapshot {
        **self.0.load()
    }

    pub(crate) fn publish(&self, snapshot: SessionSnapshot) {
        self.0.store(Arc::new(snapshot));
    }
}

impl Default for SessionView {
    fn default() -> Self {
        Self::new()
    }
}
