//! 历史查询帧（ListSessionIDs / GetSessionRecord）
//!
//! 变长响应在解码时根据输入长度计算元素个数：
//! `count = (length - 2) / element_size`，超过编译期容量的输入被拒绝。

use crate::ids::{CommandCode, expect_id};
use crate::types::{
    LapId, LapTime, MAX_LAP_TIMES, MAX_SESSION_IDS, RecordPhase, SessionId, SessionIdRelation,
    SessionState,
};
use crate::{
    Frame, ProtocolError, ensure_capacity, ensure_length, read_u16_le, read_u32_le,
    write_u16_le, write_u32_le,
};

const HEADER_LENGTH: usize = 2;
const SESSION_ID_SIZE: usize = 2;
const LAP_TIME_SIZE: usize = 4;

// ============================================================================
// ListSessionIDs
// ============================================================================

/// ListSessionIDs 请求 (0x06)：ID + 关系字节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ListSessionIdsRequest {
    pub relation: SessionIdRelation,
}

impl ListSessionIdsRequest {
    pub fn new(relation: SessionIdRelation) -> Self {
        Self { relation }
    }
}

impl Frame for ListSessionIdsRequest {
    const MAX_LENGTH: usize = 2;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        ensure_capacity(buf, Self::MAX_LENGTH)?;
        buf[0] = CommandCode::ListSessionIds.request_id();
        buf[1] = self.relation.into();
        Ok(Self::MAX_LENGTH)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, CommandCode::ListSessionIds.request_id())?;
        ensure_length(buf, Self::MAX_LENGTH)?;
        Ok(Self::new(SessionIdRelation::try_from(buf[1])?))
    }
}

/// ListSessionIDs 响应：ID + 剩余数量 + N 个会话 ID（长度 2 + 2N）
///
/// `remaining` 表示本帧之后还有多少个会话 ID 待发送（上限 255）。
#[derive(Debug, Clone, Copy)]
pub struct ListSessionIdsResponse<const N: usize = MAX_SESSION_IDS> {
    remaining: u8,
    ids: [SessionId; N],
    count: usize,
}

impl<const N: usize> ListSessionIdsResponse<N> {
    /// 单帧容量
    pub const CAPACITY: usize = N;

    pub fn new(remaining: u8, session_ids: &[SessionId]) -> Result<Self, ProtocolError> {
        if session_ids.len() > N {
            return Err(ProtocolError::CapacityExceeded {
                count: session_ids.len(),
                capacity: N,
            });
        }
        let mut ids = [0; N];
        ids[..session_ids.len()].copy_from_slice(session_ids);
        Ok(Self {
            remaining,
            ids,
            count: session_ids.len(),
        })
    }

    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    pub fn session_ids(&self) -> &[SessionId] {
        &self.ids[..self.count]
    }

    /// 给定帧长度上限时单帧最多可携带的会话 ID 数
    pub fn fit(max_frame_len: usize) -> usize {
        (max_frame_len.saturating_sub(HEADER_LENGTH) / SESSION_ID_SIZE).min(N)
    }
}

impl<const N: usize> PartialEq for ListSessionIdsResponse<N> {
    fn eq(&self, other: &Self) -> bool {
        self.remaining == other.remaining && self.session_ids() == other.session_ids()
    }
}

impl<const N: usize> Eq for ListSessionIdsResponse<N> {}

impl<const N: usize> Frame for ListSessionIdsResponse<N> {
    const MAX_LENGTH: usize = HEADER_LENGTH + N * SESSION_ID_SIZE;

    fn length(&self) -> usize {
        HEADER_LENGTH + self.count * SESSION_ID_SIZE
    }

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let length = self.length();
        ensure_capacity(buf, length)?;
        buf[0] = CommandCode::ListSessionIds.response_id();
        buf[1] = self.remaining;
        for (i, id) in self.session_ids().iter().enumerate() {
            write_u16_le(buf, HEADER_LENGTH + i * SESSION_ID_SIZE, *id);
        }
        Ok(length)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, CommandCode::ListSessionIds.response_id())?;
        ensure_length(buf, HEADER_LENGTH)?;
        let count = (buf.len() - HEADER_LENGTH) / SESSION_ID_SIZE;
        if count > N {
            return Err(ProtocolError::CapacityExceeded { count, capacity: N });
        }
        let mut ids = [0; N];
        for (i, id) in ids.iter_mut().take(count).enumerate() {
            *id = read_u16_le(buf, HEADER_LENGTH + i * SESSION_ID_SIZE);
        }
        Ok(Self {
            remaining: buf[1],
            ids,
            count,
        })
    }
}

// ============================================================================
// GetSessionRecord
// ============================================================================

/// GetSessionRecord 请求 (0x07)：ID + 会话 ID + 关系 + 圈偏移（5 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GetSessionRecordRequest {
    pub session_id: SessionId,
    pub relation: SessionIdRelation,
    pub lap_offset: u8,
}

impl GetSessionRecordRequest {
    pub fn new(session_id: SessionId, relation: SessionIdRelation, lap_offset: u8) -> Self {
        Self {
            session_id,
            relation,
            lap_offset,
        }
    }
}

impl Frame for GetSessionRecordRequest {
    const MAX_LENGTH: usize = 5;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        ensure_capacity(buf, Self::MAX_LENGTH)?;
        buf[0] = CommandCode::GetSessionRecord.request_id();
        write_u16_le(buf, 1, self.session_id);
        buf[3] = self.relation.into();
        buf[4] = self.lap_offset;
        Ok(Self::MAX_LENGTH)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, CommandCode::GetSessionRecord.request_id())?;
        ensure_length(buf, Self::MAX_LENGTH)?;
        let relation = SessionIdRelation::try_from(buf[3])?;
        Ok(Self::new(read_u16_le(buf, 1), relation, buf[4]))
    }
}

/// 校验 GetSessionRecord 响应的 ID 与阶段字节
fn expect_phase(buf: &[u8], phase: RecordPhase) -> Result<(), ProtocolError> {
    expect_id(buf, CommandCode::GetSessionRecord.response_id())?;
    ensure_length(buf, HEADER_LENGTH)?;
    if buf[1] != phase as u8 {
        return Err(ProtocolError::InvalidValue {
            field: "RecordPhase".to_string(),
            value: buf[1],
        });
    }
    Ok(())
}

/// 会话记录头部（phase = 0）：ID + 阶段 + 会话 ID + 状态 + 圈数（6 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GetSessionRecordHeader {
    pub session_id: SessionId,
    pub state: SessionState,
    pub lap_count: LapId,
}

impl GetSessionRecordHeader {
    pub fn new(session_id: SessionId, state: SessionState, lap_count: LapId) -> Self {
        Self {
            session_id,
            state,
            lap_count,
        }
    }
}

impl Frame for GetSessionRecordHeader {
    const MAX_LENGTH: usize = 6;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        ensure_capacity(buf, Self::MAX_LENGTH)?;
        buf[0] = CommandCode::GetSessionRecord.response_id();
        buf[1] = RecordPhase::Header as u8;
        write_u16_le(buf, 2, self.session_id);
        buf[4] = self.state.into();
        buf[5] = self.lap_count;
        Ok(Self::MAX_LENGTH)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_phase(buf, RecordPhase::Header)?;
        ensure_length(buf, Self::MAX_LENGTH)?;
        let state = SessionState::try_from(buf[4])?;
        Ok(Self::new(read_u16_le(buf, 2), state, buf[5]))
    }
}

/// 会话记录数据（phase = 1）：ID + 阶段 + N 个圈时间（长度 2 + 4N）
#[derive(Debug, Clone, Copy)]
pub struct GetSessionRecordPayload<const N: usize = MAX_LAP_TIMES> {
    laps: [LapTime; N],
    count: usize,
}

impl<const N: usize> GetSessionRecordPayload<N> {
    /// 单帧容量
    pub const CAPACITY: usize = N;

    pub fn new(lap_times: &[LapTime]) -> Result<Self, ProtocolError> {
        if lap_times.len() > N {
            return Err(ProtocolError::CapacityExceeded {
                count: lap_times.len(),
                capacity: N,
            });
        }
        let mut laps = [0; N];
        laps[..lap_times.len()].copy_from_slice(lap_times);
        Ok(Self {
            laps,
            count: lap_times.len(),
        })
    }

    pub fn lap_times(&self) -> &[LapTime] {
        &self.laps[..self.count]
    }

    /// 给定帧长度上限时单帧最多可携带的圈时间数
    pub fn fit(max_frame_len: usize) -> usize {
        (max_frame_len.saturating_sub(HEADER_LENGTH) / LAP_TIME_SIZE).min(N)
    }
}

impl<const N: usize> PartialEq for GetSessionRecordPayload<N> {
    fn eq(&self, other: &Self) -> bool {
        self.lap_times() == other.lap_times()
    }
}

impl<const N: usize> Eq for GetSessionRecordPayload<N> {}

impl<const N: usize> Frame for GetSessionRecordPayload<N> {
    const MAX_LENGTH: usize = HEADER_LENGTH + N * LAP_TIME_SIZE;

    fn length(&self) -> usize {
        HEADER_LENGTH + self.count * LAP_TIME_SIZE
    }

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let length = self.length();
        ensure_capacity(buf, length)?;
        buf[0] = CommandCode::GetSessionRecord.response_id();
        buf[1] = RecordPhase::Payload as u8;
        for (i, lap) in self.lap_times().iter().enumerate() {
            write_u32_le(buf, HEADER_LENGTH + i * LAP_TIME_SIZE, *lap);
        }
        Ok(length)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_phase(buf, RecordPhase::Payload)?;
        let count = (buf.len() - HEADER_LENGTH) / LAP_TIME_SIZE;
        if count > N {
            return Err(ProtocolError::CapacityExceeded { count, capacity: N });
        }
        let mut laps = [0; N];
        for (i, lap) in laps.iter_mut().take(count).enumerate() {
            *lap = read_u32_le(buf, HEADER_LENGTH + i * LAP_TIME_SIZE);
        }
        Ok(Self { laps, count })
    }
}

/// 会话记录空响应（phase = 0xFF）：找不到请求的会话
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetSessionRecordEmpty;

impl Frame for GetSessionRecordEmpty {
    const MAX_LENGTH: usize = 2;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        ensure_capacity(buf, Self::MAX_LENGTH)?;
        buf[0] = CommandCode::GetSessionRecord.response_id();
        buf[1] = RecordPhase::Empty as u8;
        Ok(Self::MAX_LENGTH)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_phase(buf, RecordPhase::Empty)?;
        Ok(GetSessionRecordEmpty)
    }
}

/// 按阶段字节区分的 GetSessionRecord 响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRecordResponse {
    Header(GetSessionRecordHeader),
    Payload(GetSessionRecordPayload),
    Empty,
}

impl SessionRecordResponse {
    pub fn phase(&self) -> RecordPhase {
        match self {
            SessionRecordResponse::Header(_) => RecordPhase::Header,
            SessionRecordResponse::Payload(_) => RecordPhase::Payload,
            SessionRecordResponse::Empty => RecordPhase::Empty,
        }
    }
}

impl Frame for SessionRecordResponse {
    const MAX_LENGTH: usize = GetSessionRecordPayload::<MAX_LAP_TIMES>::MAX_LENGTH;

    fn length(&self) -> usize {
        match self {
            SessionRecordResponse::Header(header) => header.length(),
            SessionRecordResponse::Payload(payload) => payload.length(),
            SessionRecordResponse::Empty => GetSessionRecordEmpty.length(),
        }
    }

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        match self {
            SessionRecordResponse::Header(header) => header.serialize(buf),
            SessionRecordResponse::Payload(payload) => payload.serialize(buf),
            SessionRecordResponse::Empty => GetSessionRecordEmpty.serialize(buf),
        }
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, CommandCode::GetSessionRecord.response_id())?;
        ensure_length(buf, HEADER_LENGTH)?;
        match RecordPhase::try_from(buf[1])? {
            RecordPhase::Header => Ok(SessionRecordResponse::Header(
                GetSessionRecordHeader::deserialize(buf)?,
            )),
            RecordPhase::Payload => Ok(SessionRecordResponse::Payload(
                GetSessionRecordPayload::deserialize(buf)?,
            )),
            RecordPhase::Empty => {
                GetSessionRecordEmpty::deserialize(buf)?;
                Ok(SessionRecordResponse::Empty)
            },
        }
    }
}
