//! 协议字段类型与常量

use crate::ProtocolError;

/// 会话 ID（16 位，单调递增）
pub type SessionId = u16;
/// 圈序号（从 1 开始）
pub type LapId = u8;
/// 圈时间（毫秒）
pub type LapTime = u32;

/// ListSessionIDs 响应单帧可携带的最大会话 ID 数
pub const MAX_SESSION_IDS: usize = 64;
/// GetSessionRecord 数据帧单帧可携带的最大圈时间数
pub const MAX_LAP_TIMES: usize = 32;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SessionState {
    /// 进行中
    Pending = 0x00,
    /// 已结束
    #[default]
    Completed = 0x01,
}

impl TryFrom<u8> for SessionState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SessionState::Pending),
            0x01 => Ok(SessionState::Completed),
            _ => Err(ProtocolError::InvalidValue {
                field: "SessionState".to_string(),
                value,
            }),
        }
    }
}

impl From<SessionState> for u8 {
    fn from(state: SessionState) -> Self {
        state as u8
    }
}

/// 会话 ID 匹配关系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SessionIdRelation {
    /// 精确匹配
    #[default]
    EqualTo = 0x00,
    /// 大于等于
    GreaterOrEqualTo = 0x01,
}

impl TryFrom<u8> for SessionIdRelation {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SessionIdRelation::EqualTo),
            0x01 => Ok(SessionIdRelation::GreaterOrEqualTo),
            _ => Err(ProtocolError::InvalidValue {
                field: "SessionIdRelation".to_string(),
                value,
            }),
        }
    }
}

impl From<SessionIdRelation> for u8 {
    fn from(relation: SessionIdRelation) -> Self {
        relation as u8
    }
}

/// GetSessionRecord 响应阶段
///
/// 一条会话记录可能拆成多帧发送：先发送头部，再发送若干数据帧；
/// 找不到会话时只发送一个空响应。接收方按阶段字节重组。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum RecordPhase {
    Header = 0x00,
    Payload = 0x01,
    Empty = 0xFF,
}

impl TryFrom<u8> for RecordPhase {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(RecordPhase::Header),
            0x01 => Ok(RecordPhase::Payload),
            0xFF => Ok(RecordPhase::Empty),
            _ => Err(ProtocolError::InvalidValue {
                field: "RecordPhase".to_string(),
                value,
            }),
        }
    }
}
