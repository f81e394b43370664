//! 会话控制帧
//!
//! 包含只有 ID 字节的请求帧、Start/Stop 的响应与通知，以及 LastSessionID 指令族。

use crate::ids::{LastSessionId, Opcode, Start, Stop, expect_id};
use crate::types::{SessionId, SessionState};
use crate::{
    BestLapTime, CurrentLapTime, Frame, LastLapTime, ProtocolError, ensure_capacity,
    ensure_length, read_u16_le, write_u16_le,
};
use std::marker::PhantomData;

// ============================================================================
// 仅含 ID 的请求帧
// ============================================================================

/// 只有 1 字节 ID 的请求帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmptyRequest<O: Opcode> {
    _opcode: PhantomData<O>,
}

impl<O: Opcode> EmptyRequest<O> {
    pub fn new() -> Self {
        Self {
            _opcode: PhantomData,
        }
    }
}

impl<O: Opcode> Frame for EmptyRequest<O> {
    const MAX_LENGTH: usize = 1;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        ensure_capacity(buf, 1)?;
        buf[0] = O::CODE.request_id();
        Ok(1)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, O::CODE.request_id())?;
        Ok(Self::new())
    }
}

pub type StartRequest = EmptyRequest<Start>;
pub type StopRequest = EmptyRequest<Stop>;
pub type CurrentLapTimeRequest = EmptyRequest<CurrentLapTime>;
pub type BestLapTimeRequest = EmptyRequest<BestLapTime>;
pub type LastLapTimeRequest = EmptyRequest<LastLapTime>;
pub type LastSessionIdRequest = EmptyRequest<LastSessionId>;

// ============================================================================
// Start / Stop 响应与通知
// ============================================================================

/// 响应中携带会话 ID 的会话控制指令（Start / Stop）
pub trait SessionControl: Opcode {}

impl SessionControl for Start {}
impl SessionControl for Stop {}

/// 会话控制响应：ID + 会话 ID（3 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdResponse<O: SessionControl> {
    pub session_id: SessionId,
    _opcode: PhantomData<O>,
}

/// 会话控制通知：ID + 会话 ID（3 字节），推送给未发起请求的连接
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdIndication<O: SessionControl> {
    pub session_id: SessionId,
    _opcode: PhantomData<O>,
}

macro_rules! session_id_frame {
    ($ty:ident, $id:ident) => {
        impl<O: SessionControl> $ty<O> {
            pub fn new(session_id: SessionId) -> Self {
                Self {
                    session_id,
                    _opcode: PhantomData,
                }
            }
        }

        impl<O: SessionControl> Frame for $ty<O> {
            const MAX_LENGTH: usize = 3;

            fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
                ensure_capacity(buf, Self::MAX_LENGTH)?;
                buf[0] = O::CODE.$id();
                write_u16_le(buf, 1, self.session_id);
                Ok(Self::MAX_LENGTH)
            }

            fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
                expect_id(buf, O::CODE.$id())?;
                ensure_length(buf, Self::MAX_LENGTH)?;
                Ok(Self::new(read_u16_le(buf, 1)))
            }
        }
    };
}

session_id_frame!(SessionIdResponse, response_id);
session_id_frame!(SessionIdIndication, indication_id);

pub type StartResponse = SessionIdResponse<Start>;
pub type StartIndication = SessionIdIndication<Start>;
pub type StopResponse = SessionIdResponse<Stop>;
pub type StopIndication = SessionIdIndication<Stop>;

// ============================================================================
// LastSessionID
// ============================================================================

/// LastSessionID 响应：ID + 会话 ID + 状态（4 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LastSessionIdResponse {
    pub session_id: SessionId,
    pub state: SessionState,
}

impl LastSessionIdResponse {
    pub fn new(session_id: SessionId, state: SessionState) -> Self {
        Self { session_id, state }
    }
}

impl Frame for LastSessionIdResponse {
    const MAX_LENGTH: usize = 4;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        ensure_capacity(buf, Self::MAX_LENGTH)?;
        buf[0] = LastSessionId::CODE.response_id();
        write_u16_le(buf, 1, self.session_id);
        buf[3] = self.state.into();
        Ok(Self::MAX_LENGTH)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, LastSessionId::CODE.response_id())?;
        ensure_length(buf, Self::MAX_LENGTH)?;
        let state = SessionState::try_from(buf[3])?;
        Ok(Self::new(read_u16_le(buf, 1), state))
    }
}

/// LastSessionID 通知：状态字段固定为 Pending（4 字节）
///
/// 只在会话进行中时推送，用于让刚连接的手机得知正在进行的会话。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LastSessionIdIndication {
    pub session_id: SessionId,
}

impl LastSessionIdIndication {
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }
}

impl Frame for LastSessionIdIndication {
    const MAX_LENGTH: usize = 4;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        ensure_capacity(buf, Self::MAX_LENGTH)?;
        buf[0] = LastSessionId::CODE.indication_id();
        write_u16_le(buf, 1, self.session_id);
        buf[3] = SessionState::Pending.into();
        Ok(Self::MAX_LENGTH)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, LastSessionId::CODE.indication_id())?;
        ensure_length(buf, Self::MAX_LENGTH)?;
        if buf[3] != u8::from(SessionState::Pending) {
            return Err(ProtocolError::InvalidValue {
                field: "SessionState".to_string(),
                value: buf[3],
            });
        }
        Ok(Self::new(read_u16_le(buf, 1)))
    }
}
