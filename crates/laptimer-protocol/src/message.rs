//! 按首字节分派的帧解码
//!
//! - [`Request`]: 手机发往计时器的请求
//! - [`DeviceMessage`]: 计时器发往手机的响应与通知

use crate::history::{
    GetSessionRecordRequest, ListSessionIdsRequest, ListSessionIdsResponse, SessionRecordResponse,
};
use crate::ids::{CommandCode, FrameKind, decode_id};
use crate::lap_time::{
    BestLapTimeIndication, BestLapTimeResponse, CurrentLapTimeResponse, LastLapTimeIndication,
    LastLapTimeResponse,
};
use crate::session::{
    BestLapTimeRequest, CurrentLapTimeRequest, LastLapTimeRequest, LastSessionIdIndication,
    LastSessionIdRequest, LastSessionIdResponse, StartIndication, StartRequest, StartResponse,
    StopIndication, StopRequest, StopResponse,
};
use crate::{Frame, ProtocolError, ensure_length};

/// 入站请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Start,
    Stop,
    CurrentLapTime,
    BestLapTime,
    LastLapTime,
    LastSessionId,
    ListSessionIds(ListSessionIdsRequest),
    GetSessionRecord(GetSessionRecordRequest),
}

impl Request {
    /// 解码一帧请求
    ///
    /// 非请求类别（响应/通知）或未知指令码的帧被拒绝。
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        ensure_length(buf, 1)?;
        let (code, kind) = decode_id(buf[0])?;
        if kind != FrameKind::Request {
            return Err(ProtocolError::UnknownCommand { id: buf[0] });
        }
        let request = match code {
            CommandCode::Start => {
                StartRequest::deserialize(buf)?;
                Request::Start
            },
            CommandCode::Stop => {
                StopRequest::deserialize(buf)?;
                Request::Stop
            },
            CommandCode::CurrentLapTime => {
                CurrentLapTimeRequest::deserialize(buf)?;
                Request::CurrentLapTime
            },
            CommandCode::BestLapTime => {
                BestLapTimeRequest::deserialize(buf)?;
                Request::BestLapTime
            },
            CommandCode::LastLapTime => {
                LastLapTimeRequest::deserialize(buf)?;
                Request::LastLapTime
            },
            CommandCode::LastSessionId => {
                LastSessionIdRequest::deserialize(buf)?;
                Request::LastSessionId
            },
            CommandCode::ListSessionIds => {
                Request::ListSessionIds(ListSessionIdsRequest::deserialize(buf)?)
            },
            CommandCode::GetSessionRecord => {
                Request::GetSessionRecord(GetSessionRecordRequest::deserialize(buf)?)
            },
        };
        Ok(request)
    }

    pub fn code(&self) -> CommandCode {
        match self {
            Request::Start => CommandCode::Start,
            Request::Stop => CommandCode::Stop,
            Request::CurrentLapTime => CommandCode::CurrentLapTime,
            Request::BestLapTime => CommandCode::BestLapTime,
            Request::LastLapTime => CommandCode::LastLapTime,
            Request::LastSessionId => CommandCode::LastSessionId,
            Request::ListSessionIds(_) => CommandCode::ListSessionIds,
            Request::GetSessionRecord(_) => CommandCode::GetSessionRecord,
        }
    }

    /// 编码为字节向量
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            Request::Start => StartRequest::new().to_vec(),
            Request::Stop => StopRequest::new().to_vec(),
            Request::CurrentLapTime => CurrentLapTimeRequest::new().to_vec(),
            Request::BestLapTime => BestLapTimeRequest::new().to_vec(),
            Request::LastLapTime => LastLapTimeRequest::new().to_vec(),
            Request::LastSessionId => LastSessionIdRequest::new().to_vec(),
            Request::ListSessionIds(request) => request.to_vec(),
            Request::GetSessionRecord(request) => request.to_vec(),
        }
    }
}

/// 计时器发出的响应或通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMessage {
    StartResponse(StartResponse),
    StartIndication(StartIndication),
    StopResponse(StopResponse),
    StopIndication(StopIndication),
    CurrentLapTime(CurrentLapTimeResponse),
    BestLapTime(BestLapTimeResponse),
    BestLapTimeIndication(BestLapTimeIndication),
    LastLapTime(LastLapTimeResponse),
    LastLapTimeIndication(LastLapTimeIndication),
    LastSessionId(LastSessionIdResponse),
    LastSessionIdIndication(LastSessionIdIndication),
    ListSessionIds(ListSessionIdsResponse),
    SessionRecord(SessionRecordResponse),
}

impl DeviceMessage {
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        ensure_length(buf, 1)?;
        let (code, kind) = decode_id(buf[0])?;
        let message = match (code, kind) {
            (CommandCode::Start, FrameKind::Response) => {
                DeviceMessage::StartResponse(StartResponse::deserialize(buf)?)
            },
            (CommandCode::Start, FrameKind::Indication) => {
                DeviceMessage::StartIndication(StartIndication::deserialize(buf)?)
            },
            (CommandCode::Stop, FrameKind::Response) => {
                DeviceMessage::StopResponse(StopResponse::deserialize(buf)?)
            },
            (CommandCode::Stop, FrameKind::Indication) => {
                DeviceMessage::StopIndication(StopIndication::deserialize(buf)?)
            },
            (CommandCode::CurrentLapTime, FrameKind::Response) => {
                DeviceMessage::CurrentLapTime(CurrentLapTimeResponse::deserialize(buf)?)
            },
            (CommandCode::BestLapTime, FrameKind::Response) => {
                DeviceMessage::BestLapTime(BestLapTimeResponse::deserialize(buf)?)
            },
            (CommandCode::BestLapTime, FrameKind::Indication) => {
                DeviceMessage::BestLapTimeIndication(BestLapTimeIndication::deserialize(buf)?)
            },
            (CommandCode::LastLapTime, FrameKind::Response) => {
                DeviceMessage::LastLapTime(LastLapTimeResponse::deserialize(buf)?)
            },
            (CommandCode::LastLapTime, FrameKind::Indication) => {
                DeviceMessage::LastLapTimeIndication(LastLapTimeIndication::deserialize(buf)?)
            },
            (CommandCode::LastSessionId, FrameKind::Response) => {
                DeviceMessage::LastSessionId(LastSessionIdResponse::deserialize(buf)?)
            },
            (CommandCode::LastSessionId, FrameKind::Indication) => {
                DeviceMessage::LastSessionIdIndication(LastSessionIdIndication::deserialize(buf)?)
            },
            (CommandCode::ListSessionIds, FrameKind::Response) => {
                DeviceMessage::ListSessionIds(ListSessionIdsResponse::deserialize(buf)?)
            },
            (CommandCode::GetSessionRecord, FrameKind::Response) => {
                DeviceMessage::SessionRecord(SessionRecordResponse::deserialize(buf)?)
            },
            _ => return Err(ProtocolError::UnknownCommand { id: buf[0] }),
        };
        Ok(message)
    }
}
