//! 圈时间帧（CurrentLapTime / BestLapTime / LastLapTime）
//!
//! 响应有两种形态：
//!
//! ```text
//! Completed: [id, 0x01]                                        2 字节
//! Pending:   [id, 0x00, session_id(2), lap_id(1), lap_time(4)] 9 字节
//! ```
//!
//! 会话已结束时只回 2 字节的“无数据”响应，不携带过期字段。

use crate::ids::{BestLapTime, CurrentLapTime, LastLapTime, Opcode, expect_id};
use crate::types::{LapId, LapTime, SessionId, SessionState};
use crate::{
    Frame, ProtocolError, ensure_capacity, ensure_length, read_u16_le, read_u32_le,
    write_u16_le, write_u32_le,
};
use std::marker::PhantomData;

const COMPLETED_LENGTH: usize = 2;
const PENDING_LENGTH: usize = 9;

/// 返回圈时间的查询指令
pub trait LapTimeQuery: Opcode {}

impl LapTimeQuery for CurrentLapTime {}
impl LapTimeQuery for BestLapTime {}
impl LapTimeQuery for LastLapTime {}

/// 会主动推送圈时间通知的指令（CurrentLapTime 没有通知）
pub trait LapTimeFeed: LapTimeQuery {}

impl LapTimeFeed for BestLapTime {}
impl LapTimeFeed for LastLapTime {}

/// 圈时间内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LapTimeReport {
    /// 会话已结束（或尚无数据）
    Completed,
    /// 进行中会话的圈时间
    Pending {
        session_id: SessionId,
        lap_id: LapId,
        lap_time: LapTime,
    },
}

impl LapTimeReport {
    pub fn state(&self) -> SessionState {
        match self {
            LapTimeReport::Completed => SessionState::Completed,
            LapTimeReport::Pending { .. } => SessionState::Pending,
        }
    }
}

/// 圈时间响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapTimeResponse<O: LapTimeQuery> {
    pub report: LapTimeReport,
    _opcode: PhantomData<O>,
}

impl<O: LapTimeQuery> LapTimeResponse<O> {
    pub fn new(report: LapTimeReport) -> Self {
        Self {
            report,
            _opcode: PhantomData,
        }
    }

    /// 进行中会话的 9 字节响应
    pub fn pending(session_id: SessionId, lap_id: LapId, lap_time: LapTime) -> Self {
        Self::new(LapTimeReport::Pending {
            session_id,
            lap_id,
            lap_time,
        })
    }

    /// 已结束会话的 2 字节响应
    pub fn completed() -> Self {
        Self::new(LapTimeReport::Completed)
    }

    pub fn state(&self) -> SessionState {
        self.report.state()
    }
}

impl<O: LapTimeQuery> Frame for LapTimeResponse<O> {
    const MAX_LENGTH: usize = PENDING_LENGTH;

    fn length(&self) -> usize {
        match self.report {
            LapTimeReport::Completed => COMPLETED_LENGTH,
            LapTimeReport::Pending { .. } => PENDING_LENGTH,
        }
    }

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let length = self.length();
        ensure_capacity(buf, length)?;
        buf[0] = O::CODE.response_id();
        buf[1] = self.state().into();
        if let LapTimeReport::Pending {
            session_id,
            lap_id,
            lap_time,
        } = self.report
        {
            write_u16_le(buf, 2, session_id);
            buf[4] = lap_id;
            write_u32_le(buf, 5, lap_time);
        }
        Ok(length)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, O::CODE.response_id())?;
        ensure_length(buf, COMPLETED_LENGTH)?;
        match SessionState::try_from(buf[1])? {
            SessionState::Completed => Ok(Self::completed()),
            SessionState::Pending => {
                ensure_length(buf, PENDING_LENGTH)?;
                Ok(Self::pending(
                    read_u16_le(buf, 2),
                    buf[4],
                    read_u32_le(buf, 5),
                ))
            },
        }
    }
}

/// 圈时间通知，始终为 9 字节的进行中形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapTimeIndication<O: LapTimeFeed> {
    pub session_id: SessionId,
    pub lap_id: LapId,
    pub lap_time: LapTime,
    _opcode: PhantomData<O>,
}

impl<O: LapTimeFeed> LapTimeIndication<O> {
    pub fn new(session_id: SessionId, lap_id: LapId, lap_time: LapTime) -> Self {
        Self {
            session_id,
            lap_id,
            lap_time,
            _opcode: PhantomData,
        }
    }
}

impl<O: LapTimeFeed> Frame for LapTimeIndication<O> {
    const MAX_LENGTH: usize = PENDING_LENGTH;

    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        ensure_capacity(buf, PENDING_LENGTH)?;
        buf[0] = O::CODE.indication_id();
        buf[1] = SessionState::Pending.into();
        write_u16_le(buf, 2, self.session_id);
        buf[4] = self.lap_id;
        write_u32_le(buf, 5, self.lap_time);
        Ok(PENDING_LENGTH)
    }

    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        expect_id(buf, O::CODE.indication_id())?;
        ensure_length(buf, PENDING_LENGTH)?;
        if SessionState::try_from(buf[1])? != SessionState::Pending {
            return Err(ProtocolError::InvalidValue {
                field: "SessionState".to_string(),
                value: buf[1],
            });
        }
        Ok(Self::new(read_u16_le(buf, 2), buf[4], read_u32_le(buf, 5)))
    }
}

pub type CurrentLapTimeResponse = LapTimeResponse<CurrentLapTime>;
pub type BestLapTimeResponse = LapTimeResponse<BestLapTime>;
pub type BestLapTimeIndication = LapTimeIndication<BestLapTime>;
pub type LastLapTimeResponse = LapTimeResponse<LastLapTime>;
pub type LastLapTimeIndication = LapTimeIndication<LastLapTime>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_lap_time_pending() {
        let response = CurrentLapTimeResponse::pending(0x3012, 0xDD, 0x80);
        assert_eq!(response.length(), 9);
        assert_eq!(
            response.to_vec(),
            vec![0x82, 0x00, 0x12, 0x30, 0xDD, 0x80, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            CurrentLapTimeResponse::deserialize(&response.to_vec()).unwrap(),
            response
        );
    }

    #[test]
    fn test_current_lap_time_completed() {
        let response = CurrentLapTimeResponse::completed();
        assert_eq!(response.length(), 2);
        assert_eq!(response.to_vec(), vec![0x82, 0x01]);

        // 2 字节输入不会读取会话字段
        let decoded = CurrentLapTimeResponse::deserialize(&[0x82, 0x01]).unwrap();
        assert_eq!(decoded.report, LapTimeReport::Completed);
    }

    #[test]
    fn test_completed_fits_small_buffer() {
        let mut buf = [0u8; 2];
        assert_eq!(
            BestLapTimeResponse::completed().serialize(&mut buf).unwrap(),
            2
        );
        assert_eq!(buf, [0x83, 0x01]);
        assert!(
            BestLapTimeResponse::pending(1, 1, 1)
                .serialize(&mut buf)
                .is_err()
        );
    }

    #[test]
    fn test_pending_needs_full_length() {
        assert!(matches!(
            LastLapTimeResponse::deserialize(&[0x84, 0x00, 0x12]),
            Err(ProtocolError::InvalidLength {
                expected: 9,
                actual: 3
            })
        ));
        assert!(LastLapTimeResponse::deserialize(&[0x84, 0x02]).is_err());
    }

    #[test]
    fn test_best_and_last_ids() {
        assert_eq!(BestLapTimeResponse::completed().to_vec()[0], 0x83);
        assert_eq!(LastLapTimeResponse::completed().to_vec()[0], 0x84);
        assert_eq!(BestLapTimeIndication::new(1, 2, 3).to_vec()[0], 0x43);
        assert_eq!(LastLapTimeIndication::new(1, 2, 3).to_vec()[0], 0x44);
    }

    #[test]
    fn test_indication_roundtrip_and_state_check() {
        let indication = LastLapTimeIndication::new(0x3012, 0xDD, 0x80);
        let bytes = indication.to_vec();
        assert_eq!(
            bytes,
            vec![0x44, 0x00, 0x12, 0x30, 0xDD, 0x80, 0x00, 0x00, 0x00]
        );
        assert_eq!(LastLapTimeIndication::deserialize(&bytes).unwrap(), indication);

        let mut completed = bytes.clone();
        completed[1] = 0x01;
        assert!(LastLapTimeIndication::deserialize(&completed).is_err());
    }
}
