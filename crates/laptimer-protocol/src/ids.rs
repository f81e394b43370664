//! 指令 ID 定义
//!
//! ID 字节布局（LSB first）：
//!
//! ```text
//! Bit 0-5: 指令码 (0x00-0x07)
//! Bit 6  : 通知（Indication）
//! Bit 7  : 响应（Response）
//! ```

use crate::ProtocolError;
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 指令码掩码（低 6 位）
pub const COMMAND_MASK: u8 = 0x3F;
/// 响应标志位
pub const RESPONSE_BIT: u8 = 0x80;
/// 通知标志位
pub const INDICATION_BIT: u8 = 0x40;

/// 指令码（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CommandCode {
    Start = 0x00,
    Stop = 0x01,
    CurrentLapTime = 0x02,
    BestLapTime = 0x03,
    LastLapTime = 0x04,
    LastSessionId = 0x05,
    ListSessionIds = 0x06,
    GetSessionRecord = 0x07,
}

impl CommandCode {
    /// 从指令码解析（不含标志位）
    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        Self::try_from_primitive(code).map_err(|e| ProtocolError::UnknownCommand { id: e.number })
    }

    /// 该指令的请求 ID 字节
    pub fn request_id(self) -> u8 {
        encode_id(self, FrameKind::Request)
    }

    /// 该指令的响应 ID 字节
    pub fn response_id(self) -> u8 {
        encode_id(self, FrameKind::Response)
    }

    /// 该指令的通知 ID 字节
    pub fn indication_id(self) -> u8 {
        encode_id(self, FrameKind::Indication)
    }
}

/// 帧类别：请求、响应、通知三者互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameKind {
    Request,
    Response,
    Indication,
}

/// ID 字节位域
///
/// bilge 默认 LSB first 位序，与帧格式一致。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct CommandIdByte {
    pub code: u6,        // Bit 0-5: 指令码
    pub indication: bool, // Bit 6: 通知
    pub response: bool,   // Bit 7: 响应
}

/// 组合指令码与帧类别为 ID 字节
pub fn encode_id(code: CommandCode, kind: FrameKind) -> u8 {
    let bits = CommandIdByte::new(
        u6::new(u8::from(code)),
        kind == FrameKind::Indication,
        kind == FrameKind::Response,
    );
    u8::from(bits)
}

/// 解析 ID 字节
///
/// 同时置位响应与通知标志的字节不是合法帧。
pub fn decode_id(byte: u8) -> Result<(CommandCode, FrameKind), ProtocolError> {
    let bits = CommandIdByte::from(u8::new(byte));
    let kind = match (bits.response(), bits.indication()) {
        (false, false) => FrameKind::Request,
        (true, false) => FrameKind::Response,
        (false, true) => FrameKind::Indication,
        (true, true) => return Err(ProtocolError::UnknownCommand { id: byte }),
    };
    let code = CommandCode::from_code(bits.code().value())
        .map_err(|_| ProtocolError::UnknownCommand { id: byte })?;
    Ok((code, kind))
}

/// 校验解码输入的 ID 字节
pub(crate) fn expect_id(buf: &[u8], expected: u8) -> Result<(), ProtocolError> {
    crate::ensure_length(buf, 1)?;
    if buf[0] != expected {
        return Err(ProtocolError::InvalidCommandId {
            expected,
            actual: buf[0],
        });
    }
    Ok(())
}

/// 指令族标记
///
/// 泛型帧类型（如 [`crate::EmptyRequest`]）通过该 trait 绑定到具体指令码。
pub trait Opcode {
    const CODE: CommandCode;
}

macro_rules! opcode_marker {
    ($(#[$meta:meta])* $name:ident => $code:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name;

        impl Opcode for $name {
            const CODE: CommandCode = CommandCode::$code;
        }
    };
}

opcode_marker!(
    /// 开始会话 (0x00)
    Start => Start
);
opcode_marker!(
    /// 结束会话 (0x01)
    Stop => Stop
);
opcode_marker!(
    /// 当前圈时间 (0x02)
    CurrentLapTime => CurrentLapTime
);
opcode_marker!(
    /// 最佳圈时间 (0x03)
    BestLapTime => BestLapTime
);
opcode_marker!(
    /// 上一圈时间 (0x04)
    LastLapTime => LastLapTime
);
opcode_marker!(
    /// 最近会话 ID (0x05)
    LastSessionId => LastSessionId
);
