//! # Lap Timer Protocol
//!
//! 计时器与手机之间的二进制指令协议（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 指令码、响应/通知标志位与 ID 字节位域
//! - `types`: 会话状态、会话 ID 关系等枚举与协议常量
//! - `session`: Start / Stop / LastSessionID 指令族
//! - `lap_time`: CurrentLapTime / BestLapTime / LastLapTime 指令族
//! - `history`: ListSessionIDs / GetSessionRecord 指令族
//! - `message`: 按首字节分派的请求与设备消息解码
//!
//! ## 帧格式
//!
//! 每一帧以 1 字节 ID 开头：低 6 位为指令码，Bit 7 表示响应，Bit 6 表示通知。
//! 一帧只能是请求、响应、通知三者之一。
//!
//! ## 字节序
//!
//! 所有多字节字段均为小端字节序（Little Endian）。

pub mod history;
pub mod ids;
pub mod lap_time;
pub mod message;
pub mod session;
pub mod types;

// 重新导出常用类型
pub use history::*;
pub use ids::*;
pub use lap_time::*;
pub use message::*;
pub use session::*;
pub use types::*;

use thiserror::Error;

/// 协议编解码错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Buffer too small: required {required}, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("Invalid command id: expected 0x{expected:02X}, got 0x{actual:02X}")]
    InvalidCommandId { expected: u8, actual: u8 },

    #[error("Unknown command id: 0x{id:02X}")]
    UnknownCommand { id: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },

    #[error("Element count {count} exceeds capacity {capacity}")]
    CapacityExceeded { count: usize, capacity: usize },
}

/// 协议帧的统一编解码接口
///
/// # 约定
///
/// - `serialize` 恰好写入 `length()` 个字节，首字节为 ID；缓冲区小于 `length()` 时失败，
///   且不会写入任何字节。
/// - `deserialize` 先校验 ID 字节（多形态帧还会校验第二个判别字节），
///   所有检查通过后才构造新值，失败时不会产生半成品。
/// - `length() <= MAX_LENGTH`，多形态响应的长度取决于当前状态。
///
/// # 示例
///
/// ```rust
/// use laptimer_protocol::{Frame, StartResponse};
///
/// let response = StartResponse::new(0x3012);
/// let mut buf = [0u8; StartResponse::MAX_LENGTH];
/// let written = response.serialize(&mut buf).unwrap();
/// assert_eq!(&buf[..written], &[0x80, 0x12, 0x30]);
/// assert_eq!(StartResponse::deserialize(&buf).unwrap(), response);
/// ```
pub trait Frame: Sized {
    /// 该帧类型的最大编码长度
    const MAX_LENGTH: usize;

    /// 当前值的编码长度
    fn length(&self) -> usize {
        Self::MAX_LENGTH
    }

    /// 编码到 `buf`，返回写入的字节数
    fn serialize(&self, buf: &mut [u8]) -> Result<usize, ProtocolError>;

    /// 从 `buf` 解码出一个新值
    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError>;

    /// 编码为新分配的字节向量（主机侧调试与测试使用）
    fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.length()];
        match self.serialize(&mut out) {
            Ok(written) => out.truncate(written),
            Err(_) => out.clear(),
        }
        out
    }
}

/// 检查编码缓冲区容量
pub(crate) fn ensure_capacity(buf: &[u8], required: usize) -> Result<(), ProtocolError> {
    if buf.len() < required {
        return Err(ProtocolError::BufferTooSmall {
            required,
            available: buf.len(),
        });
    }
    Ok(())
}

/// 检查解码输入长度
pub(crate) fn ensure_length(buf: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if buf.len() < expected {
        return Err(ProtocolError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// 小端字节序转 u16
pub fn bytes_to_u16_le(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}

/// 小端字节序转 u32
pub fn bytes_to_u32_le(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// u16 转小端字节序
pub fn u16_to_bytes_le(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

/// u32 转小端字节序
pub fn u32_to_bytes_le(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// 从 `buf[offset..offset + 2]` 读取小端 u16（调用方保证长度）
pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    bytes_to_u16_le([buf[offset], buf[offset + 1]])
}

/// 从 `buf[offset..offset + 4]` 读取小端 u32（调用方保证长度）
pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    bytes_to_u32_le([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub(crate) fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&u16_to_bytes_le(value));
}

pub(crate) fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&u32_to_bytes_le(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_u16_le() {
        assert_eq!(bytes_to_u16_le([0x12, 0x30]), 0x3012);
    }

    #[test]
    fn test_bytes_to_u32_le() {
        assert_eq!(bytes_to_u32_le([0x04, 0x03, 0x02, 0x01]), 0x01020304);
    }

    #[test]
    fn test_u16_to_bytes_le() {
        assert_eq!(u16_to_bytes_le(0xFFDD), [0xDD, 0xFF]);
    }

    #[test]
    fn test_u32_to_bytes_le() {
        assert_eq!(u32_to_bytes_le(0x05060708), [0x08, 0x07, 0x06, 0x05]);
    }

    #[test]
    fn test_read_write_at_offset() {
        let mut buf = [0u8; 7];
        write_u16_le(&mut buf, 1, 0xBEEF);
        write_u32_le(&mut buf, 3, 0xDEADC0DE);
        assert_eq!(buf, [0x00, 0xEF, 0xBE, 0xDE, 0xC0, 0xAD, 0xDE]);
        assert_eq!(read_u16_le(&buf, 1), 0xBEEF);
        assert_eq!(read_u32_le(&buf, 3), 0xDEADC0DE);
    }

    #[test]
    fn test_ensure_capacity_reports_sizes() {
        let buf = [0u8; 3];
        assert_eq!(
            ensure_capacity(&buf, 9),
            Err(ProtocolError::BufferTooSmall {
                required: 9,
                available: 3
            })
        );
        assert!(ensure_capacity(&buf, 3).is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidLength {
            expected: 9,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Invalid frame length: expected 9, got 2");

        let err = ProtocolError::InvalidCommandId {
            expected: 0x80,
            actual: 0x40,
        };
        assert!(err.to_string().contains("0x80"));
    }
}
