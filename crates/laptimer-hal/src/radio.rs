//! 无线链路协作者
//!
//! 核心只需要三件事：当前协商的 MTU、对端身份、`send(bytes)`。
//! 上行数据、连接/断开、MTU 变化、发送完成通过 [`RadioEvent`] 消息送达主循环。

use crate::HalError;
use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

/// 连接句柄
pub type ConnectionId = u16;

/// 默认 ATT MTU
pub const DEFAULT_MTU: u16 = 23;

/// ATT 协议头长度，单帧有效载荷 = MTU - 3
pub const ATT_HEADER_LEN: u16 = 3;

/// 对端地址（6 字节 MAC）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerAddress(pub [u8; 6]);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// 一条对端连接
pub trait RadioLink: Send {
    fn connection_id(&self) -> ConnectionId;

    fn peer_address(&self) -> PeerAddress;

    /// 当前协商的 MTU
    fn mtu(&self) -> u16;

    /// 单帧最大长度（MTU 扣除 ATT 头）
    fn max_frame_len(&self) -> usize {
        self.mtu().saturating_sub(ATT_HEADER_LEN) as usize
    }

    /// 发送一帧；`Err(HalError::Busy)` 表示发送缓冲已满，等待 `TxComplete` 后重试
    fn send(&mut self, data: &[u8]) -> Result<(), HalError>;
}

impl<L: RadioLink + ?Sized> RadioLink for Box<L> {
    fn connection_id(&self) -> ConnectionId {
        (**self).connection_id()
    }

    fn peer_address(&self) -> PeerAddress {
        (**self).peer_address()
    }

    fn mtu(&self) -> u16 {
        (**self).mtu()
    }

    fn max_frame_len(&self) -> usize {
        (**self).max_frame_len()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), HalError> {
        (**self).send(data)
    }
}

/// 无线协作者上行消息
pub enum RadioEvent {
    /// 新连接建立，携带发送句柄
    Connected(Box<dyn RadioLink>),
    Disconnected {
        connection: ConnectionId,
    },
    MtuChanged {
        connection: ConnectionId,
        mtu: u16,
    },
    /// 对端写入的一帧
    Write {
        connection: ConnectionId,
        data: Bytes,
    },
    /// 上一批发送已完成，可以继续发送
    TxComplete {
        connection: ConnectionId,
    },
}

impl fmt::Debug for RadioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioEvent::Connected(link) => f
                .debug_struct("Connected")
                .field("connection", &link.connection_id())
                .field("peer", &link.peer_address())
                .field("mtu", &link.mtu())
                .finish(),
            RadioEvent::Disconnected { connection } => f
                .debug_struct("Disconnected")
                .field("connection", connection)
                .finish(),
            RadioEvent::MtuChanged { connection, mtu } => f
                .debug_struct("MtuChanged")
                .field("connection", connection)
                .field("mtu", mtu)
                .finish(),
            RadioEvent::Write { connection, data } => f
                .debug_struct("Write")
                .field("connection", connection)
                .field("len", &data.len())
                .finish(),
            RadioEvent::TxComplete { connection } => f
                .debug_struct("TxComplete")
                .field("connection", connection)
                .finish(),
        }
    }
}

/// 共享的 MTU 值，可在无线上下文中无锁更新
#[derive(Debug, Clone)]
pub struct SharedMtu(Arc<AtomicU16>);

impl SharedMtu {
    pub fn new(mtu: u16) -> Self {
        Self(Arc::new(AtomicU16::new(mtu)))
    }

    pub fn get(&self) -> u16 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, mtu: u16) {
        self.0.store(mtu, Ordering::Relaxed);
    }
}

impl Default for SharedMtu {
    fn default() -> Self {
        Self::new(DEFAULT_MTU)
    }
}

/// 基于 crossbeam channel 的主机链路
///
/// 每帧作为一个 [`Bytes`] 投递给对端；队列满时返回 `Busy`。
#[derive(Debug, Clone)]
pub struct ChannelLink {
    connection: ConnectionId,
    peer: PeerAddress,
    mtu: SharedMtu,
    tx: Sender<Bytes>,
}

impl ChannelLink {
    pub fn new(connection: ConnectionId, peer: PeerAddress, mtu: SharedMtu, tx: Sender<Bytes>) -> Self {
        Self {
            connection,
            peer,
            mtu,
            tx,
        }
    }
}

impl RadioLink for ChannelLink {
    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn peer_address(&self) -> PeerAddress {
        self.peer
    }

    fn mtu(&self) -> u16 {
        self.mtu.get()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), HalError> {
        if data.len() > self.max_frame_len() {
            return Err(HalError::InvalidArgument(format!(
                "frame of {} bytes exceeds MTU {}",
                data.len(),
                self.mtu()
            )));
        }
        match self.tx.try_send(Bytes::copy_from_slice(data)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(HalError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(HalError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    const PEER: PeerAddress = PeerAddress([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]);

    #[test]
    fn test_peer_address_display() {
        assert_eq!(PEER.to_string(), "C0:FF:EE:00:00:01");
    }

    #[test]
    fn test_channel_link_send_and_busy() {
        let (tx, rx) = bounded(1);
        let mut link = ChannelLink::new(1, PEER, SharedMtu::default(), tx);

        assert!(link.send(&[0x80, 0x01, 0x00]).is_ok());
        assert!(matches!(link.send(&[0x81, 0x01, 0x00]), Err(HalError::Busy)));
        assert_eq!(rx.recv().unwrap().as_ref(), &[0x80, 0x01, 0x00]);
        assert!(link.send(&[0x81, 0x01, 0x00]).is_ok());
    }

    #[test]
    fn test_channel_link_rejects_oversized_frame() {
        let (tx, _rx) = bounded(4);
        let mtu = SharedMtu::new(DEFAULT_MTU);
        let mut link = ChannelLink::new(1, PEER, mtu.clone(), tx);
        assert_eq!(link.max_frame_len(), 20);
        assert!(matches!(
            link.send(&[0u8; 21]),
            Err(HalError::InvalidArgument(_))
        ));

        // MTU 更新对链路立即可见
        mtu.set(64);
        assert_eq!(link.max_frame_len(), 61);
        assert!(link.send(&[0u8; 21]).is_ok());
    }

    #[test]
    fn test_channel_link_disconnected() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let mut link = ChannelLink::new(2, PEER, SharedMtu::default(), tx);
        assert!(matches!(link.send(&[0x00]), Err(HalError::Disconnected)));
    }

    #[test]
    fn test_boxed_link_delegates() {
        let (tx, _rx) = bounded(1);
        let link: Box<dyn RadioLink> = Box::new(ChannelLink::new(9, PEER, SharedMtu::new(50), tx));
        assert_eq!(link.connection_id(), 9);
        assert_eq!(link.max_frame_len(), 47);
        let event = RadioEvent::Connected(link);
        assert!(format!("{:?}", event).contains("Connected"));
    }
}
