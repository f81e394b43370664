//! 进程内对端
//!
//! [`LoopbackPeer`] 扮演手机：经 [`ChannelLink`] 建立连接，把请求作为
//! `RadioEvent::Write` 投递给设备，并从链路通道读取设备发出的帧。
//! 仿真器与端到端测试使用。

use crate::ClientError;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use laptimer_hal::{ChannelLink, ConnectionId, HalError, PeerAddress, RadioEvent, SharedMtu};
use laptimer_protocol::{DeviceMessage, Request};
use tracing::warn;

/// 默认链路发送缓冲（帧数）
pub const LOOPBACK_QUEUE_LEN: usize = 64;

pub struct LoopbackPeer {
    connection: ConnectionId,
    radio: Sender<RadioEvent>,
    mtu: SharedMtu,
    rx: Receiver<Bytes>,
}

impl LoopbackPeer {
    /// 以 `mtu` 建立连接
    pub fn connect(
        radio: &Sender<RadioEvent>,
        connection: ConnectionId,
        mtu: u16,
    ) -> Result<Self, ClientError> {
        Self::connect_with_capacity(radio, connection, mtu, LOOPBACK_QUEUE_LEN)
    }

    /// 指定链路缓冲容量建立连接，缓冲满时设备侧发送返回 `Busy`
    pub fn connect_with_capacity(
        radio: &Sender<RadioEvent>,
        connection: ConnectionId,
        mtu: u16,
        capacity: usize,
    ) -> Result<Self, ClientError> {
        let (tx, rx) = bounded(capacity.max(1));
        let mtu = SharedMtu::new(mtu);
        let peer = PeerAddress([
            0x02,
            0x4C,
            0x50,
            0x00,
            (connection >> 8) as u8,
            connection as u8,
        ]);
        let link = ChannelLink::new(connection, peer, mtu.clone(), tx);
        let this = Self {
            connection,
            radio: radio.clone(),
            mtu,
            rx,
        };
        this.post(RadioEvent::Connected(Box::new(link)))?;
        Ok(this)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    pub fn mtu(&self) -> u16 {
        self.mtu.get()
    }

    fn post(&self, event: RadioEvent) -> Result<(), ClientError> {
        self.radio.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => HalError::Busy,
            TrySendError::Disconnected(_) => HalError::Disconnected,
        })?;
        Ok(())
    }

    pub fn send(&self, request: &Request) -> Result<(), ClientError> {
        self.send_raw(&request.to_vec())
    }

    /// 写入任意字节（用于构造畸形帧）
    pub fn send_raw(&self, data: &[u8]) -> Result<(), ClientError> {
        self.post(RadioEvent::Write {
            connection: self.connection,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// 重新协商 MTU
    pub fn set_mtu(&self, mtu: u16) -> Result<(), ClientError> {
        self.mtu.set(mtu);
        self.post(RadioEvent::MtuChanged {
            connection: self.connection,
            mtu,
        })
    }

    /// 通知设备链路缓冲已腾空
    pub fn tx_complete(&self) -> Result<(), ClientError> {
        self.post(RadioEvent::TxComplete {
            connection: self.connection,
        })
    }

    /// 取出设备发出的全部原始帧
    pub fn receive_raw(&self) -> Vec<Bytes> {
        self.rx.try_iter().collect()
    }

    /// 取出并解码设备发出的全部帧，无法解码的帧记录日志后跳过
    pub fn receive(&self) -> Vec<DeviceMessage> {
        self.receive_raw()
            .iter()
            .filter_map(|frame| match DeviceMessage::decode(frame) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(connection = self.connection, frame = ?frame.as_ref(), "Undecodable frame: {}", e);
                    None
                },
            })
            .collect()
    }

    pub fn disconnect(self) -> Result<(), ClientError> {
        self.post(RadioEvent::Disconnected {
            connection: self.connection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use laptimer_hal::RadioLink;

    #[test]
    fn test_peer_posts_radio_events() {
        let (radio, events) = unbounded();
        let peer = LoopbackPeer::connect(&radio, 9, 64).unwrap();
        peer.send(&Request::Stop).unwrap();
        peer.set_mtu(100).unwrap();
        peer.disconnect().unwrap();

        let events: Vec<RadioEvent> = events.try_iter().collect();
        assert_eq!(events.len(), 4);
        match &events[0] {
            RadioEvent::Connected(link) => {
                assert_eq!(link.connection_id(), 9);
                assert_eq!(link.mtu(), 100);
                assert_eq!(link.peer_address().to_string(), "02:4C:50:00:00:09");
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &events[1],
            RadioEvent::Write { connection: 9, data } if data[..] == [0x01]
        ));
        assert!(matches!(events[2], RadioEvent::MtuChanged { connection: 9, mtu: 100 }));
        assert!(matches!(events[3], RadioEvent::Disconnected { connection: 9 }));
    }

    #[test]
    fn test_closed_radio() {
        let (radio, events) = unbounded::<RadioEvent>();
        drop(events);
        assert!(matches!(
            LoopbackPeer::connect(&radio, 1, 23),
            Err(ClientError::Hal(HalError::Disconnected))
        ));
    }
}
