//! 连接表
//!
//! 把无线协作者的上行消息（[`RadioEvent`]）路由到对应连接的
//! [`ProtocolHandler`]，并把总线事件广播给所有连接。

use crate::{ClientError, OUTBOUND_FRAMES, ProtocolHandler};
use laptimer_driver::{Event, EventObserver, EventSender};
use laptimer_hal::{Clock, ConnectionId, DEFAULT_MTU, RadioEvent, RadioLink};
use laptimer_storage::SessionView;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 协议层配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    /// 同时连接的对端数量上限
    pub max_connections: usize,
    /// 连接建立时假定的 MTU（实际值以链路协商为准）
    pub default_mtu: u16,
    /// 单连接重发队列容量（不超过 [`OUTBOUND_FRAMES`]）
    pub outbound_frames: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_connections: 2,
            default_mtu: DEFAULT_MTU,
            outbound_frames: OUTBOUND_FRAMES,
        }
    }
}

type Handler = ProtocolHandler<Box<dyn RadioLink>>;

/// 活动连接表
pub struct ConnectionManager {
    config: ClientConfig,
    sender: EventSender,
    view: SessionView,
    clock: Arc<dyn Clock>,
    handlers: SmallVec<[Handler; 2]>,
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        sender: EventSender,
        view: SessionView,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            sender,
            view,
            clock,
            handlers: SmallVec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn connection_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.handlers.iter().map(|handler| handler.connection_id())
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|handler| handler.connection_id() == connection)
    }

    fn get_mut(&mut self, connection: ConnectionId) -> Result<&mut Handler, ClientError> {
        self.handlers
            .iter_mut()
            .find(|handler| handler.connection_id() == connection)
            .ok_or(ClientError::NoConnection { connection })
    }

    /// 处理一条无线上行消息
    pub fn handle_radio_event(&mut self, event: RadioEvent) -> Result<(), ClientError> {
        match event {
            RadioEvent::Connected(link) => self.connect(link),
            RadioEvent::Disconnected { connection } => {
                let index = self
                    .handlers
                    .iter()
                    .position(|handler| handler.connection_id() == connection)
                    .ok_or(ClientError::NoConnection { connection })?;
                let handler = self.handlers.remove(index);
                info!(
                    connection,
                    peer = %handler.peer_address(),
                    dropped = handler.queued_frames(),
                    "Peer disconnected"
                );
                Ok(())
            },
            RadioEvent::MtuChanged { connection, mtu } => {
                let handler = self.get_mut(connection)?;
                debug!(connection, mtu, current = handler.link().mtu(), "MTU changed");
                Ok(())
            },
            RadioEvent::Write { connection, data } => {
                self.get_mut(connection)?.on_write(&data)?;
                Ok(())
            },
            RadioEvent::TxComplete { connection } => {
                self.get_mut(connection)?.on_tx_complete();
                Ok(())
            },
        }
    }

    fn connect(&mut self, link: Box<dyn RadioLink>) -> Result<(), ClientError> {
        let connection = link.connection_id();
        if self.get(connection).is_some() {
            warn!(connection, "Connection id reused, replacing stale handler");
            self.handlers
                .retain(|handler| handler.connection_id() != connection);
        }
        if self.handlers.len() >= self.config.max_connections {
            warn!(
                connection,
                peer = %link.peer_address(),
                capacity = self.config.max_connections,
                "Connection limit reached"
            );
            return Err(ClientError::ConnectionLimit {
                capacity: self.config.max_connections,
            });
        }

        info!(connection, peer = %link.peer_address(), mtu = link.mtu(), "Peer connected");
        let mut handler = ProtocolHandler::new(
            link,
            self.sender.clone(),
            self.view.clone(),
            self.clock.clone(),
            self.config.outbound_frames,
        );
        handler.on_connected();
        self.handlers.push(handler);
        Ok(())
    }
}

impl EventObserver for ConnectionManager {
    fn on_event(&mut self, event: &Event) {
        for handler in self.handlers.iter_mut() {
            handler.on_event(event);
        }
    }
}
