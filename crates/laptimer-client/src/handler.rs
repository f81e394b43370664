//! 单连接协议处理
//!
//! 每条对端连接对应一个 [`ProtocolHandler`]：
//!
//! - 入站：解码请求帧。会话控制请求转为总线事件，由 `SessionStore` 执行；
//!   圈时间与会话 ID 查询直接读取 [`SessionView`] 快照并立即响应；
//!   历史查询向总线请求分页数据，收到页后按 MTU 拆成若干帧。
//! - 出站：总线上的会话/圈事件转为响应（发起请求的连接）或通知（其他连接）。
//!
//! 无法解码的帧只记录日志并丢弃，协议没有错误响应帧。
//!
//! # 发送
//!
//! 链路返回 `Busy` 时帧进入定容重发队列，链路报告发送完成后按原顺序补发；
//! 队列非空时新帧直接排队，保证帧序。

use crate::ClientError;
use laptimer_driver::{
    Event, EventObserver, EventSender, Origin, Queue, SessionIdPage, SessionRecordPage,
};
use laptimer_hal::{Clock, ConnectionId, HalError, PeerAddress, RadioLink};
use laptimer_protocol::{
    BestLapTimeIndication, BestLapTimeResponse, CurrentLapTimeResponse, Frame,
    GetSessionRecordHeader, GetSessionRecordPayload, GetSessionRecordRequest,
    LastLapTimeIndication, LastLapTimeResponse, LastSessionIdIndication, LastSessionIdResponse,
    LapTimeReport, ListSessionIdsResponse, MAX_LAP_TIMES, MAX_SESSION_IDS, Request,
    SessionIdRelation, SessionRecordResponse, StartIndication, StartResponse, StopIndication,
    StopResponse,
};
use laptimer_storage::{Lap, SessionSnapshot, SessionView};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// 单连接重发队列容量
pub const OUTBOUND_FRAMES: usize = 16;

/// 编码后的一帧（默认 MTU 下不需要堆分配）
pub type FrameBuf = SmallVec<[u8; 32]>;

type SessionIdsFrame = ListSessionIdsResponse<MAX_SESSION_IDS>;
type LapTimesFrame = GetSessionRecordPayload<MAX_LAP_TIMES>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordCursor {
    header_sent: bool,
}

/// 单连接协议处理器
pub struct ProtocolHandler<L: RadioLink> {
    link: L,
    sender: EventSender,
    view: SessionView,
    clock: Arc<dyn Clock>,
    outbound: Queue<FrameBuf, OUTBOUND_FRAMES>,
    outbound_limit: usize,
    listing: bool,
    record: Option<RecordCursor>,
}

impl<L: RadioLink> ProtocolHandler<L> {
    pub fn new(
        link: L,
        sender: EventSender,
        view: SessionView,
        clock: Arc<dyn Clock>,
        outbound_limit: usize,
    ) -> Self {
        Self {
            link,
            sender,
            view,
            clock,
            outbound: Queue::new(),
            outbound_limit: outbound_limit.clamp(1, OUTBOUND_FRAMES),
            listing: false,
            record: None,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.link.connection_id()
    }

    pub fn peer_address(&self) -> PeerAddress {
        self.link.peer_address()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// 等待重发的帧数
    pub fn queued_frames(&self) -> usize {
        self.outbound.size()
    }

    fn origin(&self) -> Origin {
        Origin::Connection(self.connection_id())
    }

    /// 连接建立：会话进行中时推送 LastSessionID 通知
    pub fn on_connected(&mut self) {
        let snapshot = self.view.load();
        if snapshot.is_pending() {
            self.send_frame(&LastSessionIdIndication::new(snapshot.last_session_id));
        }
    }

    /// 处理对端写入的一帧
    pub fn on_write(&mut self, data: &[u8]) -> Result<Request, ClientError> {
        let request = Request::decode(data).inspect_err(|e| {
            warn!(
                peer = %self.peer_address(),
                len = data.len(),
                "Malformed frame dropped: {}",
                e
            );
        })?;
        debug!(connection = self.connection_id(), ?request, "Request");
        self.handle_request(request);
        Ok(request)
    }

    pub fn handle_request(&mut self, request: Request) {
        let snapshot = self.view.load();
        match request {
            Request::Start => self.request(Event::StartSession {
                origin: self.origin(),
            }),
            Request::Stop => self.request(Event::StopSession {
                origin: self.origin(),
            }),
            Request::CurrentLapTime => {
                let lap = current_lap(&snapshot, self.clock.now_ms());
                self.send_frame(&CurrentLapTimeResponse::new(report(&snapshot, lap)));
            },
            Request::BestLapTime => {
                self.send_frame(&BestLapTimeResponse::new(report(&snapshot, snapshot.best_lap)));
            },
            Request::LastLapTime => {
                self.send_frame(&LastLapTimeResponse::new(report(&snapshot, snapshot.last_lap)));
            },
            Request::LastSessionId => {
                self.send_frame(&LastSessionIdResponse::new(
                    snapshot.last_session_id,
                    snapshot.last_session_state,
                ));
            },
            Request::ListSessionIds(request) => self.list_session_ids(&snapshot, request.relation),
            Request::GetSessionRecord(request) => self.get_session_record(request),
        }
    }

    fn request(&mut self, event: Event) {
        if let Err(e) = self.sender.emit(event) {
            warn!(connection = self.connection_id(), ?event, "Request dropped: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // 历史查询
    // ------------------------------------------------------------------

    fn list_session_ids(&mut self, snapshot: &SessionSnapshot, relation: SessionIdRelation) {
        match relation {
            // 只回报最近的会话
            SessionIdRelation::EqualTo => {
                let last = [snapshot.last_session_id];
                let count = usize::from(snapshot.has_session());
                self.listing = false;
                self.send_session_ids(0, &last[..count]);
            },
            SessionIdRelation::GreaterOrEqualTo => {
                self.listing = true;
                self.request(Event::LoadSessionIds {
                    requester: self.connection_id(),
                    offset: 0,
                });
            },
        }
    }

    fn get_session_record(&mut self, request: GetSessionRecordRequest) {
        self.record = Some(RecordCursor { header_sent: false });
        self.request(Event::LoadSessionRecord {
            requester: self.connection_id(),
            session_id: request.session_id,
            relation: request.relation,
            lap_offset: request.lap_offset,
        });
    }

    fn send_session_ids(&mut self, remaining: u8, ids: &[u16]) {
        match SessionIdsFrame::new(remaining, ids) {
            Ok(frame) => self.send_frame(&frame),
            Err(e) => warn!(connection = self.connection_id(), "Cannot encode session ids: {}", e),
        }
    }

    fn on_session_ids(&mut self, page: &SessionIdPage, success: bool) {
        if !self.listing {
            return;
        }
        let ids = page.session_ids();
        if !success || ids.is_empty() {
            if !success {
                warn!(connection = self.connection_id(), "Session id listing unavailable");
            }
            self.listing = false;
            self.send_session_ids(0, &[]);
            return;
        }

        let fit = SessionIdsFrame::fit(self.link.max_frame_len());
        if fit == 0 {
            warn!(mtu = self.link.mtu(), "MTU too small for session id listing");
            self.listing = false;
            return;
        }

        let mut sent = 0;
        for chunk in ids.chunks(fit) {
            sent += chunk.len();
            let remaining = (ids.len() - sent + usize::from(page.remaining)).min(usize::from(u8::MAX));
            self.send_session_ids(remaining as u8, chunk);
        }

        match ids.last() {
            Some(&last) if page.remaining > 0 => self.request(Event::LoadSessionIds {
                requester: self.connection_id(),
                offset: last + 1,
            }),
            _ => self.listing = false,
        }
    }

    fn on_session_record(&mut self, page: &SessionRecordPage, success: bool) {
        let Some(cursor) = self.record else {
            return;
        };
        if !success {
            debug!(connection = self.connection_id(), session_id = page.session_id, "Session not found");
            self.record = None;
            self.send_frame(&SessionRecordResponse::Empty);
            return;
        }

        if !cursor.header_sent {
            self.record = Some(RecordCursor { header_sent: true });
            self.send_frame(&SessionRecordResponse::Header(GetSessionRecordHeader::new(
                page.session_id,
                page.state,
                page.lap_count,
            )));
        }

        let laps = page.lap_times();
        if !laps.is_empty() {
            let fit = LapTimesFrame::fit(self.link.max_frame_len());
            if fit == 0 {
                warn!(mtu = self.link.mtu(), "MTU too small for lap times");
                self.record = None;
                return;
            }
            for chunk in laps.chunks(fit) {
                match LapTimesFrame::new(chunk) {
                    Ok(payload) => self.send_frame(&SessionRecordResponse::Payload(payload)),
                    Err(e) => warn!("Cannot encode lap times: {}", e),
                }
            }
        }

        if page.has_more() {
            self.request(Event::LoadSessionRecord {
                requester: self.connection_id(),
                session_id: page.session_id,
                relation: SessionIdRelation::EqualTo,
                lap_offset: page.lap_offset + page.count,
            });
        } else {
            self.record = None;
        }
    }

    // ------------------------------------------------------------------
    // 发送
    // ------------------------------------------------------------------

    /// 编码并发送一帧；链路忙时排队
    pub fn send_frame<F: Frame>(&mut self, frame: &F) {
        let mut buf: FrameBuf = smallvec![0; frame.length()];
        let written = match frame.serialize(&mut buf) {
            Ok(written) => written,
            Err(e) => {
                warn!(connection = self.connection_id(), "Cannot encode frame: {}", e);
                return;
            },
        };
        buf.truncate(written);
        if buf.len() > self.link.max_frame_len() {
            warn!(
                connection = self.connection_id(),
                len = buf.len(),
                mtu = self.link.mtu(),
                "Frame exceeds MTU, dropped"
            );
            return;
        }

        if self.outbound.is_empty() {
            match self.link.send(&buf) {
                Ok(()) => {
                    trace!(connection = self.connection_id(), frame = ?buf.as_slice(), "Sent");
                    return;
                },
                Err(HalError::Busy) => {},
                Err(e) => {
                    warn!(connection = self.connection_id(), "Send failed, frame dropped: {}", e);
                    return;
                },
            }
        }
        self.enqueue(buf);
    }

    fn enqueue(&mut self, buf: FrameBuf) {
        if self.outbound.size() >= self.outbound_limit || self.outbound.push(buf).is_err() {
            warn!(
                connection = self.connection_id(),
                capacity = self.outbound_limit,
                "Outbound queue full, frame dropped"
            );
        }
    }

    /// 链路发送完成：按顺序补发排队的帧
    pub fn on_tx_complete(&mut self) -> usize {
        let mut flushed = 0;
        while let Some(frame) = self.outbound.first() {
            match self.link.send(frame) {
                Ok(()) => flushed += 1,
                Err(HalError::Busy) => break,
                Err(e) => {
                    warn!(connection = self.connection_id(), "Send failed, frame dropped: {}", e);
                },
            }
            self.outbound.pop();
        }
        flushed
    }
}

fn report(snapshot: &SessionSnapshot, lap: Option<Lap>) -> LapTimeReport {
    match lap {
        Some(lap) if snapshot.is_pending() => LapTimeReport::Pending {
            session_id: snapshot.last_session_id,
            lap_id: lap.lap_id,
            lap_time: lap.lap_time,
        },
        _ => LapTimeReport::Completed,
    }
}

/// 正在进行的一圈（已过线开圈时）
fn current_lap(snapshot: &SessionSnapshot, now_ms: u32) -> Option<Lap> {
    let started = snapshot.current_lap_started_ms?;
    Some(Lap {
        lap_id: snapshot.lap_count.saturating_add(1),
        lap_time: now_ms.wrapping_sub(started),
    })
}

impl<L: RadioLink> EventObserver for ProtocolHandler<L> {
    fn on_event(&mut self, event: &Event) {
        let id = self.connection_id();
        match *event {
            Event::SessionStarted { session_id, origin } => {
                if origin == self.origin() {
                    self.send_frame(&StartResponse::new(session_id));
                } else {
                    self.send_frame(&StartIndication::new(session_id));
                }
            },
            Event::SessionStopped { session_id, origin } => {
                if origin == self.origin() {
                    self.send_frame(&StopResponse::new(session_id));
                } else {
                    self.send_frame(&StopIndication::new(session_id));
                }
            },
            Event::LapRecorded(record) => {
                self.send_frame(&LastLapTimeIndication::new(
                    record.session_id,
                    record.lap_id,
                    record.lap_time,
                ));
                if record.best {
                    self.send_frame(&BestLapTimeIndication::new(
                        record.session_id,
                        record.lap_id,
                        record.lap_time,
                    ));
                }
            },
            Event::SessionIdsLoaded(response) if response.value.requester == id => {
                self.on_session_ids(&response.value, response.success);
            },
            Event::SessionRecordLoaded(response) if response.value.requester == id => {
                self.on_session_record(&response.value, response.success);
            },
            Event::SessionIdsLoaded(_)
            | Event::SessionRecordLoaded(_)
            | Event::StartSession { .. }
            | Event::StopSession { .. }
            | Event::AddLapTime { .. }
            | Event::Initialized
            | Event::ResetStorage
            | Event::ResetStorageResult(_)
            | Event::LoadSessionIds { .. }
            | Event::LoadSessionRecord { .. }
            | Event::StorageRetry
            | Event::NewLap { .. }
            | Event::FlashLed { .. } => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, unbounded};
    use laptimer_driver::EventBus;
    use laptimer_hal::{FlashEvent, FlashStore, MockClock, MockFlashStore, MockLinkHandle, MockRadioLink};
    use laptimer_protocol::{DeviceMessage, SessionState};
    use laptimer_storage::{SessionStore, StorageConfig};
    use parking_lot::Mutex;

    type Handler = ProtocolHandler<MockRadioLink>;

    struct Rig {
        bus: EventBus,
        store: Arc<Mutex<SessionStore<MockFlashStore>>>,
        flash_rx: Receiver<FlashEvent>,
        clock: MockClock,
        view: SessionView,
    }

    impl Rig {
        fn new(mut flash: MockFlashStore) -> Self {
            let (tx, flash_rx) = unbounded();
            flash.set_delegate(Arc::new(tx));
            let mut bus = EventBus::default();
            let store = SessionStore::new(flash, bus.sender(), StorageConfig::default());
            let view = store.view();
            let store = Arc::new(Mutex::new(store));
            bus.register(store.clone()).unwrap();
            let mut rig = Self {
                bus,
                store,
                flash_rx,
                clock: MockClock::new(0),
                view,
            };
            rig.store.lock().initialize().unwrap();
            rig.run();
            rig
        }

        fn connect(&mut self, connection: ConnectionId, mtu: u16) -> (Arc<Mutex<Handler>>, MockLinkHandle) {
            let (link, handle) = MockRadioLink::new(connection, mtu);
            let handler = Handler::new(
                link,
                self.bus.sender(),
                self.view.clone(),
                Arc::new(self.clock.clone()),
                OUTBOUND_FRAMES,
            );
            let handler = Arc::new(Mutex::new(handler));
            handler.lock().on_connected();
            self.bus.register(handler.clone()).unwrap();
            (handler, handle)
        }

        fn run(&mut self) {
            loop {
                let mut progressed = false;
                while let Ok(event) = self.flash_rx.try_recv() {
                    self.store.lock().handle_flash_event(event);
                    progressed = true;
                }
                if self.bus.dispatch_pending() > 0 {
                    progressed = true;
                }
                if !progressed {
                    break;
                }
            }
        }

        fn write(&mut self, handler: &Arc<Mutex<Handler>>, request: Request) {
            handler.lock().on_write(&request.to_vec()).unwrap();
            self.run();
        }

        fn emit(&mut self, event: Event) {
            self.bus.sender().emit(event).unwrap();
            self.run();
        }
    }

    fn decode_all(frames: Vec<Vec<u8>>) -> Vec<DeviceMessage> {
        frames
            .iter()
            .map(|frame| DeviceMessage::decode(frame).unwrap())
            .collect()
    }

    #[test]
    fn test_start_answers_requester_and_indicates_others() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (a, link_a) = rig.connect(1, 23);
        let (_b, link_b) = rig.connect(2, 23);

        rig.write(&a, Request::Start);
        assert_eq!(link_a.take_sent(), vec![vec![0x80, 0x01, 0x00]]);
        assert_eq!(link_b.take_sent(), vec![vec![0x40, 0x01, 0x00]]);

        rig.write(&a, Request::Stop);
        assert_eq!(link_a.take_sent(), vec![vec![0x81, 0x01, 0x00]]);
        assert_eq!(link_b.take_sent(), vec![vec![0x41, 0x01, 0x00]]);
    }

    #[test]
    fn test_device_origin_indicates_everyone() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (_a, link_a) = rig.connect(1, 23);
        rig.emit(Event::StartSession {
            origin: Origin::Device,
        });
        assert_eq!(link_a.take_sent(), vec![vec![0x40, 0x01, 0x00]]);
    }

    #[test]
    fn test_lap_time_queries_collapse_without_session() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (a, link) = rig.connect(1, 23);

        rig.write(&a, Request::CurrentLapTime);
        rig.write(&a, Request::BestLapTime);
        rig.write(&a, Request::LastLapTime);
        rig.write(&a, Request::LastSessionId);
        assert_eq!(
            link.take_sent(),
            vec![
                vec![0x82, 0x01],
                vec![0x83, 0x01],
                vec![0x84, 0x01],
                vec![0x85, 0x00, 0x00, 0x01],
            ]
        );
    }

    #[test]
    fn test_lap_time_queries_during_session() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (a, link) = rig.connect(1, 23);
        rig.write(&a, Request::Start);
        rig.emit(Event::NewLap { timestamp_ms: 1_000 });
        rig.emit(Event::NewLap { timestamp_ms: 61_000 });
        rig.emit(Event::NewLap { timestamp_ms: 119_000 });
        link.take_sent();

        rig.clock.set(125_500);
        rig.write(&a, Request::CurrentLapTime);
        rig.write(&a, Request::BestLapTime);
        rig.write(&a, Request::LastLapTime);
        rig.write(&a, Request::LastSessionId);

        let messages = decode_all(link.take_sent());
        assert_eq!(
            messages,
            vec![
                DeviceMessage::CurrentLapTime(CurrentLapTimeResponse::pending(1, 3, 6_500)),
                DeviceMessage::BestLapTime(BestLapTimeResponse::pending(1, 2, 58_000)),
                DeviceMessage::LastLapTime(LastLapTimeResponse::pending(1, 2, 58_000)),
                DeviceMessage::LastSessionId(LastSessionIdResponse::new(1, SessionState::Pending)),
            ]
        );
    }

    #[test]
    fn test_laps_push_indications() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (_a, link) = rig.connect(1, 23);
        rig.emit(Event::StartSession {
            origin: Origin::Device,
        });
        rig.emit(Event::AddLapTime { lap_time_ms: 500 });
        rig.emit(Event::AddLapTime { lap_time_ms: 700 });
        let messages = decode_all(link.take_sent());
        assert_eq!(
            messages,
            vec![
                DeviceMessage::StartIndication(StartIndication::new(1)),
                DeviceMessage::LastLapTimeIndication(LastLapTimeIndication::new(1, 1, 500)),
                DeviceMessage::BestLapTimeIndication(BestLapTimeIndication::new(1, 1, 500)),
                DeviceMessage::LastLapTimeIndication(LastLapTimeIndication::new(1, 2, 700)),
            ]
        );
    }

    #[test]
    fn test_connect_during_session_indicates_last_session() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        rig.emit(Event::StartSession {
            origin: Origin::Device,
        });
        let (_a, link) = rig.connect(4, 23);
        assert_eq!(link.take_sent(), vec![vec![0x45, 0x01, 0x00, 0x00]]);
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (a, link) = rig.connect(1, 23);
        for frame in [&[][..], &[0x08], &[0x80, 0x01, 0x00], &[0x06, 0x05], &[0x07, 0x01]] {
            assert!(a.lock().on_write(frame).is_err());
        }
        rig.run();
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_list_session_ids_split_by_mtu() {
        let mut flash = MockFlashStore::new(64);
        for id in 1..=20 {
            flash.preload(id, 0, &[1]);
        }
        let mut rig = Rig::new(flash);
        let (a, link) = rig.connect(1, 23);

        rig.write(
            &a,
            Request::ListSessionIds(laptimer_protocol::ListSessionIdsRequest::new(
                SessionIdRelation::GreaterOrEqualTo,
            )),
        );
        let frames: Vec<(u8, Vec<u16>)> = decode_all(link.take_sent())
            .into_iter()
            .map(|message| match message {
                DeviceMessage::ListSessionIds(frame) => {
                    (frame.remaining(), frame.session_ids().to_vec())
                },
                other => panic!("unexpected {:?}", other),
            })
            .collect();

        // MTU 23：每帧最多 9 个 ID；存储每页 16 个
        assert_eq!(
            frames,
            vec![
                (11, (1..=9).collect()),
                (4, (10..=16).collect()),
                (0, (17..=20).collect()),
            ]
        );

        rig.write(
            &a,
            Request::ListSessionIds(laptimer_protocol::ListSessionIdsRequest::new(
                SessionIdRelation::EqualTo,
            )),
        );
        assert_eq!(link.take_sent(), vec![vec![0x86, 0x00, 20, 0x00]]);
    }

    #[test]
    fn test_list_session_ids_empty_storage() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (a, link) = rig.connect(1, 23);
        rig.write(
            &a,
            Request::ListSessionIds(laptimer_protocol::ListSessionIdsRequest::new(
                SessionIdRelation::GreaterOrEqualTo,
            )),
        );
        assert_eq!(link.take_sent(), vec![vec![0x86, 0x00]]);
    }

    #[test]
    fn test_get_session_record_in_phases() {
        let mut flash = MockFlashStore::new(64);
        flash.preload(3, 0, &[1]);
        for lap in 1..=10u16 {
            flash.preload(3, lap, &[u32::from(lap) * 100]);
        }
        let mut rig = Rig::new(flash);
        let (a, link) = rig.connect(1, 23);

        rig.write(
            &a,
            Request::GetSessionRecord(GetSessionRecordRequest::new(
                1,
                SessionIdRelation::GreaterOrEqualTo,
                0,
            )),
        );
        let messages = decode_all(link.take_sent());
        let header = SessionRecordResponse::Header(GetSessionRecordHeader::new(
            3,
            SessionState::Completed,
            10,
        ));
        let payload = |laps: &[u32]| {
            DeviceMessage::SessionRecord(SessionRecordResponse::Payload(
                LapTimesFrame::new(laps).unwrap(),
            ))
        };
        // MTU 23：每帧最多 4 圈；存储每页 8 圈
        assert_eq!(
            messages,
            vec![
                DeviceMessage::SessionRecord(header),
                payload(&[100, 200, 300, 400]),
                payload(&[500, 600, 700, 800]),
                payload(&[900, 1000]),
            ]
        );
    }

    #[test]
    fn test_get_session_record_not_found() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (a, link) = rig.connect(1, 23);
        rig.write(
            &a,
            Request::GetSessionRecord(GetSessionRecordRequest::new(
                9,
                SessionIdRelation::EqualTo,
                0,
            )),
        );
        assert_eq!(link.take_sent(), vec![vec![0x87, 0xFF]]);
    }

    #[test]
    fn test_busy_link_keeps_frame_order() {
        let mut rig = Rig::new(MockFlashStore::new(64));
        let (a, link) = rig.connect(1, 23);

        link.reject_next(1);
        rig.write(&a, Request::LastSessionId);
        rig.write(&a, Request::BestLapTime);
        assert!(link.sent().is_empty());
        assert_eq!(a.lock().queued_frames(), 2);

        assert_eq!(a.lock().on_tx_complete(), 2);
        assert_eq!(
            link.take_sent(),
            vec![vec![0x85, 0x00, 0x00, 0x01], vec![0x83, 0x01]]
        );
        assert_eq!(a.lock().queued_frames(), 0);
    }

    #[test]
    fn test_outbound_queue_bound() {
        let (link, handle) = MockRadioLink::new(1, 23);
        let bus = EventBus::default();
        let mut handler = Handler::new(
            link,
            bus.sender(),
            SessionView::new(),
            Arc::new(MockClock::new(0)),
            2,
        );
        handle.reject_next(usize::MAX);
        for _ in 0..4 {
            handler.handle_request(Request::LastSessionId);
        }
        assert_eq!(handler.queued_frames(), 2);
        assert_eq!(handler.on_tx_complete(), 0);

        handle.reject_next(0);
        assert_eq!(handler.on_tx_complete(), 2);
        assert_eq!(handle.sent().len(), 2);
    }
}
