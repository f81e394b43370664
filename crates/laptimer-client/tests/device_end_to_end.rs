//! 设备端到端测试：进程内对端 → 无线事件 → 总线 → 存储 → 链路帧

use laptimer_client::{ClientConfig, Device, DeviceConfig, LoopbackPeer};
use laptimer_driver::{DetectorConfig, Event};
use laptimer_hal::{FlashStore, MockClock, MockFlashStore, MockLed};
use laptimer_protocol::{
    BestLapTimeIndication, CurrentLapTimeResponse, DeviceMessage, GetSessionRecordHeader,
    GetSessionRecordPayload, GetSessionRecordRequest, LastLapTimeIndication,
    ListSessionIdsRequest, Request, SessionIdRelation, SessionRecordResponse, SessionState,
    StartIndication, StartResponse, StopIndication, StopResponse,
};
use proptest::prelude::*;
use std::sync::Arc;

const HIGH: u16 = 45_000;
const LOW: u16 = 10_000;

struct Bench {
    device: Device<MockFlashStore>,
    clock: MockClock,
}

impl Bench {
    fn boot(flash: MockFlashStore) -> Self {
        let clock = MockClock::new(0);
        let config = DeviceConfig {
            detector: DetectorConfig {
                checkpoint_count: 5,
                track_count: 10,
                ..DetectorConfig::default()
            },
            client: ClientConfig {
                max_connections: 2,
                ..ClientConfig::default()
            },
            ..DeviceConfig::default()
        };
        let mut device =
            Device::new(flash, MockLed::new(), Arc::new(clock.clone()), config).unwrap();
        device.start().unwrap();
        Self { device, clock }
    }

    fn connect(&mut self, connection: u16, mtu: u16) -> LoopbackPeer {
        let peer = LoopbackPeer::connect(&self.device.radio_sender(), connection, mtu).unwrap();
        self.device.run_until_idle();
        peer
    }

    fn request(&mut self, peer: &LoopbackPeer, request: Request) {
        peer.send(&request).unwrap();
        self.device.run_until_idle();
    }

    /// 在 `at_ms` 时刻驶过检查点
    fn cross(&mut self, at_ms: u32) {
        self.clock.set(at_ms);
        for _ in 0..10 {
            self.device.on_sample(HIGH);
        }
        for _ in 0..15 {
            self.device.on_sample(LOW);
        }
        self.device.run_until_idle();
    }
}

fn sessions(count: u16) -> MockFlashStore {
    let mut flash = MockFlashStore::new(512);
    for id in 1..=count {
        flash.preload(id, 0, &[1]);
        flash.preload(id, 1, &[u32::from(id) * 1000]);
    }
    flash
}

#[test]
fn test_race_with_two_phones() {
    let mut bench = Bench::boot(MockFlashStore::new(256));
    let a = bench.connect(1, 23);
    let b = bench.connect(2, 23);
    assert_eq!(bench.device.connection_count(), 2);

    bench.request(&a, Request::Start);
    assert_eq!(a.receive(), vec![DeviceMessage::StartResponse(StartResponse::new(1))]);
    assert_eq!(b.receive(), vec![DeviceMessage::StartIndication(StartIndication::new(1))]);

    bench.cross(1_000);
    bench.cross(31_000);
    bench.cross(60_000);
    let expected = vec![
        DeviceMessage::LastLapTimeIndication(LastLapTimeIndication::new(1, 1, 30_000)),
        DeviceMessage::BestLapTimeIndication(BestLapTimeIndication::new(1, 1, 30_000)),
        DeviceMessage::LastLapTimeIndication(LastLapTimeIndication::new(1, 2, 29_000)),
        DeviceMessage::BestLapTimeIndication(BestLapTimeIndication::new(1, 2, 29_000)),
    ];
    assert_eq!(a.receive(), expected);
    assert_eq!(b.receive(), expected);

    bench.clock.set(70_000);
    bench.request(&a, Request::CurrentLapTime);
    assert_eq!(
        a.receive(),
        vec![DeviceMessage::CurrentLapTime(CurrentLapTimeResponse::pending(1, 3, 10_000))]
    );

    bench.request(&b, Request::Stop);
    assert_eq!(b.receive(), vec![DeviceMessage::StopResponse(StopResponse::new(1))]);
    assert_eq!(a.receive(), vec![DeviceMessage::StopIndication(StopIndication::new(1))]);

    bench.request(&a, Request::CurrentLapTime);
    assert_eq!(a.receive()[0], DeviceMessage::CurrentLapTime(CurrentLapTimeResponse::completed()));

    bench.request(
        &a,
        Request::GetSessionRecord(GetSessionRecordRequest::new(1, SessionIdRelation::EqualTo, 0)),
    );
    assert_eq!(
        a.receive(),
        vec![
            DeviceMessage::SessionRecord(SessionRecordResponse::Header(
                GetSessionRecordHeader::new(1, SessionState::Completed, 2)
            )),
            DeviceMessage::SessionRecord(SessionRecordResponse::Payload(
                GetSessionRecordPayload::new(&[30_000, 29_000]).unwrap()
            )),
        ]
    );
    assert!(b.receive().is_empty());

    b.disconnect().unwrap();
    bench.device.run_until_idle();
    assert_eq!(bench.device.connection_count(), 1);
}

#[test]
fn test_third_phone_is_refused() {
    let mut bench = Bench::boot(MockFlashStore::new(64));
    let _a = bench.connect(1, 23);
    let _b = bench.connect(2, 23);
    let c = bench.connect(3, 23);
    assert_eq!(bench.device.connection_count(), 2);

    bench.request(&c, Request::LastSessionId);
    assert!(c.receive().is_empty());
}

#[test]
fn test_malformed_frames_leave_connection_usable() {
    let mut bench = Bench::boot(sessions(2));
    let a = bench.connect(1, 23);
    for frame in [&[0x3F][..], &[], &[0x86, 0x00], &[0x07, 0x00]] {
        a.send_raw(frame).unwrap();
    }
    bench.device.run_until_idle();
    assert!(a.receive_raw().is_empty());

    bench.request(&a, Request::LastSessionId);
    assert_eq!(a.receive_raw(), vec![vec![0x85, 0x02, 0x00, 0x01]]);
}

#[test]
fn test_listing_follows_mtu_changes() {
    let mut bench = Bench::boot(sessions(20));
    let a = bench.connect(1, 23);
    let listing = Request::ListSessionIds(ListSessionIdsRequest::new(
        SessionIdRelation::GreaterOrEqualTo,
    ));

    bench.request(&a, listing);
    let frames = a.receive_raw();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|frame| frame.len() <= 20));

    a.set_mtu(247).unwrap();
    bench.request(&a, listing);
    let sizes: Vec<(u8, usize)> = a
        .receive()
        .into_iter()
        .map(|message| match message {
            DeviceMessage::ListSessionIds(frame) => (frame.remaining(), frame.session_ids().len()),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    // 存储按页返回，每页 16 个
    assert_eq!(sizes, vec![(4, 16), (0, 4)]);
}

#[test]
fn test_busy_link_resumes_on_tx_complete() {
    let mut flash = MockFlashStore::new(64);
    flash.preload(1, 0, &[1]);
    for lap in 1..=10u16 {
        flash.preload(1, lap, &[u32::from(lap)]);
    }
    let mut bench = Bench::boot(flash);
    let a = LoopbackPeer::connect_with_capacity(&bench.device.radio_sender(), 1, 23, 2).unwrap();
    bench.device.run_until_idle();

    bench.request(
        &a,
        Request::GetSessionRecord(GetSessionRecordRequest::new(1, SessionIdRelation::EqualTo, 0)),
    );
    let first = a.receive();
    assert_eq!(first.len(), 2);
    assert!(matches!(
        first[0],
        DeviceMessage::SessionRecord(SessionRecordResponse::Header(_))
    ));

    a.tx_complete().unwrap();
    bench.device.run_until_idle();
    let rest = a.receive();
    assert_eq!(rest.len(), 2);
    let laps: Vec<u32> = first
        .iter()
        .chain(rest.iter())
        .filter_map(|message| match message {
            DeviceMessage::SessionRecord(SessionRecordResponse::Payload(payload)) => {
                Some(payload.lap_times().to_vec())
            },
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(laps, (1..=10).collect::<Vec<u32>>());
}

#[test]
fn test_reset_clears_history() {
    let mut bench = Bench::boot(sessions(3));
    let a = bench.connect(1, 23);
    bench.device.sender().emit(Event::ResetStorage).unwrap();
    bench.device.run_until_idle();
    assert_eq!(bench.device.store().flash().total_records(), 0);

    bench.request(&a, Request::LastSessionId);
    bench.request(&a, Request::Start);
    assert_eq!(
        a.receive_raw(),
        vec![vec![0x85, 0x00, 0x00, 0x01], vec![0x80, 0x01, 0x00]]
    );

    let mut word = [0u32; 1];
    bench
        .device
        .store()
        .flash()
        .read_record(1, 0, &mut word)
        .unwrap();
    assert_eq!(word[0], u32::from(u8::from(SessionState::Pending)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_listing_is_complete_and_fits_mtu(count in 1u16..60, mtu in 23u16..=120) {
        let mut bench = Bench::boot(sessions(count));
        let a = bench.connect(1, mtu);
        bench.request(&a, Request::ListSessionIds(ListSessionIdsRequest::new(
            SessionIdRelation::GreaterOrEqualTo,
        )));

        let frames = a.receive_raw();
        prop_assert!(frames.iter().all(|frame| frame.len() <= usize::from(mtu) - 3));

        let mut ids = Vec::new();
        for frame in &frames {
            let DeviceMessage::ListSessionIds(response) = DeviceMessage::decode(frame).unwrap() else {
                panic!("unexpected frame {:?}", frame);
            };
            ids.extend_from_slice(response.session_ids());
            prop_assert_eq!(usize::from(response.remaining()), usize::from(count) - ids.len());
        }
        prop_assert_eq!(ids, (1..=count).collect::<Vec<u16>>());
    }
}
