//! 仿真会话
//!
//! 设备运行在虚拟时间上（[`MockClock`]），Flash 落到 JSON 文件，
//! 一个 [`LoopbackPeer`] 扮演手机发出请求并接收帧。

use crate::config::SimulatorConfig;
use crate::signal::SignalGenerator;
use anyhow::{Context, Result, bail, ensure};
use laptimer_client::{Device, LoopbackPeer};
use laptimer_driver::Event;
use laptimer_hal::{FileFlashStore, LogLed, MockClock};
use laptimer_protocol::{
    DeviceMessage, GetSessionRecordHeader, GetSessionRecordRequest, LapTime,
    ListSessionIdsRequest, Request, SessionId, SessionIdRelation, SessionRecordResponse,
};
use std::sync::Arc;
use tracing::{debug, info};

/// 每处理多少个采样运行一次主循环
const SAMPLES_PER_TICK: usize = 64;

const PHONE_CONNECTION: u16 = 1;

/// 一次比赛的结果（来自手机收到的通知）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceSummary {
    pub session_id: SessionId,
    pub laps: Vec<LapTime>,
    pub best: Option<LapTime>,
}

/// 一条会话记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub header: GetSessionRecordHeader,
    pub laps: Vec<LapTime>,
}

pub struct Simulator {
    config: SimulatorConfig,
    device: Device<FileFlashStore>,
    clock: MockClock,
    phone: LoopbackPeer,
    dump_frames: bool,
}

impl Simulator {
    pub fn open(config: SimulatorConfig, dump_frames: bool) -> Result<Self> {
        let flash = FileFlashStore::open(&config.store.path, config.store.record_capacity)
            .with_context(|| format!("Failed to open {}", config.store.path.display()))?;
        let clock = MockClock::new(0);
        let mut device = Device::new(
            flash,
            LogLed::new(),
            Arc::new(clock.clone()),
            config.device.clone(),
        )?;
        device.start()?;
        ensure!(device.snapshot().initialized, "Flash store failed to initialize");

        let phone = LoopbackPeer::connect_with_capacity(
            &device.radio_sender(),
            PHONE_CONNECTION,
            config.phone.mtu,
            config.phone.link_frames,
        )?;
        device.run_until_idle();
        ensure!(device.connection_count() == 1, "Phone connection refused");

        Ok(Self {
            config,
            device,
            clock,
            phone,
            dump_frames,
        })
    }

    /// 取出手机收到的全部帧
    fn collect(&mut self) -> Vec<DeviceMessage> {
        let mut messages = Vec::new();
        loop {
            let frames = self.phone.receive_raw();
            if frames.is_empty() {
                break;
            }
            for frame in frames {
                if self.dump_frames {
                    println!("<< {}", hex::encode(&frame));
                }
                match DeviceMessage::decode(&frame) {
                    Ok(message) => messages.push(message),
                    Err(e) => debug!("Undecodable frame {}: {}", hex::encode(&frame), e),
                }
            }
            // 链路缓冲已腾空，让设备补发排队的帧
            if self.phone.tx_complete().is_err() {
                break;
            }
            self.device.run_until_idle();
        }
        messages
    }

    pub fn request(&mut self, request: Request) -> Result<Vec<DeviceMessage>> {
        if self.dump_frames {
            println!(">> {}", hex::encode(request.to_vec()));
        }
        self.phone.send(&request)?;
        self.device.run_until_idle();
        Ok(self.collect())
    }

    /// 开始会话、驶过 `laps + 1` 次检查点、结束会话
    pub fn race(&mut self, laps: u32, lap_ms: u32, jitter_ms: u32, seed: u64) -> Result<RaceSummary> {
        let detector = self.config.device.detector;
        let period = self.config.signal.sample_period_ms.max(1);
        ensure!(
            self.config.signal.checkpoint_ms / period > detector.checkpoint_count + 3,
            "checkpoint_ms too short for checkpoint_count {}",
            detector.checkpoint_count
        );
        ensure!(
            lap_ms.saturating_sub(jitter_ms + self.config.signal.checkpoint_ms) / period
                > detector.track_count + 3,
            "Laps of {} ms are too short for track_count {}",
            lap_ms,
            detector.track_count
        );

        let session_id = match self.request(Request::Start)?.as_slice() {
            [DeviceMessage::StartResponse(response)] => response.session_id,
            other => bail!("Unexpected start response: {:?}", other),
        };
        info!(session_id, laps, lap_ms, "Race started");

        let mut generator = SignalGenerator::new(self.config.signal.clone(), seed);
        let mut summary = RaceSummary {
            session_id,
            laps: Vec::new(),
            best: None,
        };
        for _ in 0..=laps {
            let duration = generator.lap_duration(lap_ms, jitter_ms);
            let samples = generator.lap(duration);
            for chunk in samples.chunks(SAMPLES_PER_TICK) {
                for &sample in chunk {
                    self.clock.advance(period);
                    self.device.on_sample(sample);
                }
                self.device.run_until_idle();
            }
            for message in self.collect() {
                match message {
                    DeviceMessage::LastLapTimeIndication(lap) => {
                        println!("lap {:>3}  {}", lap.lap_id, format_lap(lap.lap_time));
                        summary.laps.push(lap.lap_time);
                    },
                    DeviceMessage::BestLapTimeIndication(lap) => summary.best = Some(lap.lap_time),
                    _ => {},
                }
            }
        }

        match self.request(Request::Stop)?.as_slice() {
            [DeviceMessage::StopResponse(response)] if response.session_id == session_id => {},
            other => bail!("Unexpected stop response: {:?}", other),
        }
        info!(session_id, laps = summary.laps.len(), "Race finished");
        Ok(summary)
    }

    /// 列出所有会话 ID
    pub fn sessions(&mut self) -> Result<Vec<SessionId>> {
        let messages = self.request(Request::ListSessionIds(ListSessionIdsRequest::new(
            SessionIdRelation::GreaterOrEqualTo,
        )))?;
        let mut ids = Vec::new();
        for message in messages {
            match message {
                DeviceMessage::ListSessionIds(frame) => ids.extend_from_slice(frame.session_ids()),
                other => bail!("Unexpected listing frame: {:?}", other),
            }
        }
        Ok(ids)
    }

    /// 读取一条会话记录；找不到时返回 `None`
    pub fn record(
        &mut self,
        session_id: SessionId,
        relation: SessionIdRelation,
    ) -> Result<Option<SessionRecord>> {
        let messages = self.request(Request::GetSessionRecord(GetSessionRecordRequest::new(
            session_id, relation, 0,
        )))?;
        let mut record: Option<SessionRecord> = None;
        for message in messages {
            match message {
                DeviceMessage::SessionRecord(SessionRecordResponse::Empty) => return Ok(None),
                DeviceMessage::SessionRecord(SessionRecordResponse::Header(header)) => {
                    record = Some(SessionRecord {
                        header,
                        laps: Vec::with_capacity(header.lap_count as usize),
                    });
                },
                DeviceMessage::SessionRecord(SessionRecordResponse::Payload(payload)) => {
                    let Some(record) = record.as_mut() else {
                        bail!("Lap times before session header");
                    };
                    record.laps.extend_from_slice(payload.lap_times());
                },
                other => bail!("Unexpected record frame: {:?}", other),
            }
        }
        Ok(record)
    }

    /// 删除全部会话
    pub fn reset(&mut self) -> Result<()> {
        self.device.sender().emit(Event::ResetStorage)?;
        self.device.run_until_idle();
        let snapshot = self.device.snapshot();
        ensure!(
            !snapshot.reset_pending && !snapshot.has_session(),
            "Storage reset did not complete"
        );
        Ok(())
    }
}

/// `m:ss.mmm`
pub fn format_lap(lap_time: LapTime) -> String {
    let minutes = lap_time / 60_000;
    let seconds = (lap_time % 60_000) / 1000;
    let millis = lap_time % 1000;
    format!("{}:{:02}.{:03}", minutes, seconds, millis)
}
