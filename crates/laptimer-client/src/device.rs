//! 设备装配与主循环
//!
//! [`Device`] 把各部件接到同一条事件总线上：
//!
//! ```text
//! 采样 ──> LapDetector ──NewLap──┐
//! 无线 ──RadioEvent──> ConnectionManager ──请求事件──┤
//!                                                 ├──> EventBus ──> SessionStore ──> FlashStore
//! Flash ──FlashEvent──> SessionStore ──结果事件──────┘          ├──> ConnectionManager ──> RadioLink
//!                                                              └──> StatusLed ──> Led
//! ```
//!
//! 协作者的完成通知与上行数据都先进入通道，由 [`Device::run_once`] 在主循环上下文中
//! 取出处理；业务逻辑只在这里执行。

use crate::{ClientConfig, ClientError, ConnectionManager};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use laptimer_driver::{
    BusConfig, DetectorConfig, EventBus, EventSender, LapDetector, LedConfig, StatusLed,
};
use laptimer_hal::{Clock, FlashEvent, FlashStore, Led, RadioEvent};
use laptimer_storage::{SessionSnapshot, SessionStore, SessionView, StorageConfig};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 无线上行通道容量
pub const RADIO_QUEUE_LEN: usize = 32;

/// 主循环单次 [`Device::run_until_idle`] 的迭代上限
const MAX_IDLE_ROUNDS: usize = 10_000;

/// 设备配置
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    pub bus: BusConfig,
    pub detector: DetectorConfig,
    pub storage: StorageConfig,
    pub led: LedConfig,
    pub client: ClientConfig,
}

/// 计时器设备
pub struct Device<F: FlashStore + Send + 'static> {
    bus: EventBus,
    store: Arc<Mutex<SessionStore<F>>>,
    connections: Arc<Mutex<ConnectionManager>>,
    detector: LapDetector,
    view: SessionView,
    clock: Arc<dyn Clock>,
    last_tick_ms: u32,
    flash_rx: Receiver<FlashEvent>,
    radio_tx: Sender<RadioEvent>,
    radio_rx: Receiver<RadioEvent>,
}

impl<F: FlashStore + Send + 'static> Device<F> {
    /// 装配设备：注册存储、连接表与状态 LED 三个观察者
    pub fn new<L: Led + 'static>(
        mut flash: F,
        led: L,
        clock: Arc<dyn Clock>,
        config: DeviceConfig,
    ) -> Result<Self, ClientError> {
        let (flash_tx, flash_rx) = unbounded();
        flash.set_delegate(Arc::new(flash_tx));

        let mut bus = EventBus::new(config.bus);
        let store = SessionStore::new(flash, bus.sender(), config.storage);
        let view = store.view();
        let store = Arc::new(Mutex::new(store));
        let connections = Arc::new(Mutex::new(ConnectionManager::new(
            config.client,
            bus.sender(),
            view.clone(),
            clock.clone(),
        )));

        // 存储先于连接表：同一事件里连接表读到的快照已经更新
        bus.register(store.clone())?;
        bus.register(connections.clone())?;
        bus.register(Arc::new(Mutex::new(StatusLed::new(
            led,
            config.led,
            bus.sender(),
        ))))?;

        let detector = LapDetector::new(config.detector, clock.clone(), bus.sender());
        let (radio_tx, radio_rx) = bounded(RADIO_QUEUE_LEN);
        let last_tick_ms = clock.now_ms();

        Ok(Self {
            bus,
            store,
            connections,
            detector,
            view,
            clock,
            last_tick_ms,
            flash_rx,
            radio_tx,
            radio_rx,
        })
    }

    /// 启动：初始化 Flash 并处理到空闲
    pub fn start(&mut self) -> Result<(), ClientError> {
        self.store.lock().initialize()?;
        self.run_until_idle();
        let snapshot = self.view.load();
        info!(
            initialized = snapshot.initialized,
            sessions = snapshot.session_count(),
            last_session_id = snapshot.last_session_id,
            "Device started"
        );
        Ok(())
    }

    /// 输入一个信号强度采样，过线时返回时间戳
    pub fn on_sample(&mut self, sample: u16) -> Option<u32> {
        self.detector.on_sample(sample)
    }

    /// 主循环的一轮：Flash 通知、无线上行、定时器、即时事件，返回处理的条目数
    pub fn run_once(&mut self) -> usize {
        let mut handled = 0;

        while let Ok(event) = self.flash_rx.try_recv() {
            self.store.lock().handle_flash_event(event);
            handled += 1;
            handled += self.bus.dispatch_pending();
        }

        while let Ok(event) = self.radio_rx.try_recv() {
            debug!(?event, "Radio event");
            if let Err(e) = self.connections.lock().handle_radio_event(event) {
                warn!("Radio event rejected: {}", e);
            }
            handled += 1;
            handled += self.bus.dispatch_pending();
        }

        let now_ms = self.clock.now_ms();
        let elapsed = now_ms.wrapping_sub(self.last_tick_ms);
        self.last_tick_ms = now_ms;
        if elapsed > 0 {
            self.bus.advance(elapsed);
        }

        handled + self.bus.dispatch_pending()
    }

    /// 反复运行直到没有待处理的条目，返回处理的条目总数
    pub fn run_until_idle(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_IDLE_ROUNDS {
            let handled = self.run_once();
            if handled == 0 {
                return total;
            }
            total += handled;
        }
        warn!(rounds = MAX_IDLE_ROUNDS, "Main loop did not settle");
        total
    }

    pub fn sender(&self) -> EventSender {
        self.bus.sender()
    }

    pub fn view(&self) -> SessionView {
        self.view.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.view.load()
    }

    /// 无线协作者的上行入口
    pub fn radio_sender(&self) -> Sender<RadioEvent> {
        self.radio_tx.clone()
    }

    pub fn store(&self) -> MutexGuard<'_, SessionStore<F>> {
        self.store.lock()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// 未到期的延迟事件数
    pub fn pending_timers(&self) -> usize {
        self.bus.pending_timers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use laptimer_driver::{Event, Origin};
    use laptimer_hal::{MockClock, MockFlashStore, MockLed};

    fn device(flash: MockFlashStore) -> (Device<MockFlashStore>, MockClock, MockLed) {
        let clock = MockClock::new(0);
        let led = MockLed::new();
        let mut device = Device::new(
            flash,
            led.clone(),
            Arc::new(clock.clone()),
            DeviceConfig::default(),
        )
        .unwrap();
        device.start().unwrap();
        (device, clock, led)
    }

    #[test]
    fn test_start_initializes_storage() {
        let mut flash = MockFlashStore::new(64);
        flash.preload(7, 0, &[1]);
        flash.preload(7, 1, &[4_321]);
        let (device, _, _) = device(flash);
        let snapshot = device.snapshot();
        assert!(snapshot.initialized);
        assert_eq!(snapshot.last_session_id, 7);
        assert_eq!(snapshot.lap_count, 1);
    }

    #[test]
    fn test_led_turns_off_as_clock_advances() {
        let (mut device, clock, led) = device(MockFlashStore::new(64));
        device
            .sender()
            .emit(Event::StartSession {
                origin: Origin::Device,
            })
            .unwrap();
        device.run_until_idle();
        let config = LedConfig::default();
        assert_eq!(led.history(), vec![(config.session_led, true)]);
        assert_eq!(device.pending_timers(), 1);

        clock.advance(u32::from(config.flash_ms));
        device.run_until_idle();
        assert_eq!(
            led.history(),
            vec![(config.session_led, true), (config.session_led, false)]
        );
        assert_eq!(device.pending_timers(), 0);
    }

    #[test]
    fn test_samples_drive_laps() {
        let (mut device, clock, _) = device(MockFlashStore::new(64));
        device
            .sender()
            .emit(Event::StartSession {
                origin: Origin::Device,
            })
            .unwrap();
        device.run_until_idle();

        let config = *device.detector.config();
        let mut crossings = Vec::new();
        for start_ms in [1_000, 62_000] {
            clock.set(start_ms);
            for _ in 0..=config.checkpoint_count + 5 {
                if let Some(timestamp_ms) = device.on_sample(config.rssi_threshold + 1000) {
                    crossings.push(timestamp_ms);
                }
            }
            for _ in 0..=config.track_count + 5 {
                device.on_sample(config.rssi_threshold - 1000);
            }
            device.run_until_idle();
        }

        assert_eq!(crossings, vec![1_000, 62_000]);
        let snapshot = device.snapshot();
        assert_eq!(snapshot.lap_count, 1);
        assert_eq!(snapshot.last_lap.map(|lap| lap.lap_time), Some(61_000));
        assert_eq!(device.store().pending_writes(), 0);
    }
}
